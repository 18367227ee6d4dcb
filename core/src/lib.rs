//! # Turnstile Core
//!
//! Ticket issuance and redemption: minting unique single-use entry
//! credentials at purchase time, mirroring them on the holder's device, and
//! redeeming each one exactly once at the venue door under concurrent
//! scanning.
//!
//! ## Components
//!
//! - [`minter::Minter`]: one ticket per line item, idempotent on a key, all-or-nothing
//! - [`store::TicketStore`]: durable source of truth with atomic conditional writes
//! - [`validator::RedemptionValidator`]: door-scan state machine, at-most-once redemption
//! - [`cache::OfflineCache`]: bounded TTL mirror of a user's own tickets
//! - [`checkout::CheckoutOrchestrator`]: payment confirmation → mint → cache
//!
//! ## Data flow
//!
//! ```text
//! Checkout ─▶ Minter ─▶ TicketStore (batch write) ─▶ OfflineCache
//!                            ▲
//!                            └── RedemptionValidator (scan time)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use turnstile_core::validator::{RedemptionValidator, ScanOutcome};
//!
//! let validator = RedemptionValidator::new(store, clock);
//! match validator.validate(&presented, event_id, &scanner).await? {
//!     ScanOutcome::Accepted(admission) => admit(admission.quantity),
//!     ScanOutcome::Rejected(rejection) => show(rejection.message(), rejection.cue()),
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod cache;
pub mod catalog;
pub mod checkout;
pub mod code;
pub mod metrics;
pub mod minter;
pub mod retry;
pub mod store;
pub mod types;
pub mod validator;

/// Environment module - Dependency injection traits
///
/// External dependencies that make behavior time- or entropy-dependent are
/// abstracted behind traits and injected, so tests can pin them.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use cache::{CacheBackend, CacheConfig, CacheEntry, CacheError, OfflineCache};
pub use catalog::{Catalog, CatalogEntry, CatalogError};
pub use checkout::{Cart, CartLine, CheckoutError, CheckoutOrchestrator, MintClient};
pub use code::{CodeSource, RedemptionCode};
pub use environment::{Clock, SystemClock};
pub use minter::{LineItem, MintError, MintRequest, MintResult, Minter, MinterConfig};
pub use store::{StoreError, TicketStore, TransitionOutcome};
pub use types::*;
pub use validator::{Rejection, RedemptionValidator, ScanCue, ScanOutcome, ValidateError};
