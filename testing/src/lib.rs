//! # Turnstile Testing
//!
//! Test doubles for the Turnstile core traits.
//!
//! This crate provides:
//! - [`InMemoryTicketStore`]: mutex-guarded store with the same atomic
//!   semantics as the Postgres store, plus failure injection
//! - [`StaticCatalog`]: mutable in-memory catalog
//! - [`mocks::FixedClock`] / [`mocks::ManualClock`]: deterministic time
//! - [`RepeatingCodeSource`]: forces redemption code collisions
//! - [`FlakyMintClient`]: simulates lost requests and lost responses
//! - [`fixtures::Fixture`]: a wired minter and validator over one event
//!
//! ## Example
//!
//! ```ignore
//! use turnstile_testing::fixtures::Fixture;
//!
//! #[tokio::test]
//! async fn redeem_once() {
//!     let fx = Fixture::new();
//!     let ticket = fx.mint_one(UserId::new()).await;
//!     let outcome = fx.scan(&ticket, "gate-1").await;
//!     assert!(outcome.is_accepted());
//! }
//! ```

use chrono::{DateTime, Utc};
use turnstile_core::environment::Clock;

mod catalog;
mod codes;
pub mod fixtures;
mod mint_client;
mod store;

pub use catalog::StaticCatalog;
pub use codes::RepeatingCodeSource;
pub use mint_client::FlakyMintClient;
pub use store::InMemoryTicketStore;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use turnstile_testing::mocks::FixedClock;
    /// use turnstile_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move forward by `by`
        pub fn advance(&self, by: Duration) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) += by;
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }
}

/// Install a test-friendly tracing subscriber (honours `RUST_LOG`).
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock, test_epoch};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_clock_is_new_year_2025() {
        let clock = test_clock();
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new(test_epoch());
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), test_epoch() + Duration::hours(2));
        clock.set(test_epoch());
        assert_eq!(clock.now(), test_epoch());
    }
}
