//! Application state for the HTTP server.

use crate::auth::SessionResolver;
use std::sync::Arc;
use turnstile_core::catalog::Catalog;
use turnstile_core::code::OsRngCodeSource;
use turnstile_core::environment::Clock;
use turnstile_core::minter::{Minter, MinterConfig};
use turnstile_core::store::TicketStore;
use turnstile_core::validator::RedemptionValidator;

/// Shared resources for every handler. Cloned per request (all `Arc`s).
#[derive(Clone)]
pub struct AppState {
    /// Ticket store (source of truth)
    pub store: Arc<dyn TicketStore>,
    /// Minter over `store`
    pub minter: Arc<Minter>,
    /// Door-scan validator over `store`
    pub validator: Arc<RedemptionValidator>,
    /// Bearer token resolution
    pub sessions: Arc<dyn SessionResolver>,
    /// Clock used for effective state and revocation stamps
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wire the minter and validator over one store and clock.
    ///
    /// Redemption codes come from the operating system CSPRNG.
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        catalog: Arc<dyn Catalog>,
        sessions: Arc<dyn SessionResolver>,
        clock: Arc<dyn Clock>,
        minter_config: MinterConfig,
    ) -> Self {
        let minter = Minter::new(
            store.clone(),
            catalog,
            clock.clone(),
            Arc::new(OsRngCodeSource),
            minter_config,
        );
        let validator = RedemptionValidator::new(store.clone(), clock.clone());

        Self {
            store,
            minter: Arc::new(minter),
            validator: Arc::new(validator),
            sessions,
            clock,
        }
    }
}
