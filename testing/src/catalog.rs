//! Mutable in-memory [`Catalog`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use turnstile_core::catalog::{Catalog, CatalogEntry, CatalogError};
use turnstile_core::types::{EventId, Money, TicketTypeId};

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<(EventId, TicketTypeId), CatalogEntry>,
    unavailable: bool,
}

/// In-memory catalog for tests. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    inner: Arc<Mutex<Inner>>,
}

impl StaticCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a ticket type on sale at `price`.
    pub fn insert(&self, event_id: EventId, ticket_type_id: TicketTypeId, name: &str, price: Money) {
        self.lock().entries.insert(
            (event_id, ticket_type_id),
            CatalogEntry {
                price,
                available: true,
                name: name.to_string(),
            },
        );
    }

    /// Change the price of a ticket type.
    pub fn set_price(&self, event_id: EventId, ticket_type_id: TicketTypeId, price: Money) {
        if let Some(entry) = self.lock().entries.get_mut(&(event_id, ticket_type_id)) {
            entry.price = price;
        }
    }

    /// Take a ticket type on or off sale.
    pub fn set_available(&self, event_id: EventId, ticket_type_id: TicketTypeId, available: bool) {
        if let Some(entry) = self.lock().entries.get_mut(&(event_id, ticket_type_id)) {
            entry.available = available;
        }
    }

    /// Make lookups fail with [`CatalogError::Unavailable`] (or stop doing so).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unavailable = unreachable;
    }
}

impl Catalog for StaticCatalog {
    fn lookup(
        &self,
        event_id: EventId,
        ticket_type_id: TicketTypeId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CatalogEntry>, CatalogError>> + Send + '_>> {
        let inner = self.lock();
        let result = if inner.unavailable {
            Err(CatalogError::Unavailable("static catalog switched off".to_string()))
        } else {
            Ok(inner.entries.get(&(event_id, ticket_type_id)).cloned())
        };
        drop(inner);
        Box::pin(async move { result })
    }
}
