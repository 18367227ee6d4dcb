//! Read-only view of the event catalog used at mint time.

use crate::types::{EventId, Money, TicketTypeId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Catalog data for one ticket type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Current unit price
    pub price: Money,
    /// Whether the ticket type is on sale
    pub available: bool,
    /// Display name (e.g. "General Admission")
    pub name: String,
}

/// Catalog lookup failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Catalog service cannot be reached.
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

/// The pre-existing event catalog service.
pub trait Catalog: Send + Sync {
    /// Look up a ticket type. `Ok(None)` if the catalog has no such type.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unavailable`] if the catalog cannot be reached.
    fn lookup(
        &self,
        event_id: EventId,
        ticket_type_id: TicketTypeId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CatalogEntry>, CatalogError>> + Send + '_>>;
}
