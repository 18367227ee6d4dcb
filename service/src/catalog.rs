//! [`Catalog`] backed by the event catalog's HTTP API.
//!
//! `GET {base}/events/{event_id}/ticket-types/{ticket_type_id}` answers with
//! a [`CatalogEntry`]; 404 means the catalog has no such ticket type.

use reqwest::StatusCode;
use std::time::Duration;
use std::future::Future;
use std::pin::Pin;
use turnstile_core::catalog::{Catalog, CatalogEntry, CatalogError};
use turnstile_core::types::{EventId, TicketTypeId};

/// HTTP catalog client.
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalog {
    /// Client for the catalog at `base_url`, giving up on any call after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing `reqwest` client (timeouts, pooling).
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, event_id: EventId, ticket_type_id: TicketTypeId) -> String {
        format!(
            "{}/events/{event_id}/ticket-types/{ticket_type_id}",
            self.base_url
        )
    }

    async fn fetch(
        &self,
        event_id: EventId,
        ticket_type_id: TicketTypeId,
    ) -> Result<Option<CatalogEntry>, CatalogError> {
        let unavailable = |e: reqwest::Error| CatalogError::Unavailable(e.to_string());

        let response = self
            .client
            .get(self.url(event_id, ticket_type_id))
            .send()
            .await
            .map_err(unavailable)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response.json().await.map(Some).map_err(unavailable),
            status => Err(CatalogError::Unavailable(format!(
                "catalog answered {status}"
            ))),
        }
    }
}

impl Catalog for HttpCatalog {
    fn lookup(
        &self,
        event_id: EventId,
        ticket_type_id: TicketTypeId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CatalogEntry>, CatalogError>> + Send + '_>> {
        Box::pin(self.fetch(event_id, ticket_type_id))
    }
}
