//! Ticket Identifier Minter.
//!
//! Turns a confirmed purchase into tickets: one per line item, each with a
//! fresh UUID v4 id and a CSPRNG-backed redemption code, written to the store
//! as a single all-or-nothing batch bound to the request's idempotency key.
//!
//! # Idempotency
//!
//! The request is reduced to a canonical SHA-256 fingerprint that is stored
//! with the batch. A repeat of the same key:
//!
//! - with the same fingerprint returns the originally minted tickets
//!   ([`MintResult::Replayed`]), without consulting the catalog again;
//! - with a different fingerprint fails with
//!   [`MintError::IdempotencyKeyReused`].

use crate::catalog::{Catalog, CatalogError};
use crate::code::CodeSource;
use crate::environment::Clock;
use crate::metrics;
use crate::store::{BatchWrite, MintBatch, StoreError, TicketStore};
use crate::types::{
    EventId, IdempotencyKey, Money, Ticket, TicketId, TicketState, TicketTypeId, UserId, hex,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

/// Default validity horizon of a ticket, in days
pub const DEFAULT_VALIDITY_DAYS: i64 = 365;

/// Default maximum `quantity` on a single line item
pub const DEFAULT_MAX_QUANTITY_PER_LINE: u32 = 10;

/// Default maximum number of line items (tickets) in one batch
pub const DEFAULT_MAX_ITEMS_PER_BATCH: usize = 50;

/// One purchased line: becomes exactly one ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Event
    pub event_id: EventId,
    /// Ticket type within the event
    pub ticket_type_id: TicketTypeId,
    /// Admissions on the ticket
    pub quantity: u32,
    /// Unit price the buyer was quoted
    pub price: Money,
}

/// A confirmed purchase to mint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRequest {
    /// Purchaser
    pub owner: UserId,
    /// Purchased lines
    pub items: Vec<LineItem>,
}

impl MintRequest {
    /// Canonical SHA-256 fingerprint of the request (lowercase hex).
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.owner.as_uuid().as_bytes());
        for item in &self.items {
            hasher.update(item.event_id.as_uuid().as_bytes());
            hasher.update(item.ticket_type_id.as_uuid().as_bytes());
            hasher.update(item.quantity.to_be_bytes());
            hasher.update(item.price.cents().to_be_bytes());
        }
        hex(&hasher.finalize())
    }
}

/// Successful mint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MintResult {
    /// Tickets minted by this call.
    Created(Vec<Ticket>),
    /// Tickets minted by an earlier call with the same key.
    Replayed(Vec<Ticket>),
}

impl MintResult {
    /// The minted tickets, in line-item order
    #[must_use]
    pub fn tickets(&self) -> &[Ticket] {
        match self {
            Self::Created(t) | Self::Replayed(t) => t,
        }
    }

    /// Take the tickets
    #[must_use]
    pub fn into_tickets(self) -> Vec<Ticket> {
        match self {
            Self::Created(t) | Self::Replayed(t) => t,
        }
    }

    /// Whether this was answered from an existing batch
    #[must_use]
    pub const fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

/// Why a purchase could not be minted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MintError {
    /// No line items.
    #[error("Purchase has no line items")]
    EmptyPurchase,

    /// A line quantity is zero or over the per-line maximum.
    #[error("Invalid quantity {quantity} on line {line} (allowed 1-{max})")]
    InvalidQuantity {
        /// Zero-based line index
        line: usize,
        /// Requested quantity
        quantity: u32,
        /// Configured maximum
        max: u32,
    },

    /// More line items than one batch may hold.
    #[error("Purchase has {items} line items (allowed 1-{max})")]
    TooManyItems {
        /// Requested line items
        items: usize,
        /// Configured maximum
        max: usize,
    },

    /// `issued_at + validity` is not a representable timestamp.
    #[error("Ticket validity horizon out of range")]
    ValidityOutOfRange,

    /// The catalog has no such ticket type.
    #[error("Unknown ticket type {ticket_type_id} for event {event_id}")]
    UnknownTicketType {
        /// Event
        event_id: EventId,
        /// Ticket type
        ticket_type_id: TicketTypeId,
    },

    /// The ticket type is not on sale.
    #[error("Ticket type {ticket_type_id} is sold out")]
    SoldOut {
        /// Ticket type
        ticket_type_id: TicketTypeId,
    },

    /// The quoted price no longer matches the catalog.
    #[error("Price changed for {ticket_type_id}: quoted {quoted}, current {current}")]
    PriceChanged {
        /// Ticket type
        ticket_type_id: TicketTypeId,
        /// Price the client sent
        quoted: Money,
        /// Catalog price
        current: Money,
    },

    /// Key already bound to a different request.
    #[error("Idempotency key {key} already used for a different request")]
    IdempotencyKeyReused {
        /// Reused key
        key: String,
    },

    /// A generated redemption code already exists; the batch was aborted.
    #[error("Redemption code collision, batch aborted")]
    CodeCollision,

    /// Catalog lookup failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The minting service could not be reached.
    #[error("Minting service unavailable: {0}")]
    Unavailable(String),

    /// A remote minting service refused the request for a reason this
    /// client has no dedicated variant for.
    #[error("Mint rejected [{code}]: {message}")]
    Rejected {
        /// Machine-readable error code
        code: String,
        /// Human-readable message
        message: String,
    },

    /// Store failure.
    #[error(transparent)]
    Store(StoreError),
}

impl MintError {
    /// Whether the same request may succeed if retried with the same key.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::CodeCollision | Self::Catalog(_) | Self::Unavailable(_) => true,
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<StoreError> for MintError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::IdempotencyKeyReused { key } => Self::IdempotencyKeyReused { key },
            StoreError::CodeCollision { .. } => Self::CodeCollision,
            other => Self::Store(other),
        }
    }
}

/// Minter limits.
#[derive(Clone, Debug)]
pub struct MinterConfig {
    /// Validity horizon from issuance
    pub validity: Duration,
    /// Maximum quantity on one line item
    pub max_quantity_per_line: u32,
    /// Maximum line items in one batch
    pub max_items_per_batch: usize,
}

impl Default for MinterConfig {
    fn default() -> Self {
        Self {
            validity: Duration::days(DEFAULT_VALIDITY_DAYS),
            max_quantity_per_line: DEFAULT_MAX_QUANTITY_PER_LINE,
            max_items_per_batch: DEFAULT_MAX_ITEMS_PER_BATCH,
        }
    }
}

/// Mints tickets for confirmed purchases.
#[derive(Clone)]
pub struct Minter {
    store: Arc<dyn TicketStore>,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    codes: Arc<dyn CodeSource>,
    config: MinterConfig,
}

impl Minter {
    /// Create a minter.
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        codes: Arc<dyn CodeSource>,
        config: MinterConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            codes,
            config,
        }
    }

    /// Mint one ticket per line item of `request`, idempotent on `key`.
    ///
    /// # Errors
    ///
    /// - Validation failures ([`MintError::EmptyPurchase`], [`MintError::TooManyItems`],
    ///   [`MintError::InvalidQuantity`], [`MintError::UnknownTicketType`],
    ///   [`MintError::SoldOut`], [`MintError::PriceChanged`])
    /// - [`MintError::ValidityOutOfRange`] if the configured horizon overflows
    /// - [`MintError::IdempotencyKeyReused`] if `key` was used for another request
    /// - [`MintError::CodeCollision`] if a generated code already existed (nothing written)
    /// - [`MintError::Catalog`] / [`MintError::Store`] on infrastructure failure
    pub async fn mint(
        &self,
        key: &IdempotencyKey,
        request: &MintRequest,
    ) -> Result<MintResult, MintError> {
        let fingerprint = request.fingerprint();

        if let Some(existing) = self.store.get_batch(key.clone()).await? {
            if existing.fingerprint != fingerprint {
                tracing::warn!(key = %key, owner = %request.owner, "Idempotency key reused for a different purchase");
                return Err(MintError::IdempotencyKeyReused {
                    key: key.to_string(),
                });
            }
            tracing::info!(key = %key, tickets = existing.tickets.len(), "Replaying mint batch");
            metrics::record_mint_replay();
            return Ok(MintResult::Replayed(existing.tickets));
        }

        self.validate(request).await?;

        let issued_at = self.clock.now();
        let valid_until = issued_at
            .checked_add_signed(self.config.validity)
            .ok_or(MintError::ValidityOutOfRange)?;
        let tickets: Vec<Ticket> = request
            .items
            .iter()
            .map(|item| Ticket {
                id: TicketId::new(),
                event_id: item.event_id,
                ticket_type_id: item.ticket_type_id,
                owner_user_id: request.owner,
                quantity: item.quantity,
                price: item.price,
                redemption_code: self.codes.next_code(issued_at),
                state: TicketState::Unredeemed,
                issued_at,
                valid_until,
                redeemed_at: None,
                redeemed_by: None,
                revoked_at: None,
                revocation_reason: None,
                batch_key: key.to_string(),
            })
            .collect();

        let batch = MintBatch {
            key: key.clone(),
            fingerprint,
            tickets,
        };

        match self.store.create_batch(batch).await {
            Ok(BatchWrite::Created(tickets)) => {
                tracing::info!(
                    key = %key,
                    owner = %request.owner,
                    tickets = tickets.len(),
                    "Minted ticket batch"
                );
                metrics::record_minted(tickets.len());
                Ok(MintResult::Created(tickets))
            }
            Ok(BatchWrite::Replayed(tickets)) => {
                tracing::info!(key = %key, tickets = tickets.len(), "Concurrent mint won the key, replaying");
                metrics::record_mint_replay();
                Ok(MintResult::Replayed(tickets))
            }
            Err(StoreError::CodeCollision { key: batch_key }) => {
                tracing::error!(key = %batch_key, "Redemption code collision, mint batch aborted");
                metrics::record_code_collision();
                Err(MintError::CodeCollision)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn validate(&self, request: &MintRequest) -> Result<(), MintError> {
        if request.items.is_empty() {
            return Err(MintError::EmptyPurchase);
        }
        if request.items.len() > self.config.max_items_per_batch {
            return Err(MintError::TooManyItems {
                items: request.items.len(),
                max: self.config.max_items_per_batch,
            });
        }

        let max = self.config.max_quantity_per_line;
        for (line, item) in request.items.iter().enumerate() {
            if item.quantity == 0 || item.quantity > max {
                return Err(MintError::InvalidQuantity {
                    line,
                    quantity: item.quantity,
                    max,
                });
            }

            let entry = self
                .catalog
                .lookup(item.event_id, item.ticket_type_id)
                .await?
                .ok_or(MintError::UnknownTicketType {
                    event_id: item.event_id,
                    ticket_type_id: item.ticket_type_id,
                })?;

            if !entry.available {
                return Err(MintError::SoldOut {
                    ticket_type_id: item.ticket_type_id,
                });
            }
            if entry.price != item.price {
                return Err(MintError::PriceChanged {
                    ticket_type_id: item.ticket_type_id,
                    quoted: item.price,
                    current: entry.price,
                });
            }
        }

        Ok(())
    }
}
