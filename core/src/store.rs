//! Ticket Store abstraction.
//!
//! The store is the durable record of every minted ticket and the only shared
//! mutable resource in the system. Every mutation is a single atomic
//! operation:
//!
//! - [`TicketStore::create_batch`] writes all tickets of a mint batch or none,
//!   and is idempotent on the batch key.
//! - [`TicketStore::transition_to_redeemed`] and [`TicketStore::revoke`] are
//!   conditional writes that apply only while the ticket is `unredeemed` and
//!   inside its validity horizon. Concurrent callers race on the condition and
//!   exactly one wins.
//!
//! # Trait shape
//!
//! Methods return `Pin<Box<dyn Future>>` so the store can be shared as
//! `Arc<dyn TicketStore>` between the minter, the validator and the HTTP layer.

use crate::code::RedemptionCode;
use crate::types::{EventId, IdempotencyKey, ScannerId, Ticket, TicketId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors returned by [`TicketStore`] implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store cannot be reached (connection refused, pool exhausted, timeout).
    #[error("Ticket store unavailable: {0}")]
    Unavailable(String),

    /// Query failed for a reason other than availability.
    #[error("Database error: {0}")]
    Database(String),

    /// Stored data could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A redemption code in the batch already exists. Nothing was written.
    #[error("Redemption code collision in batch {key}")]
    CodeCollision {
        /// Batch that collided
        key: String,
    },

    /// The batch key is already bound to a different request.
    #[error("Idempotency key {key} already used for a different request")]
    IdempotencyKeyReused {
        /// Reused key
        key: String,
    },

    /// No ticket with this id.
    #[error("Ticket not found: {0}")]
    NotFound(TicketId),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    ///
    /// A code collision leaves nothing committed, so a retry that draws fresh
    /// codes is safe.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::CodeCollision { .. })
    }
}

/// A batch of freshly minted tickets to be written atomically.
#[derive(Clone, Debug)]
pub struct MintBatch {
    /// Idempotency key the batch is bound to
    pub key: IdempotencyKey,
    /// Canonical fingerprint of the request that produced the batch
    pub fingerprint: String,
    /// Tickets in line-item order
    pub tickets: Vec<Ticket>,
}

/// A previously committed batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBatch {
    /// Fingerprint recorded at creation
    pub fingerprint: String,
    /// Tickets in line-item order
    pub tickets: Vec<Ticket>,
}

/// Result of [`TicketStore::create_batch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchWrite {
    /// The batch was written by this call.
    Created(Vec<Ticket>),
    /// The key was already committed with the same fingerprint; these are the
    /// originally minted tickets.
    Replayed(Vec<Ticket>),
}

/// Result of a conditional state transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The condition held and the ticket was updated; carries the new row.
    Applied(Ticket),
    /// The condition failed; carries the ticket as it currently stands.
    Rejected(Ticket),
    /// No ticket with this id.
    NotFound,
}

/// Outcome recorded for a scan attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcomeKind {
    /// Ticket redeemed by this scan
    Accepted,
    /// Code matches no ticket
    UnknownCode,
    /// Ticket belongs to another event
    WrongEvent,
    /// Ticket was already redeemed
    AlreadyUsed,
    /// Validity horizon passed
    Expired,
    /// Ticket was voided
    Revoked,
}

impl ScanOutcomeKind {
    /// Storage and metric label representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::UnknownCode => "unknown_code",
            Self::WrongEvent => "wrong_event",
            Self::AlreadyUsed => "already_used",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accepted" => Some(Self::Accepted),
            "unknown_code" => Some(Self::UnknownCode),
            "wrong_event" => Some(Self::WrongEvent),
            "already_used" => Some(Self::AlreadyUsed),
            "expired" => Some(Self::Expired),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// One entry of the scan audit log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Scanner or operator that presented the code
    pub scanner: ScannerId,
    /// Code as presented (may be malformed)
    pub presented_code: String,
    /// Matched ticket, if any
    pub ticket_id: Option<TicketId>,
    /// Event the door is admitting to
    pub expected_event_id: EventId,
    /// Validation outcome
    pub outcome: ScanOutcomeKind,
    /// Scan time
    pub scanned_at: DateTime<Utc>,
}

/// Durable ticket storage.
pub trait TicketStore: Send + Sync {
    /// Atomically write a mint batch, idempotent on `batch.key`.
    ///
    /// If the key is already committed with the same fingerprint, returns
    /// [`BatchWrite::Replayed`] with the original tickets and writes nothing.
    ///
    /// # Errors
    ///
    /// - [`StoreError::IdempotencyKeyReused`] if the key is bound to another fingerprint
    /// - [`StoreError::CodeCollision`] if any redemption code already exists;
    ///   no ticket of the batch is written
    /// - [`StoreError::Unavailable`] / [`StoreError::Database`] on infrastructure failure
    fn create_batch(&self, batch: MintBatch) -> StoreFuture<'_, BatchWrite>;

    /// Look up a committed batch by key.
    ///
    /// # Errors
    ///
    /// Returns an error on infrastructure failure.
    fn get_batch(&self, key: IdempotencyKey) -> StoreFuture<'_, Option<StoredBatch>>;

    /// Fetch a ticket by id.
    ///
    /// # Errors
    ///
    /// Returns an error on infrastructure failure.
    fn get(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>>;

    /// Fetch a ticket by redemption code (unique index).
    ///
    /// # Errors
    ///
    /// Returns an error on infrastructure failure.
    fn get_by_redemption_code(&self, code: RedemptionCode) -> StoreFuture<'_, Option<Ticket>>;

    /// Redeem a ticket if it is `unredeemed` and `now <= valid_until`.
    ///
    /// Single atomic conditional write; stamps `redeemed_at = now` and
    /// `redeemed_by = redeemer` when applied.
    ///
    /// # Errors
    ///
    /// Returns an error on infrastructure failure.
    fn transition_to_redeemed(
        &self,
        id: TicketId,
        redeemer: ScannerId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, TransitionOutcome>;

    /// Revoke a ticket under the same guard as redemption.
    ///
    /// # Errors
    ///
    /// Returns an error on infrastructure failure.
    fn revoke(
        &self,
        id: TicketId,
        reason: String,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, TransitionOutcome>;

    /// All tickets owned by `owner`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on infrastructure failure.
    fn list_for_owner(&self, owner: UserId) -> StoreFuture<'_, Vec<Ticket>>;

    /// Append to the scan audit log. Never touches ticket state.
    ///
    /// # Errors
    ///
    /// Returns an error on infrastructure failure.
    fn record_scan(&self, record: ScanRecord) -> StoreFuture<'_, ()>;

    /// Check the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if it is not.
    fn ping(&self) -> StoreFuture<'_, ()>;
}
