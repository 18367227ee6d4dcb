//! Domain types for ticket issuance and redemption.
//!
//! Identifiers, money, the [`Ticket`] record and its lifecycle state, and the
//! denormalized display fields carried by the offline cache.

use crate::code::RedemptionCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a minted ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalog identifier of an event (concert, match, show)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalog identifier of a ticket type within an event (GA, VIP, ...)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketTypeId(Uuid);

impl TicketTypeId {
    /// Creates a new random `TicketTypeId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketTypeId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketTypeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a purchasing user
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the scanner device or door operator performing a redemption.
///
/// Free-form (e.g. `"gate-3/alice"`); recorded verbatim in `redeemed_by` and
/// the scan audit log.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScannerId(String);

impl ScannerId {
    /// Create a scanner identity
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identity as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScannerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-supplied key that makes a mint request safe to retry.
///
/// Between 16 and 128 visible ASCII characters. Checkout derives it from the
/// payment confirmation id with [`IdempotencyKey::for_payment`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

/// Minimum accepted idempotency key length
pub const IDEMPOTENCY_KEY_MIN_LEN: usize = 16;
/// Maximum accepted idempotency key length
pub const IDEMPOTENCY_KEY_MAX_LEN: usize = 128;

/// An idempotency key outside the accepted length or alphabet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("idempotency key must be {IDEMPOTENCY_KEY_MIN_LEN}-{IDEMPOTENCY_KEY_MAX_LEN} visible ASCII characters")]
pub struct InvalidIdempotencyKey;

impl IdempotencyKey {
    /// Validate and wrap a client key.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidIdempotencyKey`] if the key is too short, too long, or
    /// contains whitespace or non-ASCII characters.
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidIdempotencyKey> {
        let key = key.into();
        let len_ok = (IDEMPOTENCY_KEY_MIN_LEN..=IDEMPOTENCY_KEY_MAX_LEN).contains(&key.len());
        if len_ok && key.bytes().all(|b| b.is_ascii_graphic()) {
            Ok(Self(key))
        } else {
            Err(InvalidIdempotencyKey)
        }
    }

    /// Deterministic key for a payment confirmation.
    ///
    /// The same confirmation id always yields the same key, so a checkout
    /// retried after a timeout replays the original mint.
    #[must_use]
    pub fn for_payment(confirmation_id: &str) -> Self {
        let digest = Sha256::digest(confirmation_id.as_bytes());
        Self(format!("pay_{}", hex(&digest)))
    }

    /// Borrow the key
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = InvalidIdempotencyKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase hex encoding.
pub(crate) fn hex(bytes: &[u8]) -> String {
    use fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from whole dollars, `None` on overflow
    #[must_use]
    pub const fn checked_from_dollars(dollars: u64) -> Option<Self> {
        match dollars.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// Lifecycle state of a ticket.
///
/// Transitions are monotonic: `Unredeemed → {Redeemed, Expired, Revoked}`.
/// Nothing leaves a terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    /// Minted, admission right not yet used
    Unredeemed,
    /// Admission right consumed at the door
    Redeemed,
    /// Validity horizon passed before redemption
    Expired,
    /// Voided (refund, fraud, cancellation)
    Revoked,
}

impl TicketState {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unredeemed => "unredeemed",
            Self::Redeemed => "redeemed",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unredeemed" => Some(Self::Unredeemed),
            "redeemed" => Some(Self::Redeemed),
            "expired" => Some(Self::Expired),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }

    /// Whether the state is final.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Unredeemed)
    }
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A minted entry credential.
///
/// `event_id`, `quantity`, `price` and `redemption_code` are fixed at mint time.
/// `redeemed_at`/`redeemed_by` are stamped once on `Unredeemed → Redeemed`,
/// `revoked_at`/`revocation_reason` once on `Unredeemed → Revoked`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier
    pub id: TicketId,
    /// Event this ticket admits to
    pub event_id: EventId,
    /// Ticket type within the event
    pub ticket_type_id: TicketTypeId,
    /// Purchaser
    pub owner_user_id: UserId,
    /// Admissions covered by this ticket (>= 1)
    pub quantity: u32,
    /// Unit price snapshot from the catalog at mint time
    pub price: Money,
    /// QR payload, unique system-wide
    pub redemption_code: RedemptionCode,
    /// Stored state (expiry is evaluated lazily, see [`Ticket::effective_state`])
    pub state: TicketState,
    /// Mint time
    pub issued_at: DateTime<Utc>,
    /// End of the validity horizon
    pub valid_until: DateTime<Utc>,
    /// Redemption time
    pub redeemed_at: Option<DateTime<Utc>>,
    /// Scanner that redeemed the ticket
    pub redeemed_by: Option<ScannerId>,
    /// Revocation time
    pub revoked_at: Option<DateTime<Utc>>,
    /// Why the ticket was revoked
    pub revocation_reason: Option<String>,
    /// Idempotency key of the mint batch that created this ticket
    pub batch_key: String,
}

impl Ticket {
    /// Whether the validity horizon has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }

    /// State as observed at `now`.
    ///
    /// Expiry is lazy: an unredeemed ticket past `valid_until` reports
    /// `Expired` even though the stored state is still `Unredeemed`.
    #[must_use]
    pub fn effective_state(&self, now: DateTime<Utc>) -> TicketState {
        match self.state {
            TicketState::Unredeemed if self.is_expired_at(now) => TicketState::Expired,
            state => state,
        }
    }

    /// Metadata shown on the scanner after a successful redemption.
    #[must_use]
    pub fn admission(&self) -> Admission {
        Admission {
            ticket_id: self.id,
            holder: self.owner_user_id,
            ticket_type_id: self.ticket_type_id,
            quantity: self.quantity,
        }
    }
}

/// What the door operator sees when a ticket is accepted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    /// Redeemed ticket
    pub ticket_id: TicketId,
    /// Ticket holder
    pub holder: UserId,
    /// Ticket type (GA, VIP, ...)
    pub ticket_type_id: TicketTypeId,
    /// Number of people admitted
    pub quantity: u32,
}

/// Denormalized event fields needed to render a ticket without connectivity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayFields {
    /// Event title
    pub event_title: String,
    /// Poster image URL
    pub image_url: Option<String>,
    /// Venue name
    pub venue: String,
    /// Event start time
    pub starts_at: DateTime<Utc>,
}
