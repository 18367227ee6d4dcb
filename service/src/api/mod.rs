//! JSON API handlers, mounted under `/api`.

pub mod idempotency;
pub mod mints;
pub mod scans;
pub mod tickets;

pub use idempotency::{IDEMPOTENCY_KEY_HEADER, IdempotencyHeader};
pub use mints::MintResponse;
pub use scans::{ScanRequest, ScanResponse};
pub use tickets::{RevokeRequest, TicketView};
