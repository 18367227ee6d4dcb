//! `PostgreSQL` ticket store for Turnstile.
//!
//! Implements [`turnstile_core::TicketStore`] on top of sqlx with:
//!
//! - All-or-nothing mint batches keyed by idempotency key
//! - Compare-and-set redemption and revocation in a single statement
//! - A database-enforced unique redemption code
//! - An append-only scan audit log
//! - Embedded migrations (`migrations/`)
//!
//! # Example
//!
//! ```ignore
//! use turnstile_postgres::PostgresTicketStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresTicketStore::connect("postgres://localhost/turnstile", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod ticket_store;

pub use ticket_store::PostgresTicketStore;
