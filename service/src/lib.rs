//! # Turnstile Service
//!
//! HTTP surface for ticket minting and redemption.
//!
//! - [`server`]: axum router, shared state, health checks, request ids
//! - [`api`]: `/api` handlers (mint, scan, ticket reads, revocation)
//! - [`auth`]: bearer sessions, staff-only routes, owner-only codes
//! - [`error`]: [`AppError`], the `{code, message}` error response
//! - [`config`]: environment configuration
//! - [`catalog::HttpCatalog`]: catalog lookups over HTTP
//! - [`client::HttpMintClient`]: checkout-side client for this API
//!
//! # Example
//!
//! ```ignore
//! use turnstile_service::{AppState, build_router};
//!
//! let state = AppState::new(store, catalog, sessions, clock, config.minter_config());
//! let app = build_router(state);
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod auth;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod server;

pub use catalog::HttpCatalog;
pub use client::HttpMintClient;
pub use config::Config;
pub use error::AppError;
pub use server::{AppState, build_router};

/// Result type alias for handlers.
pub type WebResult<T> = Result<T, AppError>;
