//! Router configuration.

use super::health::{health_check, readiness_check};
use super::middleware::request_id;
use super::state::AppState;
use crate::api::{mints, scans, tickets};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// ```text
/// GET  /health
/// GET  /ready
/// POST /api/mints                 (session; Idempotency-Key header required)
/// POST /api/scans                 (staff)
/// GET  /api/tickets/:id           (session; code shown to the owner only)
/// POST /api/tickets/:id/revoke    (staff)
/// GET  /api/users/:id/tickets     (that user or staff)
/// ```
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/mints", post(mints::create_mint))
        .route("/scans", post(scans::scan_ticket))
        .route("/tickets/:id", get(tickets::get_ticket))
        .route("/tickets/:id/revoke", post(tickets::revoke_ticket))
        .route("/users/:id/tickets", get(tickets::list_user_tickets));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", api_routes)
        .layer(axum::middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
