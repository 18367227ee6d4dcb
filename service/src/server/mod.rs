//! HTTP server: state, routing, health checks and middleware.

pub mod health;
pub mod middleware;
pub mod routes;
pub mod state;

pub use health::{health_check, readiness_check};
pub use routes::build_router;
pub use state::AppState;
