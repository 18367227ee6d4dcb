//! HTTP error responses.
//!
//! Every failure leaves the service as `{"code": ..., "message": ...}` with a
//! status that tells clients whether to retry: 4xx for definitive rejections,
//! 503 for transient infrastructure trouble, 500 for everything else. A
//! rejected scan is *not* an error; it is a 200 with a typed reason.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use turnstile_core::minter::MintError;
use turnstile_core::store::StoreError;
use turnstile_core::validator::ValidateError;

/// Application error type for handlers.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    /// Create an error with an explicit status and code.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// 400 Bad Request
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 401 Unauthorized
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// 403 Forbidden
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    /// 404 Not Found
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{resource} with id {id} not found"),
        )
    }

    /// 409 Conflict
    #[must_use]
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    /// 422 Unprocessable Entity
    #[must_use]
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
    }

    /// 500 Internal Server Error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            message,
        )
    }

    /// 503 Service Unavailable
    #[must_use]
    pub fn unavailable(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, code, message)
    }

    /// HTTP status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                "Request failed"
            );
        }

        let body = ErrorBody {
            code: self.code.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound(id) => Self::not_found("Ticket", id),
            e if e.is_transient() => Self::unavailable("STORE_UNAVAILABLE", err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}

impl From<MintError> for AppError {
    fn from(err: MintError) -> Self {
        let message = err.to_string();
        match err {
            MintError::EmptyPurchase => Self::validation("EMPTY_PURCHASE", message),
            MintError::InvalidQuantity { .. } => Self::validation("INVALID_QUANTITY", message),
            MintError::TooManyItems { .. } => Self::validation("TOO_MANY_ITEMS", message),
            MintError::UnknownTicketType { .. } => {
                Self::validation("UNKNOWN_TICKET_TYPE", message)
            }
            MintError::IdempotencyKeyReused { .. } => {
                Self::validation("IDEMPOTENCY_KEY_REUSED", message)
            }
            MintError::SoldOut { .. } => Self::conflict("SOLD_OUT", message),
            MintError::PriceChanged { .. } => Self::conflict("PRICE_CHANGED", message),
            MintError::CodeCollision => Self::unavailable("CODE_COLLISION", message),
            MintError::Catalog(_) => Self::unavailable("CATALOG_UNAVAILABLE", message),
            MintError::Unavailable(_) => Self::unavailable("MINT_UNAVAILABLE", message),
            MintError::Rejected { .. } => Self::validation("MINT_REJECTED", message),
            MintError::ValidityOutOfRange => Self::internal(message),
            MintError::Store(e) => e.into(),
        }
    }
}

impl From<ValidateError> for AppError {
    fn from(err: ValidateError) -> Self {
        match err {
            ValidateError::Store(e) => e.into(),
            ValidateError::Inconsistent(_) => Self::internal(err.to_string()),
        }
    }
}
