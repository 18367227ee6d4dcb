//! `Idempotency-Key` request header.
//!
//! Mint requests must carry a key of 16-128 visible ASCII characters. The
//! key is the whole idempotency contract: the store binds it to the request
//! fingerprint, so no response caching happens at the HTTP layer.

use crate::error::AppError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use turnstile_core::types::{IDEMPOTENCY_KEY_MAX_LEN, IDEMPOTENCY_KEY_MIN_LEN, IdempotencyKey};

/// Header name
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Extracted and validated `Idempotency-Key`.
#[derive(Debug, Clone)]
pub struct IdempotencyHeader(pub IdempotencyKey);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyHeader
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .ok_or_else(|| AppError::bad_request("Missing Idempotency-Key header"))?
            .to_str()
            .map_err(|_| AppError::bad_request("Invalid Idempotency-Key header value"))?;

        IdempotencyKey::new(raw).map(Self).map_err(|_| {
            AppError::bad_request(format!(
                "Idempotency-Key must be {IDEMPOTENCY_KEY_MIN_LEN}-{IDEMPOTENCY_KEY_MAX_LEN} visible ASCII characters"
            ))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    async fn extract(value: Option<&str>) -> Result<IdempotencyHeader, AppError> {
        let mut builder = Request::builder();
        if let Some(value) = value {
            builder = builder.header(IDEMPOTENCY_KEY_HEADER, value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        IdempotencyHeader::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_valid_key_extracted() {
        let IdempotencyHeader(key) = extract(Some("pay_0123456789abcdef")).await.unwrap();
        assert_eq!(key.as_str(), "pay_0123456789abcdef");
    }

    #[tokio::test]
    async fn test_missing_or_short_key_rejected() {
        for value in [None, Some("short"), Some(&*"k".repeat(129))] {
            let err = extract(value).await.unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        }
    }
}
