//! Authentication extractors.
//!
//! ```rust,ignore
//! async fn list(session: SessionUser, ...) -> Result<..., AppError> { ... }
//! async fn revoke(staff: RequireStaff, ...) -> Result<..., AppError> { ... }
//! ```

use super::sessions::Principal;
use crate::error::AppError;
use crate::server::AppState;
use axum::{async_trait, extract::FromRequestParts, http::header, http::request::Parts};

/// Bearer token from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Missing authorization header"))?;

        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .ok_or_else(|| {
                AppError::unauthorized("Invalid authorization format. Expected 'Bearer <token>'")
            })?;

        if token.is_empty() {
            return Err(AppError::unauthorized("Empty bearer token"));
        }

        Ok(Self(token.to_string()))
    }
}

/// Authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct SessionUser(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for SessionUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;

        match state.sessions.resolve(&token).await {
            Ok(Some(principal)) => Ok(Self(principal)),
            Ok(None) => Err(AppError::unauthorized("Session invalid or expired")),
            Err(e) => Err(AppError::unavailable("IDENTITY_UNAVAILABLE", e.to_string())),
        }
    }
}

/// Authenticated staff member. 403 for anyone else.
#[derive(Debug, Clone, Copy)]
pub struct RequireStaff(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for RequireStaff {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let SessionUser(principal) = SessionUser::from_request_parts(parts, state).await?;
        if !principal.is_staff() {
            tracing::warn!(user_id = %principal.user_id, path = parts.uri.path(), "Staff-only route refused");
            return Err(AppError::forbidden("Staff only"));
        }
        Ok(Self(principal))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    async fn bearer(value: Option<&str>) -> Result<BearerToken, AppError> {
        let mut builder = Request::builder().uri("/api/tickets");
        if let Some(value) = value {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        BearerToken::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_bearer_token_parsing() {
        assert_eq!(bearer(Some("Bearer abc123")).await.unwrap().0, "abc123");

        for bad in [None, Some("Basic dXNlcjpwYXNz"), Some("Bearer "), Some("bearer abc")] {
            let err = bearer(bad).await.unwrap_err();
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED, "{bad:?}");
        }
    }
}
