//! Bearer token to [`Principal`] resolution.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use turnstile_core::types::UserId;

/// What an authenticated caller is allowed to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Ticket buyer; sees and buys only their own tickets
    Holder,
    /// Venue or box office staff; scans, revokes, mints on behalf of buyers
    Staff,
}

/// An authenticated caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Account id
    pub user_id: UserId,
    /// Role
    pub role: Role,
}

impl Principal {
    /// A ticket buyer
    #[must_use]
    pub const fn holder(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Holder,
        }
    }

    /// A staff member
    #[must_use]
    pub const fn staff(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Staff,
        }
    }

    /// Whether this principal has the staff role
    #[must_use]
    pub const fn is_staff(&self) -> bool {
        matches!(self.role, Role::Staff)
    }

    /// Whether this principal may read or buy tickets owned by `owner`.
    #[must_use]
    pub fn may_act_for(&self, owner: UserId) -> bool {
        self.is_staff() || self.user_id == owner
    }
}

/// Session lookup failure.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The identity service could not be reached or answered unexpectedly.
    #[error("Identity service unavailable: {0}")]
    Unavailable(String),
}

/// Future returned by [`SessionResolver::resolve`].
pub type SessionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<Principal>, SessionError>> + Send + 'a>>;

/// Resolves bearer tokens to principals.
pub trait SessionResolver: Send + Sync {
    /// The principal behind `token`, or `None` if the token is unknown or expired.
    ///
    /// # Errors
    ///
    /// [`SessionError::Unavailable`] when the answer is unknown.
    fn resolve<'a>(&'a self, token: &'a str) -> SessionFuture<'a>;
}

/// Resolves sessions through the identity service.
///
/// `GET {base}/sessions/current` with the caller's bearer token answers with
/// a [`Principal`]; 401, 403 and 404 mean the token is not a live session.
#[derive(Debug, Clone)]
pub struct HttpSessionResolver {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSessionResolver {
    /// Resolver for the identity service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, token: &str) -> Result<Option<Principal>, SessionError> {
        let unavailable = |e: reqwest::Error| SessionError::Unavailable(e.to_string());

        let response = self
            .client
            .get(format!("{}/sessions/current", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(unavailable)?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response.json().await.map(Some).map_err(unavailable),
            status => Err(SessionError::Unavailable(format!(
                "identity service answered {status}"
            ))),
        }
    }
}

impl SessionResolver for HttpSessionResolver {
    fn resolve<'a>(&'a self, token: &'a str) -> SessionFuture<'a> {
        Box::pin(self.fetch(token))
    }
}

/// Fixed token table for local development and tests.
#[derive(Debug, Default)]
pub struct StaticSessionResolver {
    tokens: RwLock<HashMap<String, Principal>>,
}

impl StaticSessionResolver {
    /// Empty table; every token is rejected
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as `principal`.
    pub fn insert(&self, token: impl Into<String>, principal: Principal) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.into(), principal);
    }

    /// Stop accepting `token`.
    pub fn remove(&self, token: &str) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
    }
}

impl SessionResolver for StaticSessionResolver {
    fn resolve<'a>(&'a self, token: &'a str) -> SessionFuture<'a> {
        let principal = self
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .copied();
        Box::pin(async move { Ok(principal) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_holder_acts_only_for_self() {
        let (me, other) = (UserId::new(), UserId::new());
        assert!(Principal::holder(me).may_act_for(me));
        assert!(!Principal::holder(me).may_act_for(other));
        assert!(Principal::staff(me).may_act_for(other));
    }

    #[tokio::test]
    async fn test_static_tokens() {
        let sessions = StaticSessionResolver::new();
        let user = Principal::holder(UserId::new());
        sessions.insert("tok-1", user);

        assert_eq!(sessions.resolve("tok-1").await.unwrap(), Some(user));
        assert_eq!(sessions.resolve("tok-2").await.unwrap(), None);

        sessions.remove("tok-1");
        assert_eq!(sessions.resolve("tok-1").await.unwrap(), None);
    }

    #[test]
    fn test_principal_wire_format() {
        let json = serde_json::to_value(Principal::staff(UserId::new())).unwrap();
        assert_eq!(json["role"], "staff");
    }
}
