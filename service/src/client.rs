//! [`MintClient`] that calls a remote Turnstile service.
//!
//! Status and error codes from `POST /api/mints` are mapped back onto
//! [`MintError`] so the checkout orchestrator's retry decision works the same
//! as with an in-process minter: transport failures and 5xx responses are
//! retryable, 4xx responses are definitive.

use crate::api::{IDEMPOTENCY_KEY_HEADER, MintResponse};
use crate::error::ErrorBody;
use reqwest::StatusCode;
use std::time::Duration;
use turnstile_core::checkout::MintClient;
use turnstile_core::minter::{MintError, MintRequest, MintResult};
use turnstile_core::types::IdempotencyKey;

/// HTTP mint client.
#[derive(Debug, Clone)]
pub struct HttpMintClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpMintClient {
    /// Client for the service at `base_url`, giving up on any call after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing `reqwest` client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
        }
    }

    /// Authenticate every mint with the user's session token.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

impl MintClient for HttpMintClient {
    async fn mint(&self, key: &IdempotencyKey, request: &MintRequest) -> Result<MintResult, MintError> {
        let mut builder = self
            .client
            .post(format!("{}/api/mints", self.base_url))
            .header(IDEMPOTENCY_KEY_HEADER, key.as_str())
            .json(request);
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| MintError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: MintResponse = response
                .json()
                .await
                .map_err(|e| MintError::Unavailable(format!("unreadable mint response: {e}")))?;
            return Ok(if body.replayed {
                MintResult::Replayed(body.tickets)
            } else {
                MintResult::Created(body.tickets)
            });
        }

        let body = response.json::<ErrorBody>().await.unwrap_or_else(|_| ErrorBody {
            code: status.as_str().to_string(),
            message: status.canonical_reason().unwrap_or("unknown").to_string(),
        });
        Err(remote_error(status, body, key))
    }
}

fn remote_error(status: StatusCode, body: ErrorBody, key: &IdempotencyKey) -> MintError {
    match body.code.as_str() {
        "EMPTY_PURCHASE" => MintError::EmptyPurchase,
        "IDEMPOTENCY_KEY_REUSED" => MintError::IdempotencyKeyReused {
            key: key.to_string(),
        },
        "CODE_COLLISION" => MintError::CodeCollision,
        _ if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT =>
        {
            MintError::Unavailable(format!("[{}] {}", body.code, body.message))
        }
        _ => MintError::Rejected {
            code: body.code,
            message: body.message,
        },
    }
}
