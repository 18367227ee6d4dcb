//! `POST /api/mints`

use super::idempotency::IdempotencyHeader;
use crate::auth::SessionUser;
use crate::error::AppError;
use crate::server::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use turnstile_core::minter::{MintRequest, MintResult};
use turnstile_core::types::Ticket;

/// Minted (or replayed) tickets, in line-item order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintResponse {
    /// One ticket per line item
    pub tickets: Vec<Ticket>,
    /// `true` when answered from an earlier request with the same key
    pub replayed: bool,
}

impl From<MintResult> for MintResponse {
    fn from(result: MintResult) -> Self {
        let replayed = result.is_replay();
        Self {
            tickets: result.into_tickets(),
            replayed,
        }
    }
}

/// Mint one ticket per line item.
///
/// 201 when this request created the batch, 200 when it replayed an earlier
/// one with the same key and body.
///
/// Buyers mint for themselves; staff may mint on a buyer's behalf.
///
/// # Errors
///
/// 403 when minting for another user without the staff role. Validation and
/// catalog rejections are 4xx; transient failures (including redemption
/// code collisions) are 503 and safe to retry with the same key.
pub async fn create_mint(
    State(state): State<AppState>,
    SessionUser(caller): SessionUser,
    IdempotencyHeader(key): IdempotencyHeader,
    Json(request): Json<MintRequest>,
) -> Result<(StatusCode, Json<MintResponse>), AppError> {
    if !caller.may_act_for(request.owner) {
        tracing::warn!(caller = %caller.user_id, owner = %request.owner, "Mint for another user refused");
        return Err(AppError::forbidden("Cannot buy tickets for another user"));
    }

    let result = state.minter.mint(&key, &request).await?;
    let status = if result.is_replay() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(result.into())))
}
