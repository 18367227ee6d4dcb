//! Ticket reads and revocation.
//!
//! Tickets are returned with their *effective* state: an unredeemed ticket
//! past `valid_until` is reported as `expired` even though nothing has
//! rewritten the stored row.
//!
//! A redemption code admits whoever presents it, so it is only included when
//! the caller owns the ticket. Staff see everything else.

use crate::auth::{Principal, RequireStaff, SessionUser};
use crate::error::AppError;
use crate::server::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use turnstile_core::code::RedemptionCode;
use turnstile_core::store::TransitionOutcome;
use turnstile_core::types::{
    EventId, Money, ScannerId, Ticket, TicketId, TicketState, TicketTypeId, UserId,
};

/// A ticket as shown to one caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketView {
    /// Ticket identifier
    pub id: TicketId,
    /// Event
    pub event_id: EventId,
    /// Ticket type
    pub ticket_type_id: TicketTypeId,
    /// Purchaser
    pub owner_user_id: UserId,
    /// Admissions
    pub quantity: u32,
    /// Unit price at mint time
    pub price: Money,
    /// QR payload; owner only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redemption_code: Option<RedemptionCode>,
    /// Effective state
    pub state: TicketState,
    /// Mint time
    pub issued_at: DateTime<Utc>,
    /// End of validity
    pub valid_until: DateTime<Utc>,
    /// Redemption time
    pub redeemed_at: Option<DateTime<Utc>>,
    /// Redeeming scanner
    pub redeemed_by: Option<ScannerId>,
    /// Revocation time
    pub revoked_at: Option<DateTime<Utc>>,
    /// Revocation reason
    pub revocation_reason: Option<String>,
    /// Mint batch key
    pub batch_key: String,
}

impl TicketView {
    /// Render `ticket` for `viewer` at `now`.
    #[must_use]
    pub fn new(ticket: Ticket, viewer: &Principal, now: DateTime<Utc>) -> Self {
        let state = ticket.effective_state(now);
        let redemption_code =
            (viewer.user_id == ticket.owner_user_id).then_some(ticket.redemption_code);
        Self {
            id: ticket.id,
            event_id: ticket.event_id,
            ticket_type_id: ticket.ticket_type_id,
            owner_user_id: ticket.owner_user_id,
            quantity: ticket.quantity,
            price: ticket.price,
            redemption_code,
            state,
            issued_at: ticket.issued_at,
            valid_until: ticket.valid_until,
            redeemed_at: ticket.redeemed_at,
            redeemed_by: ticket.redeemed_by,
            revoked_at: ticket.revoked_at,
            revocation_reason: ticket.revocation_reason,
            batch_key: ticket.batch_key,
        }
    }
}

/// `GET /api/tickets/:id`
///
/// # Errors
///
/// 404 if no such ticket, or if it belongs to someone else and the caller
/// is not staff.
pub async fn get_ticket(
    State(state): State<AppState>,
    SessionUser(viewer): SessionUser,
    Path(id): Path<TicketId>,
) -> Result<Json<TicketView>, AppError> {
    let ticket = state
        .store
        .get(id)
        .await?
        .filter(|t| viewer.may_act_for(t.owner_user_id))
        .ok_or_else(|| AppError::not_found("Ticket", id))?;
    Ok(Json(TicketView::new(ticket, &viewer, state.clock.now())))
}

/// `GET /api/users/:id/tickets`
///
/// # Errors
///
/// 403 unless the caller is that user or staff; otherwise store failures
/// only, and an owner with no tickets gets an empty list.
pub async fn list_user_tickets(
    State(state): State<AppState>,
    SessionUser(viewer): SessionUser,
    Path(owner): Path<UserId>,
) -> Result<Json<Vec<TicketView>>, AppError> {
    if !viewer.may_act_for(owner) {
        return Err(AppError::forbidden("Tickets belong to another user"));
    }

    let now = state.clock.now();
    let tickets = state
        .store
        .list_for_owner(owner)
        .await?
        .into_iter()
        .map(|t| TicketView::new(t, &viewer, now))
        .collect();
    Ok(Json(tickets))
}

/// Revocation request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeRequest {
    /// Why the ticket is void (refund, chargeback, ...)
    pub reason: String,
}

/// `POST /api/tickets/:id/revoke` (staff)
///
/// Only an unredeemed, unexpired ticket can be revoked.
///
/// # Errors
///
/// 400 for an empty reason, 404 if no such ticket, 409 if the ticket is
/// already redeemed, revoked or expired.
pub async fn revoke_ticket(
    State(state): State<AppState>,
    RequireStaff(staff): RequireStaff,
    Path(id): Path<TicketId>,
    Json(request): Json<RevokeRequest>,
) -> Result<Json<TicketView>, AppError> {
    let reason = request.reason.trim();
    if reason.is_empty() {
        return Err(AppError::bad_request("reason must not be empty"));
    }

    let now = state.clock.now();
    match state.store.revoke(id, reason.to_string(), now).await? {
        TransitionOutcome::Applied(ticket) => {
            tracing::info!(ticket_id = %id, staff = %staff.user_id, reason, "Ticket revoked");
            Ok(Json(TicketView::new(ticket, &staff, now)))
        }
        TransitionOutcome::Rejected(ticket) => {
            let current = ticket.effective_state(now);
            tracing::warn!(ticket_id = %id, state = current.as_str(), "Revocation refused");
            Err(AppError::conflict(
                "NOT_REVOCABLE",
                format!("Ticket {id} is {} and cannot be revoked", current.as_str()),
            ))
        }
        TransitionOutcome::NotFound => Err(AppError::not_found("Ticket", id)),
    }
}
