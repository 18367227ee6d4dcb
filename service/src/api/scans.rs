//! `POST /api/scans`
//!
//! A rejected scan is a normal 200 response carrying the reason. Only an
//! infrastructure failure produces an error status, so scanner clients can
//! tell "do not admit" apart from "try again".

use crate::auth::RequireStaff;
use crate::error::AppError;
use crate::server::AppState;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use turnstile_core::types::{Admission, EventId, ScannerId};
use turnstile_core::validator::{Rejection, ScanCue, ScanOutcome};

/// Scan submitted by a door scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Code read from the QR payload, verbatim
    pub code: String,
    /// Event this door admits to
    pub event_id: EventId,
    /// Scanner or operator identity
    pub scanner: ScannerId,
}

/// Scan verdict.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ScanResponse {
    /// Admit
    Accepted {
        /// Who and how many
        admission: Admission,
        /// Feedback cue for the scanner
        cue: ScanCue,
    },
    /// Do not admit
    Rejected {
        /// Why (serialized as `reason` plus details)
        #[serde(flatten)]
        rejection: Rejection,
        /// Operator-facing message
        message: &'static str,
        /// Feedback cue for the scanner
        cue: ScanCue,
    },
}

impl From<ScanOutcome> for ScanResponse {
    fn from(outcome: ScanOutcome) -> Self {
        let cue = outcome.cue();
        match outcome {
            ScanOutcome::Accepted(admission) => Self::Accepted { admission, cue },
            ScanOutcome::Rejected(rejection) => Self::Rejected {
                message: rejection.message(),
                rejection,
                cue,
            },
        }
    }
}

/// Validate and, if eligible, redeem a presented code. Staff only.
///
/// # Errors
///
/// 401/403 for a missing or non-staff session, 400 for an empty scanner id;
/// 503/500 only when the store fails.
pub async fn scan_ticket(
    State(state): State<AppState>,
    RequireStaff(_staff): RequireStaff,
    Json(request): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, AppError> {
    if request.scanner.as_str().trim().is_empty() {
        return Err(AppError::bad_request("scanner must not be empty"));
    }

    let outcome = state
        .validator
        .validate(&request.code, request.event_id, &request.scanner)
        .await?;
    Ok(Json(outcome.into()))
}
