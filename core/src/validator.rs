//! Redemption Validator: the state machine behind every door scan.
//!
//! Checks run in a fixed order so the operator always sees the most useful
//! reason:
//!
//! 1. malformed or unknown code → [`Rejection::UnknownCode`]
//! 2. ticket for another event → [`Rejection::WrongEvent`]
//! 3. already redeemed → [`Rejection::AlreadyUsed`] (original time and scanner)
//! 4. past `valid_until` → [`Rejection::Expired`]
//! 5. revoked → [`Rejection::Revoked`]
//! 6. otherwise one atomic conditional write; if another scanner got there
//!    first the loser sees [`Rejection::AlreadyUsed`]
//!
//! Rejections are ordinary results. [`ValidateError`] is reserved for
//! infrastructure failures, so a scanner never confuses "ticket refused" with
//! "system down".

use crate::code::{RedemptionCode, presented_prefix};
use crate::environment::Clock;
use crate::metrics;
use crate::store::{ScanOutcomeKind, ScanRecord, StoreError, TicketStore, TransitionOutcome};
use crate::types::{Admission, EventId, ScannerId, Ticket, TicketId, TicketState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Why a presented ticket was refused.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    /// No ticket carries this code.
    UnknownCode,
    /// The ticket is for a different event.
    WrongEvent {
        /// Event the ticket is actually for
        ticket_event_id: EventId,
    },
    /// The ticket was already redeemed.
    AlreadyUsed {
        /// When it was redeemed
        redeemed_at: Option<DateTime<Utc>>,
        /// Which scanner redeemed it
        redeemed_by: Option<ScannerId>,
    },
    /// The validity horizon has passed.
    Expired {
        /// End of validity
        valid_until: DateTime<Utc>,
    },
    /// The ticket was voided.
    Revoked {
        /// When it was revoked
        revoked_at: Option<DateTime<Utc>>,
    },
}

/// Feedback the scanner gives the door operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanCue {
    /// Green light, admit
    Confirm,
    /// Amber, refuse and redirect (wrong door, stale ticket)
    Warn,
    /// Red, refuse and call a supervisor (possible fraud)
    Alarm,
}

impl Rejection {
    /// Audit and metric classification.
    #[must_use]
    pub const fn kind(&self) -> ScanOutcomeKind {
        match self {
            Self::UnknownCode => ScanOutcomeKind::UnknownCode,
            Self::WrongEvent { .. } => ScanOutcomeKind::WrongEvent,
            Self::AlreadyUsed { .. } => ScanOutcomeKind::AlreadyUsed,
            Self::Expired { .. } => ScanOutcomeKind::Expired,
            Self::Revoked { .. } => ScanOutcomeKind::Revoked,
        }
    }

    /// Message shown to the door operator.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::UnknownCode => "Ticket not recognised",
            Self::WrongEvent { .. } => "Ticket is for a different event",
            Self::AlreadyUsed { .. } => "Ticket has already been used",
            Self::Expired { .. } => "Ticket has expired",
            Self::Revoked { .. } => "Ticket has been cancelled",
        }
    }

    /// Scanner cue.
    #[must_use]
    pub const fn cue(&self) -> ScanCue {
        match self {
            Self::WrongEvent { .. } | Self::Expired { .. } => ScanCue::Warn,
            Self::UnknownCode | Self::AlreadyUsed { .. } | Self::Revoked { .. } => ScanCue::Alarm,
        }
    }
}

/// Result of validating a presented code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The ticket was redeemed by this scan.
    Accepted(Admission),
    /// The ticket was refused.
    Rejected(Rejection),
}

impl ScanOutcome {
    /// Audit and metric classification.
    #[must_use]
    pub const fn kind(&self) -> ScanOutcomeKind {
        match self {
            Self::Accepted(_) => ScanOutcomeKind::Accepted,
            Self::Rejected(r) => r.kind(),
        }
    }

    /// Scanner cue.
    #[must_use]
    pub const fn cue(&self) -> ScanCue {
        match self {
            Self::Accepted(_) => ScanCue::Confirm,
            Self::Rejected(r) => r.cue(),
        }
    }

    /// Whether the holder may enter
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Infrastructure failure during validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidateError {
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The store refused the transition but the ticket looks eligible.
    #[error("Ticket {0} refused redemption while eligible")]
    Inconsistent(TicketId),
}

/// Check steps 2-5 against a ticket snapshot. `None` means eligible.
#[must_use]
pub fn assess(ticket: &Ticket, expected_event_id: EventId, now: DateTime<Utc>) -> Option<Rejection> {
    if ticket.event_id != expected_event_id {
        return Some(Rejection::WrongEvent {
            ticket_event_id: ticket.event_id,
        });
    }
    if ticket.state == TicketState::Redeemed {
        return Some(Rejection::AlreadyUsed {
            redeemed_at: ticket.redeemed_at,
            redeemed_by: ticket.redeemed_by.clone(),
        });
    }
    if ticket.is_expired_at(now) || ticket.state == TicketState::Expired {
        return Some(Rejection::Expired {
            valid_until: ticket.valid_until,
        });
    }
    if ticket.state == TicketState::Revoked {
        return Some(Rejection::Revoked {
            revoked_at: ticket.revoked_at,
        });
    }
    None
}

/// Validates and redeems presented codes.
#[derive(Clone)]
pub struct RedemptionValidator {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
}

impl RedemptionValidator {
    /// Create a validator.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Validate `presented` for `expected_event_id` at the current time.
    ///
    /// # Errors
    ///
    /// Returns [`ValidateError`] only on infrastructure failure.
    pub async fn validate(
        &self,
        presented: &str,
        expected_event_id: EventId,
        scanner: &ScannerId,
    ) -> Result<ScanOutcome, ValidateError> {
        self.validate_at(presented, expected_event_id, self.clock.now(), scanner)
            .await
    }

    /// Validate `presented` for `expected_event_id` at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidateError`] only on infrastructure failure.
    pub async fn validate_at(
        &self,
        presented: &str,
        expected_event_id: EventId,
        now: DateTime<Utc>,
        scanner: &ScannerId,
    ) -> Result<ScanOutcome, ValidateError> {
        let started = Instant::now();
        let (ticket_id, outcome) = self.decide(presented, expected_event_id, now, scanner).await?;

        let kind = outcome.kind();
        match &outcome {
            ScanOutcome::Accepted(admission) => tracing::info!(
                ticket_id = %admission.ticket_id,
                event_id = %expected_event_id,
                scanner = %scanner,
                quantity = admission.quantity,
                "Ticket redeemed"
            ),
            ScanOutcome::Rejected(rejection) => tracing::warn!(
                reason = kind.as_str(),
                code = presented_prefix(presented),
                event_id = %expected_event_id,
                scanner = %scanner,
                "Scan rejected: {}",
                rejection.message()
            ),
        }
        metrics::record_scan(kind, started.elapsed().as_secs_f64());

        let record = ScanRecord {
            scanner: scanner.clone(),
            presented_code: presented.to_string(),
            ticket_id,
            expected_event_id,
            outcome: kind,
            scanned_at: now,
        };
        if let Err(e) = self.store.record_scan(record).await {
            tracing::warn!(error = %e, scanner = %scanner, "Failed to record scan attempt");
        }

        Ok(outcome)
    }

    async fn decide(
        &self,
        presented: &str,
        expected_event_id: EventId,
        now: DateTime<Utc>,
        scanner: &ScannerId,
    ) -> Result<(Option<TicketId>, ScanOutcome), ValidateError> {
        let Ok(code) = RedemptionCode::parse(presented) else {
            return Ok((None, ScanOutcome::Rejected(Rejection::UnknownCode)));
        };

        let Some(ticket) = self.store.get_by_redemption_code(code).await? else {
            return Ok((None, ScanOutcome::Rejected(Rejection::UnknownCode)));
        };

        if let Some(rejection) = assess(&ticket, expected_event_id, now) {
            return Ok((Some(ticket.id), ScanOutcome::Rejected(rejection)));
        }

        match self
            .store
            .transition_to_redeemed(ticket.id, scanner.clone(), now)
            .await
        {
            Err(e) => {
                tracing::error!(error = %e, ticket_id = %ticket.id, "Redemption write failed");
                Err(e.into())
            }
            Ok(TransitionOutcome::Applied(redeemed)) => {
                Ok((Some(redeemed.id), ScanOutcome::Accepted(redeemed.admission())))
            }
            Ok(TransitionOutcome::Rejected(current)) => {
                match assess(&current, expected_event_id, now) {
                    Some(rejection) => Ok((Some(current.id), ScanOutcome::Rejected(rejection))),
                    None => {
                        tracing::error!(ticket_id = %current.id, "Store refused redemption of an eligible ticket");
                        Err(ValidateError::Inconsistent(current.id))
                    }
                }
            }
            Ok(TransitionOutcome::NotFound) => {
                tracing::error!(ticket_id = %ticket.id, "Ticket vanished between lookup and redemption");
                Err(ValidateError::Inconsistent(ticket.id))
            }
        }
    }
}
