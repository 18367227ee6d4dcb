//! In-memory [`TicketStore`].
//!
//! All state sits behind one `std::sync::Mutex`; every operation, including
//! the conditional redemption write, completes under a single lock
//! acquisition, so concurrent callers observe the same all-or-nothing and
//! compare-and-set behavior as the Postgres store.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use turnstile_core::code::RedemptionCode;
use turnstile_core::store::{
    BatchWrite, MintBatch, ScanRecord, StoreError, StoreFuture, StoredBatch, TicketStore,
    TransitionOutcome,
};
use turnstile_core::types::{IdempotencyKey, ScannerId, Ticket, TicketId, TicketState, UserId};

#[derive(Debug, Default)]
struct Inner {
    tickets: HashMap<TicketId, (u64, Ticket)>,
    by_code: HashMap<RedemptionCode, TicketId>,
    batches: HashMap<IdempotencyKey, (String, Vec<TicketId>)>,
    scans: Vec<ScanRecord>,
    next_seq: u64,
    unavailable: bool,
    failing_batch_writes: usize,
}

impl Inner {
    fn batch_tickets(&self, ids: &[TicketId]) -> Vec<Ticket> {
        ids.iter()
            .filter_map(|id| self.tickets.get(id).map(|(_, t)| t.clone()))
            .collect()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            Err(StoreError::Unavailable("in-memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

/// In-memory ticket store for tests. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTicketStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryTicketStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every operation fail with [`StoreError::Unavailable`] (or stop doing so).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Fail the next `n` batch writes after staging, leaving nothing written.
    pub fn fail_next_batch_writes(&self, n: usize) {
        self.lock().failing_batch_writes = n;
    }

    /// Number of tickets stored
    #[must_use]
    pub fn ticket_count(&self) -> usize {
        self.lock().tickets.len()
    }

    /// The scan audit log, oldest first
    #[must_use]
    pub fn scans(&self) -> Vec<ScanRecord> {
        self.lock().scans.clone()
    }

    /// Insert or overwrite a ticket directly, bypassing minting.
    pub fn insert(&self, ticket: Ticket) {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.by_code.insert(ticket.redemption_code.clone(), ticket.id);
        inner.tickets.insert(ticket.id, (seq, ticket));
    }

    fn create(inner: &mut Inner, batch: MintBatch) -> Result<BatchWrite, StoreError> {
        inner.check_available()?;

        if let Some((fingerprint, ids)) = inner.batches.get(&batch.key) {
            return if *fingerprint == batch.fingerprint {
                Ok(BatchWrite::Replayed(inner.batch_tickets(ids)))
            } else {
                Err(StoreError::IdempotencyKeyReused {
                    key: batch.key.to_string(),
                })
            };
        }

        let mut seen = HashSet::new();
        for ticket in &batch.tickets {
            if inner.by_code.contains_key(&ticket.redemption_code)
                || !seen.insert(&ticket.redemption_code)
            {
                return Err(StoreError::CodeCollision {
                    key: batch.key.to_string(),
                });
            }
        }

        if inner.failing_batch_writes > 0 {
            inner.failing_batch_writes -= 1;
            return Err(StoreError::Unavailable(
                "injected failure before batch commit".to_string(),
            ));
        }

        let ids: Vec<TicketId> = batch.tickets.iter().map(|t| t.id).collect();
        for ticket in &batch.tickets {
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.by_code.insert(ticket.redemption_code.clone(), ticket.id);
            inner.tickets.insert(ticket.id, (seq, ticket.clone()));
        }
        inner.batches.insert(batch.key, (batch.fingerprint, ids));
        Ok(BatchWrite::Created(batch.tickets))
    }

    fn transition(
        inner: &mut Inner,
        id: TicketId,
        now: DateTime<Utc>,
        apply: impl FnOnce(&mut Ticket),
    ) -> Result<TransitionOutcome, StoreError> {
        inner.check_available()?;
        let Some((_, ticket)) = inner.tickets.get_mut(&id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if ticket.state == TicketState::Unredeemed && now <= ticket.valid_until {
            apply(ticket);
            Ok(TransitionOutcome::Applied(ticket.clone()))
        } else {
            Ok(TransitionOutcome::Rejected(ticket.clone()))
        }
    }
}

impl TicketStore for InMemoryTicketStore {
    fn create_batch(&self, batch: MintBatch) -> StoreFuture<'_, BatchWrite> {
        let result = Self::create(&mut self.lock(), batch);
        Box::pin(async move { result })
    }

    fn get_batch(&self, key: IdempotencyKey) -> StoreFuture<'_, Option<StoredBatch>> {
        let inner = self.lock();
        let result = inner.check_available().map(|()| {
            inner.batches.get(&key).map(|(fingerprint, ids)| StoredBatch {
                fingerprint: fingerprint.clone(),
                tickets: inner.batch_tickets(ids),
            })
        });
        drop(inner);
        Box::pin(async move { result })
    }

    fn get(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        let inner = self.lock();
        let result = inner
            .check_available()
            .map(|()| inner.tickets.get(&id).map(|(_, t)| t.clone()));
        drop(inner);
        Box::pin(async move { result })
    }

    fn get_by_redemption_code(&self, code: RedemptionCode) -> StoreFuture<'_, Option<Ticket>> {
        let inner = self.lock();
        let result = inner.check_available().map(|()| {
            inner
                .by_code
                .get(&code)
                .and_then(|id| inner.tickets.get(id))
                .map(|(_, t)| t.clone())
        });
        drop(inner);
        Box::pin(async move { result })
    }

    fn transition_to_redeemed(
        &self,
        id: TicketId,
        redeemer: ScannerId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, TransitionOutcome> {
        let result = Self::transition(&mut self.lock(), id, now, |ticket| {
            ticket.state = TicketState::Redeemed;
            ticket.redeemed_at = Some(now);
            ticket.redeemed_by = Some(redeemer);
        });
        Box::pin(async move { result })
    }

    fn revoke(
        &self,
        id: TicketId,
        reason: String,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, TransitionOutcome> {
        let result = Self::transition(&mut self.lock(), id, now, |ticket| {
            ticket.state = TicketState::Revoked;
            ticket.revoked_at = Some(now);
            ticket.revocation_reason = Some(reason);
        });
        Box::pin(async move { result })
    }

    fn list_for_owner(&self, owner: UserId) -> StoreFuture<'_, Vec<Ticket>> {
        let inner = self.lock();
        let result = inner.check_available().map(|()| {
            let mut owned: Vec<&(u64, Ticket)> = inner
                .tickets
                .values()
                .filter(|(_, t)| t.owner_user_id == owner)
                .collect();
            owned.sort_by_key(|(seq, _)| *seq);
            owned.into_iter().map(|(_, t)| t.clone()).collect()
        });
        drop(inner);
        Box::pin(async move { result })
    }

    fn record_scan(&self, record: ScanRecord) -> StoreFuture<'_, ()> {
        let mut inner = self.lock();
        let result = inner.check_available().map(|()| inner.scans.push(record));
        drop(inner);
        Box::pin(async move { result })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        let result = self.lock().check_available();
        Box::pin(async move { result })
    }
}
