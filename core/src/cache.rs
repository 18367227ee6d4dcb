//! Offline Cache: a bounded, TTL-based device-local mirror of one user's tickets.
//!
//! The cache lets the holder open a ticket (and its QR code) without
//! connectivity. It is never consulted for redemption: the Ticket Store is
//! the only authority. Between a door scan or refund and the next
//! [`OfflineCache::reconcile`], the cached snapshot may still say
//! `unredeemed`; the divergence window is bounded by the reconcile cadence and
//! by the TTL.
//!
//! Entries older than the TTL are hidden from reads immediately and removed
//! physically by [`OfflineCache::purge_stale`]. When the entry count would
//! exceed the configured maximum, the oldest `cached_at` entries go first; a
//! write never evicts its own entries and fails instead when it alone would
//! not fit.
//!
//! A backend may be shared by several users of one device. The cache only
//! reads and changes its owner's entries and writes everyone else's back
//! untouched.
//!
//! Every mutation is persisted through a [`CacheBackend`] before it becomes
//! visible, so a failed write leaves the cache as it was.

use crate::environment::Clock;
use crate::metrics;
use crate::types::{DisplayFields, Ticket, TicketId, TicketState, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Default time after which an entry is stale, in days
pub const DEFAULT_CACHE_TTL_DAYS: i64 = 7;

/// Default maximum number of cached tickets
pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// Offline cache failures.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Reading or writing the backing file failed.
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file could not be encoded or decoded.
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A single write holds more tickets than the cache may keep.
    #[error("Cannot cache {requested} tickets at once (max {max})")]
    CapacityExceeded {
        /// Distinct tickets in the write
        requested: usize,
        /// Configured maximum
        max: usize,
    },

    /// The ticket belongs to someone other than the cache owner.
    #[error("Ticket {ticket_id} is not owned by this device's user")]
    ForeignTicket {
        /// Offending ticket
        ticket_id: TicketId,
    },
}

/// Cache limits.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Age after which an entry is stale
    pub ttl: Duration,
    /// Maximum number of entries
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::days(DEFAULT_CACHE_TTL_DAYS),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// A cached ticket with the fields needed to render it offline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Ticket snapshot
    pub ticket: Ticket,
    /// Denormalized event display fields
    pub display: DisplayFields,
    /// When the snapshot was written or last refreshed
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether the entry is older than `ttl` at `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.cached_at > ttl
    }
}

/// Summary of a [`OfflineCache::reconcile`] pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entries whose ticket snapshot was replaced
    pub refreshed: usize,
    /// Entries evicted because the ticket was revoked
    pub evicted: usize,
    /// Canonical tickets with no cache entry (display fields must be fetched)
    pub missing: Vec<TicketId>,
}

/// Persistence for cache entries.
pub trait CacheBackend: Send + Sync {
    /// Load every persisted entry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the persisted state cannot be read.
    fn load(&self) -> impl Future<Output = Result<Vec<CacheEntry>, CacheError>> + Send;

    /// Replace the persisted state with `entries`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the state cannot be written.
    fn save(&self, entries: Vec<CacheEntry>) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// Process-memory backend. Clones share the same storage.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: Arc<Mutex<Vec<CacheEntry>>>,
}

impl InMemoryCacheBackend {
    /// Create an empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently persisted entries
    #[must_use]
    pub fn persisted(&self) -> Vec<CacheEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CacheBackend for InMemoryCacheBackend {
    async fn load(&self) -> Result<Vec<CacheEntry>, CacheError> {
        Ok(self.persisted())
    }

    async fn save(&self, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        *self.entries.lock().unwrap_or_else(PoisonError::into_inner) = entries;
        Ok(())
    }
}

/// On-device JSON file backend.
///
/// The file holds one JSON object keyed by ticket id. Writes go to a sibling
/// temp file that is then renamed over the original, so a crash mid-write
/// leaves the previous version intact.
#[derive(Clone, Debug)]
pub struct JsonFileCacheBackend {
    path: PathBuf,
}

impl JsonFileCacheBackend {
    /// Back the cache with the file at `path` (created on first save).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the cache file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CacheBackend for JsonFileCacheBackend {
    async fn load(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let keyed: BTreeMap<String, CacheEntry> = serde_json::from_slice(&raw)?;
        Ok(keyed.into_values().collect())
    }

    async fn save(&self, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        let keyed: BTreeMap<String, CacheEntry> = entries
            .into_iter()
            .map(|e| (e.ticket.id.to_string(), e))
            .collect();
        let json = serde_json::to_vec_pretty(&keyed)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// A user's offline ticket wallet.
pub struct OfflineCache<B> {
    backend: B,
    owner: UserId,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entries: tokio::sync::Mutex<HashMap<TicketId, CacheEntry>>,
    others: Vec<CacheEntry>,
}

impl<B: CacheBackend> OfflineCache<B> {
    /// Open the cache for `owner`, loading whatever the backend holds.
    ///
    /// Entries for other owners found in the backend are hidden from this
    /// cache and preserved on every save.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the backend cannot be read.
    pub async fn open(
        backend: B,
        owner: UserId,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        let (own, others): (Vec<CacheEntry>, Vec<CacheEntry>) = backend
            .load()
            .await?
            .into_iter()
            .partition(|e| e.ticket.owner_user_id == owner);

        Ok(Self {
            backend,
            owner,
            config,
            clock,
            entries: tokio::sync::Mutex::new(own.into_iter().map(|e| (e.ticket.id, e)).collect()),
            others,
        })
    }

    /// The user whose tickets this cache mirrors
    #[must_use]
    pub const fn owner(&self) -> UserId {
        self.owner
    }

    /// Insert or replace the entry for `ticket`, stamping `cached_at = now`.
    ///
    /// # Errors
    ///
    /// - [`CacheError::ForeignTicket`] if the ticket is not the owner's
    /// - backend errors; the cache is unchanged in that case
    pub async fn put(&self, ticket: Ticket, display: DisplayFields) -> Result<(), CacheError> {
        self.put_many(vec![(ticket, display)]).await
    }

    /// Insert or replace several entries in one persisted write.
    ///
    /// Older entries make room for the new ones; the new ones are never
    /// evicted by their own write.
    ///
    /// # Errors
    ///
    /// - [`CacheError::ForeignTicket`] if any ticket is not the owner's
    /// - [`CacheError::CapacityExceeded`] if the write alone exceeds `max_entries`
    /// - backend errors
    ///
    /// Nothing is written on any error.
    pub async fn put_many(&self, items: Vec<(Ticket, DisplayFields)>) -> Result<(), CacheError> {
        if let Some((foreign, _)) = items.iter().find(|(t, _)| t.owner_user_id != self.owner) {
            return Err(CacheError::ForeignTicket {
                ticket_id: foreign.id,
            });
        }
        let incoming: HashSet<TicketId> = items.iter().map(|(t, _)| t.id).collect();
        if incoming.len() > self.config.max_entries {
            return Err(CacheError::CapacityExceeded {
                requested: incoming.len(),
                max: self.config.max_entries,
            });
        }

        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        for (ticket, display) in items {
            next.insert(
                ticket.id,
                CacheEntry {
                    ticket,
                    display,
                    cached_at: now,
                },
            );
        }
        let dropped = enforce_capacity(&mut next, self.config.max_entries, &incoming);

        self.persist(&next).await?;
        *entries = next;
        metrics::record_cache_evictions("capacity", dropped);
        Ok(())
    }

    /// Fresh entry for `id`, if any.
    pub async fn get(&self, id: TicketId) -> Option<CacheEntry> {
        let now = self.clock.now();
        self.entries
            .lock()
            .await
            .get(&id)
            .filter(|e| !e.is_stale(now, self.config.ttl))
            .cloned()
    }

    /// Every fresh entry, ordered by event start.
    pub async fn list_for_user(&self) -> Vec<CacheEntry> {
        let now = self.clock.now();
        let mut fresh: Vec<CacheEntry> = self
            .entries
            .lock()
            .await
            .values()
            .filter(|e| !e.is_stale(now, self.config.ttl))
            .cloned()
            .collect();
        fresh.sort_by_key(|e| (e.display.starts_at, e.ticket.issued_at));
        fresh
    }

    /// Remove the entry for `id`. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Backend errors; the cache is unchanged in that case.
    pub async fn evict(&self, id: TicketId) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(&id) {
            return Ok(false);
        }
        let mut next = entries.clone();
        next.remove(&id);
        self.persist(&next).await?;
        *entries = next;
        metrics::record_cache_evictions("manual", 1);
        Ok(true)
    }

    /// Physically remove stale entries. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Backend errors; the cache is unchanged in that case.
    pub async fn purge_stale(&self) -> Result<usize, CacheError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.retain(|_, e| !e.is_stale(now, self.config.ttl));
        let removed = entries.len() - next.len();
        if removed == 0 {
            return Ok(0);
        }
        self.persist(&next).await?;
        *entries = next;
        metrics::record_cache_evictions("stale", removed);
        tracing::debug!(removed, "Purged stale offline cache entries");
        Ok(removed)
    }

    /// Bring cached snapshots in line with the canonical ticket list.
    ///
    /// Revoked tickets are evicted. Other cached tickets get the canonical
    /// snapshot and a fresh `cached_at`; their display fields are kept.
    /// Canonical tickets without an entry are reported in
    /// [`ReconcileReport::missing`].
    ///
    /// # Errors
    ///
    /// Backend errors; the cache is unchanged in that case.
    pub async fn reconcile(&self, canonical: &[Ticket]) -> Result<ReconcileReport, CacheError> {
        let now = self.clock.now();
        let mut report = ReconcileReport::default();
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();

        for ticket in canonical.iter().filter(|t| t.owner_user_id == self.owner) {
            if ticket.effective_state(now) == TicketState::Revoked {
                if next.remove(&ticket.id).is_some() {
                    report.evicted += 1;
                }
                continue;
            }
            match next.get_mut(&ticket.id) {
                Some(entry) => {
                    entry.ticket = ticket.clone();
                    entry.cached_at = now;
                    report.refreshed += 1;
                }
                None => report.missing.push(ticket.id),
            }
        }

        self.persist(&next).await?;
        *entries = next;
        metrics::record_cache_evictions("revoked", report.evicted);
        tracing::debug!(
            refreshed = report.refreshed,
            evicted = report.evicted,
            missing = report.missing.len(),
            "Reconciled offline cache"
        );
        Ok(report)
    }

    async fn persist(&self, entries: &HashMap<TicketId, CacheEntry>) -> Result<(), CacheError> {
        let all = entries.values().chain(&self.others).cloned().collect();
        self.backend.save(all).await
    }
}

/// Drop the oldest entries outside `keep` until at most `max` remain.
/// Returns how many went.
fn enforce_capacity(
    entries: &mut HashMap<TicketId, CacheEntry>,
    max: usize,
    keep: &HashSet<TicketId>,
) -> usize {
    let overflow = entries.len().saturating_sub(max);
    if overflow == 0 {
        return 0;
    }
    let mut by_age: Vec<(DateTime<Utc>, TicketId)> = entries
        .values()
        .filter(|e| !keep.contains(&e.ticket.id))
        .map(|e| (e.cached_at, e.ticket.id))
        .collect();
    by_age.sort();
    for (_, id) in by_age.into_iter().take(overflow) {
        entries.remove(&id);
    }
    overflow
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::code::RedemptionCode;
    use crate::types::{EventId, Money, TicketTypeId};

    struct StepClock(Mutex<DateTime<Utc>>);

    impl StepClock {
        fn advance(&self, by: Duration) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn ticket(owner: UserId, now: DateTime<Utc>) -> Ticket {
        Ticket {
            id: TicketId::new(),
            event_id: EventId::new(),
            ticket_type_id: TicketTypeId::new(),
            owner_user_id: owner,
            quantity: 1,
            price: Money::from_cents(3000),
            redemption_code: RedemptionCode::generate(now),
            state: TicketState::Unredeemed,
            issued_at: now,
            valid_until: now + Duration::days(60),
            redeemed_at: None,
            redeemed_by: None,
            revoked_at: None,
            revocation_reason: None,
            batch_key: "pay_cache".to_string(),
        }
    }

    fn display(now: DateTime<Utc>) -> DisplayFields {
        DisplayFields {
            event_title: "Night Market".to_string(),
            image_url: None,
            venue: "Pier 9".to_string(),
            starts_at: now + Duration::days(10),
        }
    }

    async fn cache(
        owner: UserId,
        config: CacheConfig,
    ) -> (OfflineCache<InMemoryCacheBackend>, Arc<StepClock>, InMemoryCacheBackend) {
        let clock = Arc::new(StepClock(Mutex::new(Utc::now())));
        let backend = InMemoryCacheBackend::new();
        let cache = OfflineCache::open(backend.clone(), owner, config, clock.clone())
            .await
            .unwrap();
        (cache, clock, backend)
    }

    #[tokio::test]
    async fn put_is_an_upsert() {
        let owner = UserId::new();
        let (cache, clock, backend) = cache(owner, CacheConfig::default()).await;
        let mut t = ticket(owner, clock.now());

        cache.put(t.clone(), display(clock.now())).await.unwrap();
        t.state = TicketState::Redeemed;
        cache.put(t.clone(), display(clock.now())).await.unwrap();

        assert_eq!(cache.list_for_user().await.len(), 1);
        assert_eq!(cache.get(t.id).await.unwrap().ticket.state, TicketState::Redeemed);
        assert_eq!(backend.persisted().len(), 1);
    }

    #[tokio::test]
    async fn stale_entries_are_hidden_then_purged() {
        let owner = UserId::new();
        let (cache, clock, backend) = cache(owner, CacheConfig::default()).await;
        let t = ticket(owner, clock.now());
        cache.put(t.clone(), display(clock.now())).await.unwrap();

        clock.advance(Duration::days(DEFAULT_CACHE_TTL_DAYS));
        assert!(cache.get(t.id).await.is_some(), "exactly TTL old is still fresh");

        clock.advance(Duration::seconds(1));
        assert!(cache.get(t.id).await.is_none());
        assert!(cache.list_for_user().await.is_empty());
        assert_eq!(backend.persisted().len(), 1);

        assert_eq!(cache.purge_stale().await.unwrap(), 1);
        assert!(backend.persisted().is_empty());
    }

    #[tokio::test]
    async fn foreign_tickets_are_refused() {
        let owner = UserId::new();
        let (cache, clock, _) = cache(owner, CacheConfig::default()).await;
        let t = ticket(UserId::new(), clock.now());

        let err = cache.put(t.clone(), display(clock.now())).await.unwrap_err();
        assert!(matches!(err, CacheError::ForeignTicket { ticket_id } if ticket_id == t.id));
    }

    #[tokio::test]
    async fn overflow_evicts_oldest_first() {
        let owner = UserId::new();
        let config = CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        };
        let (cache, clock, _) = cache(owner, config).await;

        let first = ticket(owner, clock.now());
        cache.put(first.clone(), display(clock.now())).await.unwrap();
        clock.advance(Duration::minutes(1));
        let second = ticket(owner, clock.now());
        cache.put(second.clone(), display(clock.now())).await.unwrap();
        clock.advance(Duration::minutes(1));
        let third = ticket(owner, clock.now());
        cache.put(third.clone(), display(clock.now())).await.unwrap();

        assert!(cache.get(first.id).await.is_none());
        assert!(cache.get(second.id).await.is_some());
        assert!(cache.get(third.id).await.is_some());
    }

    #[tokio::test]
    async fn a_write_never_evicts_its_own_entries() {
        let owner = UserId::new();
        let config = CacheConfig {
            max_entries: 3,
            ..CacheConfig::default()
        };
        let (cache, clock, backend) = cache(owner, config).await;
        let old = ticket(owner, clock.now());
        cache.put(old.clone(), display(clock.now())).await.unwrap();

        let batch: Vec<Ticket> = (0..3).map(|_| ticket(owner, clock.now())).collect();
        cache
            .put_many(batch.iter().map(|t| (t.clone(), display(clock.now()))).collect())
            .await
            .unwrap();

        assert!(cache.get(old.id).await.is_none());
        for t in &batch {
            assert!(cache.get(t.id).await.is_some());
        }

        let oversized: Vec<Ticket> = (0..4).map(|_| ticket(owner, clock.now())).collect();
        let err = cache
            .put_many(oversized.iter().map(|t| (t.clone(), display(clock.now()))).collect())
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::CapacityExceeded { requested: 4, max: 3 }));
        assert_eq!(cache.list_for_user().await.len(), 3);
        assert_eq!(backend.persisted().len(), 3);
    }

    #[tokio::test]
    async fn other_owners_entries_survive_saves() {
        let (alice, bob) = (UserId::new(), UserId::new());
        let clock = Arc::new(StepClock(Mutex::new(Utc::now())));
        let backend = InMemoryCacheBackend::new();
        let bobs = ticket(bob, clock.now());
        backend
            .save(vec![CacheEntry {
                ticket: bobs.clone(),
                display: display(clock.now()),
                cached_at: clock.now(),
            }])
            .await
            .unwrap();

        let alices_cache =
            OfflineCache::open(backend.clone(), alice, CacheConfig::default(), clock.clone())
                .await
                .unwrap();
        assert!(alices_cache.get(bobs.id).await.is_none());
        alices_cache
            .put(ticket(alice, clock.now()), display(clock.now()))
            .await
            .unwrap();
        assert_eq!(backend.persisted().len(), 2);

        let bobs_cache = OfflineCache::open(backend, bob, CacheConfig::default(), clock)
            .await
            .unwrap();
        assert_eq!(bobs_cache.get(bobs.id).await.unwrap().ticket, bobs);
        assert_eq!(bobs_cache.list_for_user().await.len(), 1);
    }

    #[tokio::test]
    async fn reconcile_refreshes_and_evicts_revoked() {
        let owner = UserId::new();
        let (cache, clock, _) = cache(owner, CacheConfig::default()).await;
        let kept = ticket(owner, clock.now());
        let refunded = ticket(owner, clock.now());
        let uncached = ticket(owner, clock.now());
        cache
            .put_many(vec![
                (kept.clone(), display(clock.now())),
                (refunded.clone(), display(clock.now())),
            ])
            .await
            .unwrap();

        clock.advance(Duration::days(6));
        let mut redeemed = kept.clone();
        redeemed.state = TicketState::Redeemed;
        let mut revoked = refunded.clone();
        revoked.state = TicketState::Revoked;

        let report = cache
            .reconcile(&[redeemed.clone(), revoked, uncached.clone()])
            .await
            .unwrap();

        assert_eq!(report.refreshed, 1);
        assert_eq!(report.evicted, 1);
        assert_eq!(report.missing, vec![uncached.id]);

        let entry = cache.get(kept.id).await.unwrap();
        assert_eq!(entry.ticket.state, TicketState::Redeemed);
        assert_eq!(entry.cached_at, clock.now());
        assert_eq!(entry.display.venue, "Pier 9");
        assert!(cache.get(refunded.id).await.is_none());
    }

    #[tokio::test]
    async fn evict_reports_presence() {
        let owner = UserId::new();
        let (cache, clock, _) = cache(owner, CacheConfig::default()).await;
        let t = ticket(owner, clock.now());
        cache.put(t.clone(), display(clock.now())).await.unwrap();

        assert!(cache.evict(t.id).await.unwrap());
        assert!(!cache.evict(t.id).await.unwrap());
    }

    #[tokio::test]
    async fn json_file_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet").join("tickets.json");
        let owner = UserId::new();
        let clock = Arc::new(StepClock(Mutex::new(Utc::now())));
        let t = ticket(owner, clock.now());

        let cache = OfflineCache::open(
            JsonFileCacheBackend::new(&path),
            owner,
            CacheConfig::default(),
            clock.clone(),
        )
        .await
        .unwrap();
        cache.put(t.clone(), display(clock.now())).await.unwrap();
        drop(cache);

        assert!(path.exists());
        assert!(!path.with_file_name("tickets.json.tmp").exists());

        let reopened = OfflineCache::open(
            JsonFileCacheBackend::new(&path),
            owner,
            CacheConfig::default(),
            clock,
        )
        .await
        .unwrap();
        let entry = reopened.get(t.id).await.unwrap();
        assert_eq!(entry.ticket, t);
    }

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileCacheBackend::new(dir.path().join("absent.json"));
        assert!(backend.load().await.unwrap().is_empty());
    }
}
