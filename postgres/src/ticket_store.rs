//! `PostgreSQL` implementation of [`TicketStore`].
//!
//! - Batches are written in one transaction that first claims the idempotency
//!   key in `mint_batches` with `INSERT ... ON CONFLICT DO NOTHING`. Concurrent
//!   requests for the same key serialize on the key's primary-key index; the
//!   loser finds the committed batch and replays it.
//! - Redemption and revocation are single conditional `UPDATE ... WHERE state =
//!   'unredeemed' AND valid_until >= $now RETURNING ...` statements. Whoever's
//!   update matches the row wins; everyone else matches zero rows.
//! - A unique violation on `tickets_redemption_code_key` aborts the transaction
//!   and surfaces as [`StoreError::CodeCollision`].

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use turnstile_core::code::RedemptionCode;
use turnstile_core::store::{
    BatchWrite, MintBatch, ScanRecord, StoreError, StoreFuture, StoredBatch, TicketStore,
    TransitionOutcome,
};
use turnstile_core::types::{
    EventId, IdempotencyKey, Money, ScannerId, Ticket, TicketId, TicketState, TicketTypeId, UserId,
};
use uuid::Uuid;

const CODE_UNIQUE_CONSTRAINT: &str = "tickets_redemption_code_key";

macro_rules! ticket_columns {
    () => {
        "id, event_id, ticket_type_id, owner_user_id, quantity, price_cents, redemption_code, \
         state, issued_at, valid_until, redeemed_at, redeemed_by, revoked_at, revocation_reason, \
         batch_key"
    };
}

#[derive(Debug, FromRow)]
struct TicketRow {
    id: Uuid,
    event_id: Uuid,
    ticket_type_id: Uuid,
    owner_user_id: Uuid,
    quantity: i32,
    price_cents: i64,
    redemption_code: String,
    state: String,
    issued_at: DateTime<Utc>,
    valid_until: DateTime<Utc>,
    redeemed_at: Option<DateTime<Utc>>,
    redeemed_by: Option<String>,
    revoked_at: Option<DateTime<Utc>>,
    revocation_reason: Option<String>,
    batch_key: String,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| StoreError::Serialization(format!("ticket {}: invalid {what}", row.id));

        Ok(Self {
            id: TicketId::from_uuid(row.id),
            event_id: EventId::from_uuid(row.event_id),
            ticket_type_id: TicketTypeId::from_uuid(row.ticket_type_id),
            owner_user_id: UserId::from_uuid(row.owner_user_id),
            quantity: u32::try_from(row.quantity).map_err(|_| corrupt("quantity"))?,
            price: Money::from_cents(u64::try_from(row.price_cents).map_err(|_| corrupt("price"))?),
            redemption_code: RedemptionCode::parse(&row.redemption_code)
                .map_err(|_| corrupt("redemption code"))?,
            state: TicketState::parse(&row.state).ok_or_else(|| corrupt("state"))?,
            issued_at: row.issued_at,
            valid_until: row.valid_until,
            redeemed_at: row.redeemed_at,
            redeemed_by: row.redeemed_by.map(ScannerId::new),
            revoked_at: row.revoked_at,
            revocation_reason: row.revocation_reason,
            batch_key: row.batch_key,
        })
    }
}

fn into_tickets(rows: Vec<TicketRow>) -> Result<Vec<Ticket>, StoreError> {
    rows.into_iter().map(Ticket::try_from).collect()
}

/// Map a sqlx error onto the store taxonomy.
fn classify(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => StoreError::Serialization(err.to_string()),
        other => StoreError::Database(other.to_string()),
    }
}

fn is_code_collision(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.constraint())
        .is_some_and(|c| c == CODE_UNIQUE_CONSTRAINT)
}

/// `PostgreSQL`-backed ticket store.
///
/// # Example
///
/// ```no_run
/// use turnstile_postgres::PostgresTicketStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresTicketStore::connect("postgres://localhost/turnstile", 10).await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))
    }

    async fn load_batch(&self, key: &str) -> Result<Option<StoredBatch>, StoreError> {
        let fingerprint: Option<(String,)> =
            sqlx::query_as("SELECT fingerprint FROM mint_batches WHERE idempotency_key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(classify)?;

        let Some((fingerprint,)) = fingerprint else {
            return Ok(None);
        };

        let rows: Vec<TicketRow> = sqlx::query_as(concat!(
            "SELECT ",
            ticket_columns!(),
            " FROM tickets WHERE batch_key = $1 ORDER BY batch_position"
        ))
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        Ok(Some(StoredBatch {
            fingerprint,
            tickets: into_tickets(rows)?,
        }))
    }

    async fn fetch(&self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        let row: Option<TicketRow> =
            sqlx::query_as(concat!("SELECT ", ticket_columns!(), " FROM tickets WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(classify)?;
        row.map(Ticket::try_from).transpose()
    }

    async fn write_batch(&self, batch: MintBatch) -> Result<BatchWrite, StoreError> {
        let key = batch.key.as_str();
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let claimed = sqlx::query(
            r"
            INSERT INTO mint_batches (idempotency_key, fingerprint)
            VALUES ($1, $2)
            ON CONFLICT (idempotency_key) DO NOTHING
            ",
        )
        .bind(key)
        .bind(&batch.fingerprint)
        .execute(&mut *tx)
        .await
        .map_err(classify)?
        .rows_affected();

        if claimed == 0 {
            drop(tx);
            return match self.load_batch(key).await? {
                Some(existing) if existing.fingerprint == batch.fingerprint => {
                    tracing::debug!(key, "Mint batch already committed, replaying");
                    Ok(BatchWrite::Replayed(existing.tickets))
                }
                Some(_) => Err(StoreError::IdempotencyKeyReused {
                    key: key.to_string(),
                }),
                None => Err(StoreError::Database(format!(
                    "mint batch {key} claimed but not readable"
                ))),
            };
        }

        for (position, ticket) in batch.tickets.iter().enumerate() {
            let quantity = i32::try_from(ticket.quantity)
                .map_err(|_| StoreError::Serialization("quantity out of range".to_string()))?;
            let price = i64::try_from(ticket.price.cents())
                .map_err(|_| StoreError::Serialization("price out of range".to_string()))?;
            let position = i32::try_from(position)
                .map_err(|_| StoreError::Serialization("batch too large".to_string()))?;

            let inserted = sqlx::query(
                r"
                INSERT INTO tickets (
                    id, event_id, ticket_type_id, owner_user_id, quantity, price_cents,
                    redemption_code, state, issued_at, valid_until, batch_key, batch_position
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ",
            )
            .bind(ticket.id.as_uuid())
            .bind(ticket.event_id.as_uuid())
            .bind(ticket.ticket_type_id.as_uuid())
            .bind(ticket.owner_user_id.as_uuid())
            .bind(quantity)
            .bind(price)
            .bind(ticket.redemption_code.as_str())
            .bind(ticket.state.as_str())
            .bind(ticket.issued_at)
            .bind(ticket.valid_until)
            .bind(key)
            .bind(position)
            .execute(&mut *tx)
            .await;

            if let Err(e) = inserted {
                return Err(if is_code_collision(&e) {
                    StoreError::CodeCollision {
                        key: key.to_string(),
                    }
                } else {
                    classify(e)
                });
            }
        }

        tx.commit().await.map_err(classify)?;
        Ok(BatchWrite::Created(batch.tickets))
    }

    async fn conditional_update(
        &self,
        id: TicketId,
        update: &'static str,
        now: DateTime<Utc>,
        stamp: &str,
    ) -> Result<TransitionOutcome, StoreError> {
        let row: Option<TicketRow> = sqlx::query_as(update)
            .bind(id.as_uuid())
            .bind(now)
            .bind(stamp)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        match row {
            Some(row) => Ok(TransitionOutcome::Applied(row.try_into()?)),
            None => Ok(self
                .fetch(id)
                .await?
                .map_or(TransitionOutcome::NotFound, TransitionOutcome::Rejected)),
        }
    }
}

const REDEEM: &str = concat!(
    "UPDATE tickets SET state = 'redeemed', redeemed_at = $2, redeemed_by = $3 \
     WHERE id = $1 AND state = 'unredeemed' AND valid_until >= $2 RETURNING ",
    ticket_columns!()
);

const REVOKE: &str = concat!(
    "UPDATE tickets SET state = 'revoked', revoked_at = $2, revocation_reason = $3 \
     WHERE id = $1 AND state = 'unredeemed' AND valid_until >= $2 RETURNING ",
    ticket_columns!()
);

impl TicketStore for PostgresTicketStore {
    fn create_batch(&self, batch: MintBatch) -> StoreFuture<'_, BatchWrite> {
        Box::pin(self.write_batch(batch))
    }

    fn get_batch(&self, key: IdempotencyKey) -> StoreFuture<'_, Option<StoredBatch>> {
        Box::pin(async move { self.load_batch(key.as_str()).await })
    }

    fn get(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(self.fetch(id))
    }

    fn get_by_redemption_code(&self, code: RedemptionCode) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let row: Option<TicketRow> = sqlx::query_as(concat!(
                "SELECT ",
                ticket_columns!(),
                " FROM tickets WHERE redemption_code = $1"
            ))
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
            row.map(Ticket::try_from).transpose()
        })
    }

    fn transition_to_redeemed(
        &self,
        id: TicketId,
        redeemer: ScannerId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, TransitionOutcome> {
        Box::pin(async move {
            self.conditional_update(id, REDEEM, now, redeemer.as_str())
                .await
        })
    }

    fn revoke(
        &self,
        id: TicketId,
        reason: String,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, TransitionOutcome> {
        Box::pin(async move {
            let outcome = self.conditional_update(id, REVOKE, now, &reason).await?;
            if matches!(outcome, TransitionOutcome::Applied(_)) {
                tracing::info!(ticket_id = %id, reason = %reason, "Ticket revoked");
            }
            Ok(outcome)
        })
    }

    fn list_for_owner(&self, owner: UserId) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let rows: Vec<TicketRow> = sqlx::query_as(concat!(
                "SELECT ",
                ticket_columns!(),
                " FROM tickets WHERE owner_user_id = $1 \
                 ORDER BY issued_at, batch_key, batch_position"
            ))
            .bind(owner.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
            into_tickets(rows)
        })
    }

    fn record_scan(&self, record: ScanRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO scan_attempts (
                    scanner, presented_code, ticket_id, expected_event_id, outcome, scanned_at
                ) VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(record.scanner.as_str())
            .bind(&record.presented_code)
            .bind(record.ticket_id.map(|id| *id.as_uuid()))
            .bind(record.expected_event_id.as_uuid())
            .bind(record.outcome.as_str())
            .bind(record.scanned_at)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
            Ok(())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(())
        })
    }
}
