use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rollpilot_autonomy::{ApprovalTicket, RuntimeAutonomyPolicy, TicketStore};
use rollpilot_core::{GoalId, PilotError};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::records::*;
use crate::store::GoalStore;

const AUTONOMY_POLICY_KEY: &str = "autonomy_policy";

/// SQLite-backed store. Safe to share between processes: every
/// read-modify-write runs in a `BEGIN IMMEDIATE` transaction or as a single
/// guarded upsert.
pub struct SqliteGoalStore {
    db: Arc<Mutex<Connection>>,
}

fn db_err(e: rusqlite::Error) -> PilotError {
    PilotError::Store(e.to_string())
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64, collection: &str) -> rollpilot_core::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| PilotError::MalformedRecord {
        collection: collection.into(),
        reason: format!("timestamp {ms} out of range"),
    })
}

fn decode<T: DeserializeOwned>(raw: &str, collection: &str) -> rollpilot_core::Result<T> {
    serde_json::from_str(raw).map_err(|e| PilotError::MalformedRecord {
        collection: collection.into(),
        reason: e.to_string(),
    })
}

/// Decode every payload, logging and skipping rows that do not parse.
fn decode_all<T: DeserializeOwned>(rows: Vec<String>, collection: &str) -> Vec<T> {
    rows.iter()
        .filter_map(|raw| match decode(raw, collection) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(collection, error = %e, "skipping malformed record");
                None
            }
        })
        .collect()
}

impl SqliteGoalStore {
    /// Open or create the goal database at the given path.
    pub fn open(path: &Path) -> rollpilot_core::Result<Self> {
        info!(?path, "opening goal store");

        let conn = Connection::open(path).map_err(db_err)?;

        // WAL for concurrent readers; busy timeout so competing writers queue up
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
        )
        .map_err(db_err)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS goal_queue (
                goal_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                score REAL NOT NULL DEFAULT 0,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS goal_leases (
                goal_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                leased_at INTEGER NOT NULL,
                lease_expires_at INTEGER NOT NULL,
                heartbeat_at INTEGER NOT NULL,
                version INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS goal_checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                goal_id TEXT NOT NULL,
                phase TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS goal_idempotency (
                key TEXT PRIMARY KEY,
                goal_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS goal_dlq (
                goal_id TEXT PRIMARY KEY,
                moved_at INTEGER NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS goal_suppressions (
                signature TEXT PRIMARY KEY,
                suppressed_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS approval_tickets (
                id TEXT PRIMARY KEY,
                tool_name TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_goal_queue_score ON goal_queue(score DESC);
            CREATE INDEX IF NOT EXISTS idx_goal_checkpoints_goal ON goal_checkpoints(goal_id);
            CREATE INDEX IF NOT EXISTS idx_goal_idempotency_expires ON goal_idempotency(expires_at);
            CREATE INDEX IF NOT EXISTS idx_goal_suppressions_expires ON goal_suppressions(expires_at);
            ",
        )
        .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> rollpilot_core::Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Write a raw queue row that bypasses encoding, as a corrupted or
    /// foreign writer would leave behind.
    pub fn inject_malformed_record(&self, goal_id: &str, raw: &str) -> rollpilot_core::Result<()> {
        self.db
            .lock()
            .execute(
                "INSERT OR REPLACE INTO goal_queue (goal_id, status, score, payload) VALUES (?1, 'queued', 0, ?2)",
                params![goal_id, raw],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn read_lease(conn: &Connection, goal_id: GoalId) -> rollpilot_core::Result<Option<GoalLeaseRecord>> {
        let row = conn
            .query_row(
                "SELECT owner_id, leased_at, lease_expires_at, heartbeat_at, version
                 FROM goal_leases WHERE goal_id = ?1",
                params![goal_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;
        row.map(|(owner_id, leased, expires, heartbeat, version)| {
            Ok(GoalLeaseRecord {
                goal_id,
                owner_id,
                leased_at: from_millis(leased, "goal_leases")?,
                lease_expires_at: from_millis(expires, "goal_leases")?,
                heartbeat_at: from_millis(heartbeat, "goal_leases")?,
                version: version.max(0) as u64,
            })
        })
        .transpose()
    }

    fn write_queue_row(conn: &Connection, item: &GoalQueueItem) -> rollpilot_core::Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO goal_queue (goal_id, status, score, payload) VALUES (?1, ?2, ?3, ?4)",
            params![
                item.goal_id.to_string(),
                item.status.as_str(),
                item.score.total,
                serde_json::to_string(item)?,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

impl TicketStore for SqliteGoalStore {
    fn insert_ticket(&self, ticket: &ApprovalTicket) -> rollpilot_core::Result<()> {
        self.db
            .lock()
            .execute(
                "INSERT INTO approval_tickets (id, tool_name, expires_at, payload) VALUES (?1, ?2, ?3, ?4)",
                params![
                    ticket.id,
                    ticket.tool_name,
                    millis(ticket.expires_at),
                    serde_json::to_string(ticket)?,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn take_ticket(&self, id: &str) -> rollpilot_core::Result<Option<ApprovalTicket>> {
        let mut conn = self.db.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        let raw: Option<String> = tx
            .query_row(
                "SELECT payload FROM approval_tickets WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if raw.is_some() {
            tx.execute("DELETE FROM approval_tickets WHERE id = ?1", params![id])
                .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        // A ticket that no longer decodes is still consumed.
        raw.map(|r| decode(&r, "approval_tickets")).transpose()
    }

    fn purge_expired_tickets(&self, now: DateTime<Utc>) -> rollpilot_core::Result<usize> {
        self.db
            .lock()
            .execute(
                "DELETE FROM approval_tickets WHERE expires_at < ?1",
                params![millis(now)],
            )
            .map_err(db_err)
    }
}

impl GoalStore for SqliteGoalStore {
    fn enqueue(&self, item: &GoalQueueItem) -> rollpilot_core::Result<()> {
        Self::write_queue_row(&self.db.lock(), item)
    }

    fn get_queue_item(&self, goal_id: GoalId) -> rollpilot_core::Result<Option<GoalQueueItem>> {
        let raw: Option<String> = self
            .db
            .lock()
            .query_row(
                "SELECT payload FROM goal_queue WHERE goal_id = ?1",
                params![goal_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        raw.map(|r| decode(&r, "goal_queue")).transpose()
    }

    fn update_queue_item(&self, item: &GoalQueueItem) -> rollpilot_core::Result<()> {
        Self::write_queue_row(&self.db.lock(), item)
    }

    fn scan_queue(&self) -> rollpilot_core::Result<QueueScan> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare("SELECT goal_id, payload FROM goal_queue ORDER BY score DESC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let mut scan = QueueScan::default();
        for (goal_id, raw) in rows {
            match serde_json::from_str::<GoalQueueItem>(&raw) {
                Ok(item) => scan.items.push(item),
                Err(e) => scan.malformed.push(MalformedRecord {
                    goal_id,
                    raw,
                    reason: e.to_string(),
                }),
            }
        }
        Ok(scan)
    }

    fn remove_queue_item(&self, goal_id: GoalId) -> rollpilot_core::Result<bool> {
        let n = self
            .db
            .lock()
            .execute(
                "DELETE FROM goal_queue WHERE goal_id = ?1",
                params![goal_id.to_string()],
            )
            .map_err(db_err)?;
        Ok(n > 0)
    }

    fn try_acquire_lease(
        &self,
        goal_id: GoalId,
        owner_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> rollpilot_core::Result<Option<GoalLeaseRecord>> {
        let mut conn = self.db.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        let changed = tx
            .execute(
                "
                INSERT INTO goal_leases (goal_id, owner_id, leased_at, lease_expires_at, heartbeat_at, version)
                VALUES (?1, ?2, ?3, ?4, ?3, 1)
                ON CONFLICT(goal_id) DO UPDATE SET
                    owner_id = excluded.owner_id,
                    leased_at = excluded.leased_at,
                    lease_expires_at = excluded.lease_expires_at,
                    heartbeat_at = excluded.heartbeat_at,
                    version = goal_leases.version + 1
                WHERE goal_leases.lease_expires_at <= excluded.leased_at
                ",
                params![goal_id.to_string(), owner_id, millis(now), millis(now + ttl)],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Ok(None);
        }
        let lease = Self::read_lease(&tx, goal_id)?;
        tx.commit().map_err(db_err)?;
        Ok(lease)
    }

    fn heartbeat_lease(
        &self,
        goal_id: GoalId,
        owner_id: &str,
        version: u64,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> rollpilot_core::Result<Option<GoalLeaseRecord>> {
        let mut conn = self.db.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        let changed = tx
            .execute(
                "UPDATE goal_leases
                 SET heartbeat_at = ?4, lease_expires_at = ?5, version = version + 1
                 WHERE goal_id = ?1 AND owner_id = ?2 AND version = ?3 AND lease_expires_at > ?4",
                params![
                    goal_id.to_string(),
                    owner_id,
                    version as i64,
                    millis(now),
                    millis(now + ttl)
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Ok(None);
        }
        let lease = Self::read_lease(&tx, goal_id)?;
        tx.commit().map_err(db_err)?;
        Ok(lease)
    }

    fn release_lease(&self, goal_id: GoalId, owner_id: &str, now: DateTime<Utc>) -> rollpilot_core::Result<bool> {
        let n = self
            .db
            .lock()
            .execute(
                "UPDATE goal_leases SET lease_expires_at = MIN(lease_expires_at, ?3)
                 WHERE goal_id = ?1 AND owner_id = ?2",
                params![goal_id.to_string(), owner_id, millis(now)],
            )
            .map_err(db_err)?;
        Ok(n > 0)
    }

    fn get_lease(&self, goal_id: GoalId) -> rollpilot_core::Result<Option<GoalLeaseRecord>> {
        Self::read_lease(&self.db.lock(), goal_id)
    }

    fn list_leases(&self) -> rollpilot_core::Result<Vec<GoalLeaseRecord>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare("SELECT goal_id FROM goal_leases ORDER BY heartbeat_at DESC")
            .map_err(db_err)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        let mut leases = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(goal_id) = Uuid::parse_str(&id) else {
                warn!(goal_id = %id, "skipping lease with malformed goal id");
                continue;
            };
            if let Some(lease) = Self::read_lease(&conn, goal_id)? {
                leases.push(lease);
            }
        }
        Ok(leases)
    }

    fn append_checkpoint(&self, checkpoint: &GoalExecutionCheckpoint) -> rollpilot_core::Result<()> {
        self.db
            .lock()
            .execute(
                "INSERT INTO goal_checkpoints (goal_id, phase, timestamp, payload) VALUES (?1, ?2, ?3, ?4)",
                params![
                    checkpoint.goal_id.to_string(),
                    checkpoint.phase.as_str(),
                    millis(checkpoint.timestamp),
                    serde_json::to_string(checkpoint)?,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn list_checkpoints(&self, goal_id: GoalId) -> rollpilot_core::Result<Vec<GoalExecutionCheckpoint>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare("SELECT payload FROM goal_checkpoints WHERE goal_id = ?1 ORDER BY id ASC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![goal_id.to_string()], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(decode_all(rows, "goal_checkpoints"))
    }

    fn recent_checkpoints(&self, limit: usize) -> rollpilot_core::Result<Vec<GoalExecutionCheckpoint>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare("SELECT payload FROM goal_checkpoints ORDER BY id DESC LIMIT ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(decode_all(rows, "goal_checkpoints"))
    }

    fn put_idempotency_if_absent(
        &self,
        record: &GoalIdempotencyRecord,
        now: DateTime<Utc>,
    ) -> rollpilot_core::Result<bool> {
        let changed = self
            .db
            .lock()
            .execute(
                "
                INSERT INTO goal_idempotency (key, goal_id, owner_id, created_at, expires_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(key) DO UPDATE SET
                    goal_id = excluded.goal_id,
                    owner_id = excluded.owner_id,
                    created_at = excluded.created_at,
                    expires_at = excluded.expires_at
                WHERE goal_idempotency.expires_at <= ?6
                ",
                params![
                    record.key,
                    record.goal_id.to_string(),
                    record.owner_id,
                    millis(record.created_at),
                    millis(record.expires_at),
                    millis(now),
                ],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    fn get_idempotency(&self, key: &str) -> rollpilot_core::Result<Option<GoalIdempotencyRecord>> {
        let row = self
            .db
            .lock()
            .query_row(
                "SELECT goal_id, owner_id, created_at, expires_at FROM goal_idempotency WHERE key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;
        row.map(|(goal_id, owner_id, created, expires)| {
            Ok(GoalIdempotencyRecord {
                key: key.to_string(),
                goal_id: Uuid::parse_str(&goal_id).map_err(|e| PilotError::MalformedRecord {
                    collection: "goal_idempotency".into(),
                    reason: e.to_string(),
                })?,
                created_at: from_millis(created, "goal_idempotency")?,
                expires_at: from_millis(expires, "goal_idempotency")?,
                owner_id,
            })
        })
        .transpose()
    }

    fn purge_expired_idempotency(&self, now: DateTime<Utc>) -> rollpilot_core::Result<usize> {
        self.db
            .lock()
            .execute(
                "DELETE FROM goal_idempotency WHERE expires_at <= ?1",
                params![millis(now)],
            )
            .map_err(db_err)
    }

    fn move_to_dlq(&self, item: &GoalDlqItem) -> rollpilot_core::Result<()> {
        let mut conn = self.db.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        tx.execute(
            "INSERT OR REPLACE INTO goal_dlq (goal_id, moved_at, payload) VALUES (?1, ?2, ?3)",
            params![
                item.goal_id.to_string(),
                millis(item.moved_at),
                serde_json::to_string(item)?,
            ],
        )
        .map_err(db_err)?;
        tx.execute(
            "DELETE FROM goal_queue WHERE goal_id = ?1",
            params![item.goal_id.to_string()],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)
    }

    fn get_dlq_item(&self, goal_id: GoalId) -> rollpilot_core::Result<Option<GoalDlqItem>> {
        let raw: Option<String> = self
            .db
            .lock()
            .query_row(
                "SELECT payload FROM goal_dlq WHERE goal_id = ?1",
                params![goal_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        raw.map(|r| decode(&r, "goal_dlq")).transpose()
    }

    fn list_dlq(&self) -> rollpilot_core::Result<Vec<GoalDlqItem>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare("SELECT payload FROM goal_dlq ORDER BY moved_at DESC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(decode_all(rows, "goal_dlq"))
    }

    fn replay_from_dlq(&self, goal_id: GoalId, now: DateTime<Utc>) -> rollpilot_core::Result<ReplayOutcome> {
        let mut conn = self.db.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        let raw: Option<String> = tx
            .query_row(
                "SELECT payload FROM goal_dlq WHERE goal_id = ?1",
                params![goal_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let Some(raw) = raw else {
            return Ok(ReplayOutcome::NotFound);
        };
        if let Some(lease) = Self::read_lease(&tx, goal_id)?.filter(|l| l.is_live(now)) {
            return Ok(ReplayOutcome::LeaseHeld(lease));
        }
        let parked: GoalDlqItem = match decode(&raw, "goal_dlq") {
            Ok(parked) => parked,
            Err(e) => {
                warn!(%goal_id, error = %e, "DLQ record cannot be decoded");
                return Ok(ReplayOutcome::Unrecoverable);
            }
        };
        let Some(mut item) = parked.queue_item else {
            return Ok(ReplayOutcome::Unrecoverable);
        };
        item.attempts = 0;
        item.status = GoalQueueStatus::Queued;
        item.next_attempt_at = None;
        item.last_error = None;

        tx.execute(
            "DELETE FROM goal_dlq WHERE goal_id = ?1",
            params![goal_id.to_string()],
        )
        .map_err(db_err)?;
        Self::write_queue_row(&tx, &item)?;
        tx.commit().map_err(db_err)?;
        Ok(ReplayOutcome::Replayed(item))
    }

    fn record_suppression(&self, record: &GoalSuppressionRecord) -> rollpilot_core::Result<()> {
        self.db
            .lock()
            .execute(
                "INSERT OR REPLACE INTO goal_suppressions (signature, suppressed_at, expires_at, payload)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.signature,
                    millis(record.suppressed_at),
                    millis(record.expires_at),
                    serde_json::to_string(record)?,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn live_suppression(
        &self,
        signature: &str,
        now: DateTime<Utc>,
    ) -> rollpilot_core::Result<Option<GoalSuppressionRecord>> {
        let raw: Option<String> = self
            .db
            .lock()
            .query_row(
                "SELECT payload FROM goal_suppressions WHERE signature = ?1 AND expires_at > ?2",
                params![signature, millis(now)],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        raw.map(|r| decode(&r, "goal_suppressions")).transpose()
    }

    fn list_suppressions(&self, limit: usize) -> rollpilot_core::Result<Vec<GoalSuppressionRecord>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare("SELECT payload FROM goal_suppressions ORDER BY suppressed_at DESC LIMIT ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(decode_all(rows, "goal_suppressions"))
    }

    fn purge_expired_suppressions(&self, now: DateTime<Utc>) -> rollpilot_core::Result<usize> {
        self.db
            .lock()
            .execute(
                "DELETE FROM goal_suppressions WHERE expires_at <= ?1",
                params![millis(now)],
            )
            .map_err(db_err)
    }

    fn load_autonomy_policy(&self) -> rollpilot_core::Result<Option<RuntimeAutonomyPolicy>> {
        let raw: Option<String> = self
            .db
            .lock()
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![AUTONOMY_POLICY_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        raw.map(|r| decode(&r, "settings")).transpose()
    }

    fn save_autonomy_policy(&self, policy: &RuntimeAutonomyPolicy) -> rollpilot_core::Result<()> {
        self.db
            .lock()
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                params![AUTONOMY_POLICY_KEY, serde_json::to_string(policy)?],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn ticket_store(self: Arc<Self>) -> Arc<dyn TicketStore> {
        self
    }
}
