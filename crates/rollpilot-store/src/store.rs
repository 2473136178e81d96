use chrono::{DateTime, Duration, Utc};
use rollpilot_autonomy::{RuntimeAutonomyPolicy, TicketStore};
use rollpilot_config::{StoreBackend, StoreConfig};
use rollpilot_core::GoalId;
use std::sync::Arc;
use tracing::info;

use crate::memory::MemoryGoalStore;
use crate::records::*;
use crate::sqlite::SqliteGoalStore;

/// Persistence seam shared by every engine caller.
///
/// Every method is atomic on its own. The compare-and-set style methods
/// (`try_acquire_lease`, `heartbeat_lease`, `put_idempotency_if_absent`,
/// `move_to_dlq`, `replay_from_dlq`, and `TicketStore::take_ticket`) are what
/// keep concurrent callers consistent; callers never read-then-write around them.
pub trait GoalStore: TicketStore + Send + Sync {
    // ── Queue ──────────────────────────────────────────────────

    fn enqueue(&self, item: &GoalQueueItem) -> rollpilot_core::Result<()>;

    fn get_queue_item(&self, goal_id: GoalId) -> rollpilot_core::Result<Option<GoalQueueItem>>;

    /// Insert or overwrite a queue item.
    fn update_queue_item(&self, item: &GoalQueueItem) -> rollpilot_core::Result<()>;

    /// All queue rows, highest score first. Undecodable rows are reported, not dropped.
    fn scan_queue(&self) -> rollpilot_core::Result<QueueScan>;

    fn remove_queue_item(&self, goal_id: GoalId) -> rollpilot_core::Result<bool>;

    // ── Leases ─────────────────────────────────────────────────

    /// Claim `goal_id` for `owner_id` if it has no lease or its lease expired
    /// at or before `now`. Returns the new lease, or `None` if someone holds it.
    fn try_acquire_lease(
        &self,
        goal_id: GoalId,
        owner_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> rollpilot_core::Result<Option<GoalLeaseRecord>>;

    /// Extend a live lease held by `owner_id` at exactly `version`.
    /// Returns the renewed lease (version bumped), or `None` if the lease was lost.
    fn heartbeat_lease(
        &self,
        goal_id: GoalId,
        owner_id: &str,
        version: u64,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> rollpilot_core::Result<Option<GoalLeaseRecord>>;

    /// Expire the lease at `now` if `owner_id` still holds it. The row stays,
    /// so the next acquisition continues from its `version`.
    fn release_lease(&self, goal_id: GoalId, owner_id: &str, now: DateTime<Utc>) -> rollpilot_core::Result<bool>;

    fn get_lease(&self, goal_id: GoalId) -> rollpilot_core::Result<Option<GoalLeaseRecord>>;

    fn list_leases(&self) -> rollpilot_core::Result<Vec<GoalLeaseRecord>>;

    // ── Checkpoints ────────────────────────────────────────────

    fn append_checkpoint(&self, checkpoint: &GoalExecutionCheckpoint) -> rollpilot_core::Result<()>;

    /// Checkpoints of one goal, in append order.
    fn list_checkpoints(&self, goal_id: GoalId) -> rollpilot_core::Result<Vec<GoalExecutionCheckpoint>>;

    /// Most recent checkpoints across all goals, newest first.
    fn recent_checkpoints(&self, limit: usize) -> rollpilot_core::Result<Vec<GoalExecutionCheckpoint>>;

    // ── Idempotency ────────────────────────────────────────────

    /// Store `record` unless a live record with the same key exists.
    /// Returns `true` if stored, `false` if the key was already live.
    fn put_idempotency_if_absent(
        &self,
        record: &GoalIdempotencyRecord,
        now: DateTime<Utc>,
    ) -> rollpilot_core::Result<bool>;

    fn get_idempotency(&self, key: &str) -> rollpilot_core::Result<Option<GoalIdempotencyRecord>>;

    fn purge_expired_idempotency(&self, now: DateTime<Utc>) -> rollpilot_core::Result<usize>;

    // ── Dead-letter queue ──────────────────────────────────────

    /// Park an item and remove its goal from the active queue, atomically.
    fn move_to_dlq(&self, item: &GoalDlqItem) -> rollpilot_core::Result<()>;

    fn get_dlq_item(&self, goal_id: GoalId) -> rollpilot_core::Result<Option<GoalDlqItem>>;

    fn list_dlq(&self) -> rollpilot_core::Result<Vec<GoalDlqItem>>;

    /// Move a parked goal back to `queued` with `attempts` reset, provided
    /// no live lease exists for it.
    fn replay_from_dlq(&self, goal_id: GoalId, now: DateTime<Utc>) -> rollpilot_core::Result<ReplayOutcome>;

    // ── Suppressions ───────────────────────────────────────────

    /// Insert or replace the suppression for a signature.
    fn record_suppression(&self, record: &GoalSuppressionRecord) -> rollpilot_core::Result<()>;

    fn live_suppression(
        &self,
        signature: &str,
        now: DateTime<Utc>,
    ) -> rollpilot_core::Result<Option<GoalSuppressionRecord>>;

    /// Most recent suppressions, newest first.
    fn list_suppressions(&self, limit: usize) -> rollpilot_core::Result<Vec<GoalSuppressionRecord>>;

    fn purge_expired_suppressions(&self, now: DateTime<Utc>) -> rollpilot_core::Result<usize>;

    // ── Autonomy policy ────────────────────────────────────────

    fn load_autonomy_policy(&self) -> rollpilot_core::Result<Option<RuntimeAutonomyPolicy>>;

    fn save_autonomy_policy(&self, policy: &RuntimeAutonomyPolicy) -> rollpilot_core::Result<()>;

    /// View this store as the ticket store used by approval ticketing.
    fn ticket_store(self: Arc<Self>) -> Arc<dyn TicketStore>;
}

/// Open the backend selected in `[store]`.
pub fn open_store(config: &StoreConfig) -> rollpilot_core::Result<Arc<dyn GoalStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("using in-memory goal store");
            Ok(Arc::new(MemoryGoalStore::new()))
        }
        StoreBackend::Sqlite => {
            if let Some(parent) = config.db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Ok(Arc::new(SqliteGoalStore::open(&config.db_path)?))
        }
    }
}
