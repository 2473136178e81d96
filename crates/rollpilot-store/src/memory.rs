use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rollpilot_autonomy::{ApprovalTicket, RuntimeAutonomyPolicy, TicketStore};
use rollpilot_core::GoalId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::records::*;
use crate::store::GoalStore;

#[derive(Default)]
struct MemoryState {
    queue: HashMap<GoalId, GoalQueueItem>,
    /// Undecodable queue rows, keyed by raw goal id.
    malformed: HashMap<String, String>,
    leases: HashMap<GoalId, GoalLeaseRecord>,
    checkpoints: Vec<GoalExecutionCheckpoint>,
    idempotency: HashMap<String, GoalIdempotencyRecord>,
    dlq: HashMap<GoalId, GoalDlqItem>,
    suppressions: HashMap<String, GoalSuppressionRecord>,
    tickets: HashMap<String, ApprovalTicket>,
    autonomy_policy: Option<RuntimeAutonomyPolicy>,
}

/// Process-local store. One mutex guards all collections, so every method
/// is trivially atomic.
#[derive(Default)]
pub struct MemoryGoalStore {
    state: Mutex<MemoryState>,
}

impl MemoryGoalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plant an undecodable queue row, as a corrupted persistent store would produce.
    pub fn inject_malformed_record(&self, goal_id: impl Into<String>, raw: impl Into<String>) {
        self.state.lock().malformed.insert(goal_id.into(), raw.into());
    }
}

impl TicketStore for MemoryGoalStore {
    fn insert_ticket(&self, ticket: &ApprovalTicket) -> rollpilot_core::Result<()> {
        self.state.lock().tickets.insert(ticket.id.clone(), ticket.clone());
        Ok(())
    }

    fn take_ticket(&self, id: &str) -> rollpilot_core::Result<Option<ApprovalTicket>> {
        Ok(self.state.lock().tickets.remove(id))
    }

    fn purge_expired_tickets(&self, now: DateTime<Utc>) -> rollpilot_core::Result<usize> {
        let mut state = self.state.lock();
        let before = state.tickets.len();
        state.tickets.retain(|_, t| t.expires_at >= now);
        Ok(before - state.tickets.len())
    }
}

impl GoalStore for MemoryGoalStore {
    fn enqueue(&self, item: &GoalQueueItem) -> rollpilot_core::Result<()> {
        self.state.lock().queue.insert(item.goal_id, item.clone());
        Ok(())
    }

    fn get_queue_item(&self, goal_id: GoalId) -> rollpilot_core::Result<Option<GoalQueueItem>> {
        Ok(self.state.lock().queue.get(&goal_id).cloned())
    }

    fn update_queue_item(&self, item: &GoalQueueItem) -> rollpilot_core::Result<()> {
        self.enqueue(item)
    }

    fn scan_queue(&self) -> rollpilot_core::Result<QueueScan> {
        let state = self.state.lock();
        let mut items: Vec<GoalQueueItem> = state.queue.values().cloned().collect();
        items.sort_by(|a, b| b.score.total.total_cmp(&a.score.total));
        let malformed = state
            .malformed
            .iter()
            .map(|(goal_id, raw)| MalformedRecord {
                goal_id: goal_id.clone(),
                raw: raw.clone(),
                reason: "queue record could not be decoded".into(),
            })
            .collect();
        Ok(QueueScan { items, malformed })
    }

    fn remove_queue_item(&self, goal_id: GoalId) -> rollpilot_core::Result<bool> {
        let mut state = self.state.lock();
        let removed = state.queue.remove(&goal_id).is_some();
        let removed_raw = state.malformed.remove(&goal_id.to_string()).is_some();
        Ok(removed || removed_raw)
    }

    fn try_acquire_lease(
        &self,
        goal_id: GoalId,
        owner_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> rollpilot_core::Result<Option<GoalLeaseRecord>> {
        let mut state = self.state.lock();
        let version = match state.leases.get(&goal_id) {
            Some(existing) if existing.is_live(now) => return Ok(None),
            Some(existing) => existing.version + 1,
            None => 1,
        };
        let lease = GoalLeaseRecord {
            goal_id,
            owner_id: owner_id.to_string(),
            leased_at: now,
            lease_expires_at: now + ttl,
            heartbeat_at: now,
            version,
        };
        state.leases.insert(goal_id, lease.clone());
        Ok(Some(lease))
    }

    fn heartbeat_lease(
        &self,
        goal_id: GoalId,
        owner_id: &str,
        version: u64,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> rollpilot_core::Result<Option<GoalLeaseRecord>> {
        let mut state = self.state.lock();
        match state.leases.get_mut(&goal_id) {
            Some(lease) if lease.owner_id == owner_id && lease.version == version && lease.is_live(now) => {
                lease.heartbeat_at = now;
                lease.lease_expires_at = now + ttl;
                lease.version += 1;
                Ok(Some(lease.clone()))
            }
            _ => Ok(None),
        }
    }

    fn release_lease(&self, goal_id: GoalId, owner_id: &str, now: DateTime<Utc>) -> rollpilot_core::Result<bool> {
        let mut state = self.state.lock();
        match state.leases.get_mut(&goal_id) {
            Some(lease) if lease.owner_id == owner_id => {
                lease.lease_expires_at = lease.lease_expires_at.min(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get_lease(&self, goal_id: GoalId) -> rollpilot_core::Result<Option<GoalLeaseRecord>> {
        Ok(self.state.lock().leases.get(&goal_id).cloned())
    }

    fn list_leases(&self) -> rollpilot_core::Result<Vec<GoalLeaseRecord>> {
        let mut leases: Vec<_> = self.state.lock().leases.values().cloned().collect();
        leases.sort_by_key(|l| std::cmp::Reverse(l.heartbeat_at));
        Ok(leases)
    }

    fn append_checkpoint(&self, checkpoint: &GoalExecutionCheckpoint) -> rollpilot_core::Result<()> {
        self.state.lock().checkpoints.push(checkpoint.clone());
        Ok(())
    }

    fn list_checkpoints(&self, goal_id: GoalId) -> rollpilot_core::Result<Vec<GoalExecutionCheckpoint>> {
        Ok(self
            .state
            .lock()
            .checkpoints
            .iter()
            .filter(|c| c.goal_id == goal_id)
            .cloned()
            .collect())
    }

    fn recent_checkpoints(&self, limit: usize) -> rollpilot_core::Result<Vec<GoalExecutionCheckpoint>> {
        Ok(self
            .state
            .lock()
            .checkpoints
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    fn put_idempotency_if_absent(
        &self,
        record: &GoalIdempotencyRecord,
        now: DateTime<Utc>,
    ) -> rollpilot_core::Result<bool> {
        let mut state = self.state.lock();
        if state
            .idempotency
            .get(&record.key)
            .is_some_and(|existing| existing.expires_at > now)
        {
            return Ok(false);
        }
        state.idempotency.insert(record.key.clone(), record.clone());
        Ok(true)
    }

    fn get_idempotency(&self, key: &str) -> rollpilot_core::Result<Option<GoalIdempotencyRecord>> {
        Ok(self.state.lock().idempotency.get(key).cloned())
    }

    fn purge_expired_idempotency(&self, now: DateTime<Utc>) -> rollpilot_core::Result<usize> {
        let mut state = self.state.lock();
        let before = state.idempotency.len();
        state.idempotency.retain(|_, r| r.expires_at > now);
        Ok(before - state.idempotency.len())
    }

    fn move_to_dlq(&self, item: &GoalDlqItem) -> rollpilot_core::Result<()> {
        let mut state = self.state.lock();
        state.queue.remove(&item.goal_id);
        state.malformed.remove(&item.goal_id.to_string());
        state.dlq.insert(item.goal_id, item.clone());
        Ok(())
    }

    fn get_dlq_item(&self, goal_id: GoalId) -> rollpilot_core::Result<Option<GoalDlqItem>> {
        Ok(self.state.lock().dlq.get(&goal_id).cloned())
    }

    fn list_dlq(&self) -> rollpilot_core::Result<Vec<GoalDlqItem>> {
        let mut items: Vec<_> = self.state.lock().dlq.values().cloned().collect();
        items.sort_by_key(|d| std::cmp::Reverse(d.moved_at));
        Ok(items)
    }

    fn replay_from_dlq(&self, goal_id: GoalId, now: DateTime<Utc>) -> rollpilot_core::Result<ReplayOutcome> {
        let mut state = self.state.lock();
        let Some(parked) = state.dlq.get(&goal_id) else {
            return Ok(ReplayOutcome::NotFound);
        };
        if let Some(lease) = state.leases.get(&goal_id).filter(|l| l.is_live(now)) {
            return Ok(ReplayOutcome::LeaseHeld(lease.clone()));
        }
        let Some(mut item) = parked.queue_item.clone() else {
            return Ok(ReplayOutcome::Unrecoverable);
        };
        item.attempts = 0;
        item.status = GoalQueueStatus::Queued;
        item.next_attempt_at = None;
        item.last_error = None;
        state.dlq.remove(&goal_id);
        state.queue.insert(goal_id, item.clone());
        Ok(ReplayOutcome::Replayed(item))
    }

    fn record_suppression(&self, record: &GoalSuppressionRecord) -> rollpilot_core::Result<()> {
        self.state
            .lock()
            .suppressions
            .insert(record.signature.clone(), record.clone());
        Ok(())
    }

    fn live_suppression(
        &self,
        signature: &str,
        now: DateTime<Utc>,
    ) -> rollpilot_core::Result<Option<GoalSuppressionRecord>> {
        Ok(self
            .state
            .lock()
            .suppressions
            .get(signature)
            .filter(|s| s.is_live(now))
            .cloned())
    }

    fn list_suppressions(&self, limit: usize) -> rollpilot_core::Result<Vec<GoalSuppressionRecord>> {
        let mut records: Vec<_> = self.state.lock().suppressions.values().cloned().collect();
        records.sort_by_key(|s| std::cmp::Reverse(s.suppressed_at));
        records.truncate(limit);
        Ok(records)
    }

    fn purge_expired_suppressions(&self, now: DateTime<Utc>) -> rollpilot_core::Result<usize> {
        let mut state = self.state.lock();
        let before = state.suppressions.len();
        state.suppressions.retain(|_, s| s.is_live(now));
        Ok(before - state.suppressions.len())
    }

    fn load_autonomy_policy(&self) -> rollpilot_core::Result<Option<RuntimeAutonomyPolicy>> {
        Ok(self.state.lock().autonomy_policy)
    }

    fn save_autonomy_policy(&self, policy: &RuntimeAutonomyPolicy) -> rollpilot_core::Result<()> {
        self.state.lock().autonomy_policy = Some(*policy);
        Ok(())
    }

    fn ticket_store(self: Arc<Self>) -> Arc<dyn TicketStore> {
        self
    }
}
