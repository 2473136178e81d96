use chrono::{DateTime, Utc};
use rollpilot_core::{
    CandidateId, GoalCandidate, GoalId, GoalIntent, GoalScore, GoalSource, OwnerId, RiskLevel,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

// ── Queue ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalQueueStatus {
    Queued,
    Scheduled,
    Running,
    Completed,
    Failed,
    Requeued,
    Dlq,
}

impl GoalQueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Requeued => "requeued",
            Self::Dlq => "dlq",
        }
    }

    /// Still owned by the active queue (counts for dedup and queue depth).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Scheduled | Self::Running | Self::Requeued
        )
    }
}

impl fmt::Display for GoalQueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A goal accepted into the execution queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalQueueItem {
    pub goal_id: GoalId,
    pub candidate_id: CandidateId,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub status: GoalQueueStatus,
    pub goal: String,
    pub intent: GoalIntent,
    pub source: GoalSource,
    pub risk: RiskLevel,
    pub confidence: f64,
    pub signature: String,
    pub score: GoalScore,
    #[serde(default)]
    pub params: Value,
    /// Not dispatchable before this instant (retry backoff).
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl GoalQueueItem {
    pub fn from_candidate(candidate: &GoalCandidate, now: DateTime<Utc>) -> Self {
        Self {
            goal_id: Uuid::new_v4(),
            candidate_id: candidate.id,
            enqueued_at: now,
            attempts: 0,
            status: GoalQueueStatus::Queued,
            goal: candidate.goal.clone(),
            intent: candidate.intent,
            source: candidate.source,
            risk: candidate.risk,
            confidence: candidate.confidence,
            signature: candidate.signature.clone(),
            score: candidate.score,
            params: candidate.params.clone(),
            next_attempt_at: None,
            last_error: None,
        }
    }

    /// Rebuild the candidate this item was queued from.
    pub fn to_candidate(&self) -> GoalCandidate {
        GoalCandidate {
            id: self.candidate_id,
            goal: self.goal.clone(),
            intent: self.intent,
            source: self.source,
            risk: self.risk,
            confidence: self.confidence,
            signature: self.signature.clone(),
            score: self.score,
            params: self.params.clone(),
            generated_at: self.enqueued_at,
        }
    }

    /// Eligible for dispatch at `now`, lease aside. A `running` item left
    /// behind by a dead owner stays eligible; the lease decides who takes it.
    pub fn is_dispatchable(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.next_attempt_at.is_none_or(|at| at <= now)
    }
}

/// A queue row that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub goal_id: String,
    pub raw: String,
    pub reason: String,
}

/// Every queue row, decoded where possible, ordered by score descending.
#[derive(Debug, Clone, Default)]
pub struct QueueScan {
    pub items: Vec<GoalQueueItem>,
    pub malformed: Vec<MalformedRecord>,
}

// ── Leases ─────────────────────────────────────────────────────

/// Exclusive, time-bounded claim on executing one goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalLeaseRecord {
    pub goal_id: GoalId,
    pub owner_id: OwnerId,
    pub leased_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    /// Bumped on every acquisition and renewal.
    pub version: u64,
}

impl GoalLeaseRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at > now
    }
}

// ── Checkpoints ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPhase {
    Scheduled,
    LeaseAcquired,
    PolicyCheck,
    PlanStarted,
    PlanCompleted,
    VerifyCompleted,
    RollbackCompleted,
    Failed,
    Requeued,
    Dlq,
}

impl CheckpointPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::LeaseAcquired => "lease_acquired",
            Self::PolicyCheck => "policy_check",
            Self::PlanStarted => "plan_started",
            Self::PlanCompleted => "plan_completed",
            Self::VerifyCompleted => "verify_completed",
            Self::RollbackCompleted => "rollback_completed",
            Self::Failed => "failed",
            Self::Requeued => "requeued",
            Self::Dlq => "dlq",
        }
    }
}

impl fmt::Display for CheckpointPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of one phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalExecutionCheckpoint {
    pub goal_id: GoalId,
    pub phase: CheckpointPhase,
    pub timestamp: DateTime<Utc>,
    /// Attempt number the checkpoint belongs to (queue `attempts` at dispatch).
    pub attempt: u32,
    #[serde(default)]
    pub owner_id: Option<OwnerId>,
    #[serde(default)]
    pub details: Option<Value>,
}

impl GoalExecutionCheckpoint {
    pub fn new(goal_id: GoalId, phase: CheckpointPhase, attempt: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            goal_id,
            phase,
            timestamp,
            attempt,
            owner_id: None,
            details: None,
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<OwnerId>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

// ── Idempotency ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalIdempotencyRecord {
    pub key: String,
    pub goal_id: GoalId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub owner_id: OwnerId,
}

// ── Dead-letter queue ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalDlqItem {
    pub id: Uuid,
    pub goal_id: GoalId,
    pub moved_at: DateTime<Utc>,
    pub reason: String,
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// `None` when the queue row could not be decoded; see `raw_record`.
    #[serde(default)]
    pub queue_item: Option<GoalQueueItem>,
    #[serde(default)]
    pub raw_record: Option<String>,
}

/// What happened to a DLQ replay request.
#[derive(Debug, Clone)]
pub enum ReplayOutcome {
    Replayed(GoalQueueItem),
    NotFound,
    LeaseHeld(GoalLeaseRecord),
    /// The parked record has no decodable queue item to restore.
    Unrecoverable,
}

// ── Suppressions ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalSuppressionReasonCode {
    LowScore,
    LowConfidence,
    PolicyBlocked,
    QueueFull,
    InvalidPlan,
    /// The same signature just completed; it stays quiet for the window.
    RecentlyCompleted,
}

impl GoalSuppressionReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowScore => "low_score",
            Self::LowConfidence => "low_confidence",
            Self::PolicyBlocked => "policy_blocked",
            Self::QueueFull => "queue_full",
            Self::InvalidPlan => "invalid_plan",
            Self::RecentlyCompleted => "recently_completed",
        }
    }
}

impl fmt::Display for GoalSuppressionReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate that was turned away, kept until `expires_at` so the same
/// signature is not re-proposed every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalSuppressionRecord {
    pub signature: String,
    pub intent: GoalIntent,
    pub reason_code: GoalSuppressionReasonCode,
    pub detail: String,
    pub suppressed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl GoalSuppressionRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
