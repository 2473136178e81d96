use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::sync::Arc;
use tokio::sync::broadcast;

/// Goal lifecycle events, published for dashboards, audit sinks, and the
/// learning feedback loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Generation ─────────────────────────────────────────────
    GoalQueued {
        goal_id: Uuid,
        intent: String,
        score: f64,
    },
    GoalSuppressed {
        signature: String,
        intent: String,
        reason_code: String,
    },

    // ── Execution ──────────────────────────────────────────────
    GoalDispatched {
        goal_id: Uuid,
        owner_id: String,
        attempt: u32,
    },
    GoalCompleted {
        goal_id: Uuid,
        plan_id: Uuid,
    },
    GoalRequeued {
        goal_id: Uuid,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        reason: String,
    },
    GoalDeadLettered {
        goal_id: Uuid,
        attempts: u32,
        reason: String,
    },
    GoalReplayed {
        goal_id: Uuid,
    },
    RollbackExecuted {
        goal_id: Uuid,
        success: bool,
    },

    // ── Approvals ──────────────────────────────────────────────
    ApprovalIssued {
        tool_name: String,
        expires_at: DateTime<Utc>,
    },
    ApprovalConsumed {
        tool_name: String,
        accepted: bool,
    },
}

/// A broadcast-based event bus for engine-wide pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
