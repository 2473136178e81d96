use thiserror::Error;

/// Unified error type for the rollpilot engine.
///
/// Policy denials and validation failures are *not* errors: they travel as
/// tagged results. This enum covers the faults that make an operation impossible
/// to complete (store unavailable, executor fault, malformed record, timeout).
#[derive(Error, Debug)]
pub enum PilotError {
    // ── Store errors ───────────────────────────────────────────
    #[error("store error: {0}")]
    Store(String),

    #[error("malformed record in {collection}: {reason}")]
    MalformedRecord { collection: String, reason: String },

    #[error("goal not found: {0}")]
    GoalNotFound(String),

    // ── Execution errors ───────────────────────────────────────
    #[error("action execution failed: {action}: {reason}")]
    ActionExecution { action: String, reason: String },

    #[error("action timed out after {timeout_secs}s: {action}")]
    ActionTimeout { action: String, timeout_secs: u64 },

    #[error("state probe failed: {0}")]
    Probe(String),

    #[error("lease lost for goal {goal_id}: owner {owner_id}")]
    LeaseLost { goal_id: String, owner_id: String },

    // ── Policy errors ──────────────────────────────────────────
    #[error("denied by policy: {reason_code}: {message}")]
    PolicyDenied { reason_code: String, message: String },

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl PilotError {
    /// Whether a retry of the same operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ActionExecution { .. } | Self::ActionTimeout { .. } | Self::Probe(_) | Self::Store(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PilotError>;
