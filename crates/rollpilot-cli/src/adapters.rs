//! Operator-side capability adapters.
//!
//! The CLI has no live rollup to talk to, so state comes from a JSON snapshot
//! file and side-effecting actions are narrated to the log instead of run.

use async_trait::async_trait;
use rollpilot_core::{
    ActionExecutor, ActionOutcome, ActionRequest, ActionStatus, EndpointStatus, PilotError, Result,
    StateProbe, SystemSnapshot,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Seconds of L2 head lag after which a component counts as unhealthy.
const HEALTHY_LAG_SECS: u64 = 120;

/// Reads a `SystemSnapshot` from disk on every call, so an operator can edit
/// the file between commands.
#[derive(Debug, Clone)]
pub struct SnapshotFileProbe {
    path: Option<PathBuf>,
}

impl SnapshotFileProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A probe with no backing file; every read fails.
    pub fn unavailable() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn load(&self) -> Result<SystemSnapshot> {
        let Some(path) = &self.path else {
            return Err(PilotError::Probe("no snapshot file given (use --snapshot)".into()));
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PilotError::Probe(format!("cannot read {}: {e}", path.display())))?;
        let snapshot: SystemSnapshot = serde_json::from_str(&raw)
            .map_err(|e| PilotError::Probe(format!("invalid snapshot {}: {e}", path.display())))?;
        debug!(path = %path.display(), "snapshot loaded");
        Ok(snapshot)
    }
}

#[async_trait]
impl StateProbe for SnapshotFileProbe {
    async fn snapshot(&self) -> Result<SystemSnapshot> {
        self.load()
    }

    async fn current_vcpu(&self) -> Result<u32> {
        Ok(self.load()?.metrics.current_vcpu)
    }

    async fn l1_rpc_status(&self) -> Result<EndpointStatus> {
        let metrics = self.load()?.metrics;
        let endpoint = metrics
            .l1_rpc_endpoint
            .ok_or_else(|| PilotError::Probe("snapshot has no l1_rpc_endpoint".into()))?;
        Ok(EndpointStatus {
            endpoint,
            healthy: metrics.l1_rpc_healthy,
        })
    }

    async fn health_probe(&self, _component: &str) -> Result<bool> {
        Ok(self.load()?.metrics.block_height_lag_secs < HEALTHY_LAG_SECS)
    }
}

/// Executor that logs what it would do. Read-only actions succeed; anything
/// with a side effect is reported as skipped.
#[derive(Debug, Clone, Default)]
pub struct NarratingExecutor;

impl NarratingExecutor {
    fn is_write(action: &str) -> bool {
        matches!(action, "scale_component" | "restart_component" | "switch_l1_rpc")
    }
}

#[async_trait]
impl ActionExecutor for NarratingExecutor {
    async fn execute_action(&self, request: &ActionRequest) -> Result<ActionOutcome> {
        info!(
            action = %request.action,
            params = %request.params,
            idempotency_key = ?request.idempotency_key,
            "narrated action"
        );
        if Self::is_write(&request.action) {
            return Ok(ActionOutcome {
                status: ActionStatus::Skipped,
                output: json!({ "narrated": true, "action": request.action }),
                message: Some(format!("{} not executed: the CLI has no live executor", request.action)),
            });
        }
        Ok(ActionOutcome::success(json!({ "narrated": true, "action": request.action })))
    }
}
