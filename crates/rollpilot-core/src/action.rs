use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::snapshot::{RuntimeContext, SystemSnapshot};

/// A request to the action executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Executor capability, e.g. "scale_component", "restart_component", "switch_l1_rpc".
    pub action: String,
    pub params: Value,
    /// Derived from goal + action + parameters; lets the executor spot a
    /// side effect that was already requested by an earlier attempt.
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// True when a live idempotency record for this key already existed.
    #[serde(default)]
    pub previously_requested: bool,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>, params: Value) -> Self {
        Self {
            action: action.into(),
            params,
            idempotency_key: None,
            previously_requested: false,
        }
    }

    pub fn with_idempotency(mut self, key: impl Into<String>, previously_requested: bool) -> Self {
        self.idempotency_key = Some(key.into());
        self.previously_requested = previously_requested;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Failed,
    Skipped,
}

/// The status/output contract every executor honors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub status: ActionStatus,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionOutcome {
    pub fn success(output: Value) -> Self {
        Self {
            status: ActionStatus::Success,
            output,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Failed,
            output: Value::Null,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status != ActionStatus::Failed
    }
}

/// Current L1 RPC routing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub endpoint: String,
    pub healthy: bool,
}

/// Black-box executor for side-effecting (and read-only) operational actions.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute one action. Non-success is reported through `ActionOutcome::status`;
    /// `Err` is reserved for faults reaching the executor at all.
    async fn execute_action(&self, request: &ActionRequest) -> crate::Result<ActionOutcome>;
}

/// Read access to live system state, used for candidate generation and verification.
#[async_trait]
pub trait StateProbe: Send + Sync {
    async fn snapshot(&self) -> crate::Result<SystemSnapshot>;

    async fn current_vcpu(&self) -> crate::Result<u32>;

    async fn l1_rpc_status(&self) -> crate::Result<EndpointStatus>;

    /// Health probe for a component after a restart.
    async fn health_probe(&self, component: &str) -> crate::Result<bool>;

    async fn runtime_context(&self) -> crate::Result<RuntimeContext> {
        let snapshot = self.snapshot().await?;
        Ok(RuntimeContext::from(&snapshot))
    }
}
