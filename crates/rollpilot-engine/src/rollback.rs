use chrono::{DateTime, Utc};
use rollpilot_core::{ActionExecutor, ActionRequest, PlanAction};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::runner::{StepExecution, bounded};
use crate::verifier::{OperationVerificationResult, OperationVerifier, VerifyRequest, expected_state};

/// The inverse of one executed operation, if a safe one exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPlan {
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<PlanAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RollbackPlan {
    fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            action_type: None,
            params: None,
            reason: Some(reason.into()),
        }
    }

    fn inverse(action: PlanAction, params: Value, reason: String) -> Self {
        Self {
            available: true,
            action_type: Some(action),
            params: Some(params),
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    pub attempted: bool,
    pub success: bool,
    pub message: String,
    pub executed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<OperationVerificationResult>,
}

/// Derive the inverse of `execution` from the state captured before it ran.
pub fn build_rollback_plan(execution: &StepExecution) -> RollbackPlan {
    match execution.action {
        PlanAction::ScaleExecution => {
            let target = execution.params.get("targetVcpu").and_then(Value::as_u64);
            match execution.pre_state.vcpu {
                Some(previous) if target != Some(u64::from(previous)) => RollbackPlan::inverse(
                    PlanAction::ScaleExecution,
                    json!({ "targetVcpu": previous }),
                    format!("restore previous {previous} vCPU"),
                ),
                Some(_) => RollbackPlan::unavailable("vCPU count was already at the target"),
                None => RollbackPlan::unavailable("previous vCPU count was not captured"),
            }
        }
        PlanAction::SetRoutingPolicy => match &execution.pre_state.endpoint {
            Some(previous) => RollbackPlan::inverse(
                PlanAction::SetRoutingPolicy,
                json!({ "endpoint": previous }),
                format!("route back to {previous}"),
            ),
            None => RollbackPlan::unavailable("previous endpoint was not captured"),
        },
        PlanAction::RestartExecution => RollbackPlan::unavailable("a restart has no inverse"),
        _ => RollbackPlan::unavailable("read-only step; nothing to roll back"),
    }
}

/// Executes rollback plans and re-verifies them. A failed rollback is
/// reported; it never triggers a rollback of its own.
#[derive(Clone)]
pub struct RollbackRunner {
    executor: Arc<dyn ActionExecutor>,
    verifier: OperationVerifier,
    timeout: std::time::Duration,
}

impl RollbackRunner {
    pub fn new(executor: Arc<dyn ActionExecutor>, verifier: OperationVerifier, timeout_secs: u64) -> Self {
        Self {
            executor,
            verifier,
            timeout: std::time::Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub async fn run_rollback_plan(&self, plan: &RollbackPlan, dry_run: bool, now: DateTime<Utc>) -> RollbackResult {
        let (Some(action), true) = (plan.action_type, plan.available) else {
            return RollbackResult {
                attempted: false,
                success: false,
                message: plan
                    .reason
                    .clone()
                    .unwrap_or_else(|| "no rollback available".into()),
                executed_at: now,
                verification: None,
            };
        };
        let params = plan.params.clone().unwrap_or(Value::Null);
        let verify = VerifyRequest {
            action_type: action,
            dry_run,
            expected: expected_state(action, &params),
            observed: None,
        };

        if dry_run {
            let verification = self.verifier.verify_operation_outcome(&verify, now).await;
            return RollbackResult {
                attempted: true,
                success: true,
                message: format!("dry run: would call {} with {}", action.executor_action(), params),
                executed_at: now,
                verification: Some(verification),
            };
        }

        let request = ActionRequest::new(action.executor_action(), params);
        let outcome = bounded(
            self.timeout,
            action.executor_action(),
            self.executor.execute_action(&request),
        )
        .await;
        match outcome {
            Ok(outcome) if outcome.is_success() => {}
            Ok(outcome) => {
                let message = outcome
                    .message
                    .unwrap_or_else(|| format!("{} reported failure", action.executor_action()));
                warn!(action = %action, error = %message, "rollback action failed");
                return RollbackResult {
                    attempted: true,
                    success: false,
                    message,
                    executed_at: now,
                    verification: None,
                };
            }
            Err(e) => {
                warn!(action = %action, error = %e, "rollback action failed");
                return RollbackResult {
                    attempted: true,
                    success: false,
                    message: e.to_string(),
                    executed_at: now,
                    verification: None,
                };
            }
        }

        let verification = self.verifier.verify_operation_outcome(&verify, now).await;
        let success = verification.passed;
        let message = if success {
            format!("rolled back: {}", plan.reason.as_deref().unwrap_or(action.as_str()))
        } else {
            format!(
                "rollback executed but did not verify: {}",
                verification.details.as_deref().unwrap_or("state mismatch")
            )
        };
        info!(action = %action, success, "rollback finished");
        RollbackResult {
            attempted: true,
            success,
            message,
            executed_at: now,
            verification: Some(verification),
        }
    }
}
