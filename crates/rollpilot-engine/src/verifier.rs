use chrono::{DateTime, Utc};
use rollpilot_core::{PlanAction, StateProbe};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::runner::{StepExecution, bounded};

/// Expected-vs-observed comparison after an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationVerificationResult {
    pub expected: Value,
    pub observed: Value,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub verified_at: DateTime<Utc>,
}

/// What to verify.
///
/// `expected` is `{vcpu}` for a scale, `{endpoint}` for a routing change and
/// `{component}` for a restart. When `observed` is supplied it is used as is;
/// otherwise live state is queried through the probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub action_type: PlanAction,
    pub dry_run: bool,
    pub expected: Value,
    #[serde(default)]
    pub observed: Option<Value>,
}

impl VerifyRequest {
    /// The check implied by one executed step.
    pub fn for_execution(execution: &StepExecution) -> Self {
        Self {
            action_type: execution.action,
            dry_run: execution.dry_run,
            expected: expected_state(execution.action, &execution.params),
            observed: None,
        }
    }
}

/// The state a successful `action` with `params` should leave behind.
pub fn expected_state(action: PlanAction, params: &Value) -> Value {
    match action {
        PlanAction::ScaleExecution => json!({ "vcpu": params.get("targetVcpu").cloned().unwrap_or(Value::Null) }),
        PlanAction::SetRoutingPolicy => {
            json!({ "endpoint": params.get("endpoint").cloned().unwrap_or(Value::Null) })
        }
        PlanAction::RestartExecution => json!({
            "component": params.get("component").cloned().unwrap_or_else(|| json!("execution")),
            "healthy": true,
        }),
        _ => Value::Null,
    }
}

/// Re-observes live state after an operation and compares it to expectation.
#[derive(Clone)]
pub struct OperationVerifier {
    probe: Arc<dyn StateProbe>,
    timeout: std::time::Duration,
}

impl OperationVerifier {
    pub fn new(probe: Arc<dyn StateProbe>, timeout_secs: u64) -> Self {
        Self {
            probe,
            timeout: std::time::Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub async fn verify_operation_outcome(&self, request: &VerifyRequest, now: DateTime<Utc>) -> OperationVerificationResult {
        let expected = request.expected.clone();

        if request.dry_run {
            return OperationVerificationResult {
                observed: expected.clone(),
                expected,
                passed: true,
                details: Some("dry run: verification simulated".into()),
                verified_at: now,
            };
        }

        let observed = match &request.observed {
            Some(observed) => Ok(observed.clone()),
            None => self.observe(request.action_type, &expected).await,
        };
        let observed = match observed {
            Ok(observed) => observed,
            Err(e) => {
                warn!(action = %request.action_type, error = %e, "verification probe failed");
                return OperationVerificationResult {
                    expected,
                    observed: Value::Null,
                    passed: false,
                    details: Some(format!("could not observe live state: {e}")),
                    verified_at: now,
                };
            }
        };

        let (passed, details) = compare(request.action_type, &expected, &observed);
        debug!(action = %request.action_type, passed, "operation verified");
        OperationVerificationResult {
            expected,
            observed,
            passed,
            details,
            verified_at: now,
        }
    }

    async fn observe(&self, action: PlanAction, expected: &Value) -> rollpilot_core::Result<Value> {
        match action {
            PlanAction::ScaleExecution => {
                let vcpu = bounded(self.timeout, "current_vcpu", self.probe.current_vcpu()).await?;
                Ok(json!({ "vcpu": vcpu }))
            }
            PlanAction::SetRoutingPolicy => {
                let status = bounded(self.timeout, "l1_rpc_status", self.probe.l1_rpc_status()).await?;
                Ok(json!({ "endpoint": status.endpoint, "healthy": status.healthy }))
            }
            PlanAction::RestartExecution => {
                let component = expected
                    .get("component")
                    .and_then(Value::as_str)
                    .unwrap_or("execution");
                let healthy = bounded(self.timeout, "health_probe", self.probe.health_probe(component)).await?;
                Ok(json!({ "component": component, "healthy": healthy }))
            }
            _ => Ok(expected.clone()),
        }
    }
}

fn compare(action: PlanAction, expected: &Value, observed: &Value) -> (bool, Option<String>) {
    match action {
        PlanAction::ScaleExecution => {
            let want = expected.get("vcpu").and_then(Value::as_u64);
            let got = observed.get("vcpu").and_then(Value::as_u64);
            match (want, got) {
                (Some(w), Some(g)) if w == g => (true, None),
                (Some(w), Some(g)) => (false, Some(format!("expected {w} vCPU, observed {g}"))),
                _ => (false, Some("vCPU count missing from expected or observed state".into())),
            }
        }
        PlanAction::SetRoutingPolicy => {
            let want = expected.get("endpoint").and_then(Value::as_str);
            let got = observed.get("endpoint").and_then(Value::as_str);
            // An explicit `healthy: false` fails the check; absent means unknown and passes.
            let healthy = observed.get("healthy").and_then(Value::as_bool).unwrap_or(true);
            match (want, got) {
                (Some(w), Some(g)) if w == g && healthy => (true, None),
                (Some(w), Some(g)) if w == g => (false, Some(format!("routed to {g} but it is unhealthy"))),
                (Some(w), Some(g)) => (false, Some(format!("expected endpoint {w}, observed {g}"))),
                _ => (false, Some("endpoint missing from expected or observed state".into())),
            }
        }
        PlanAction::RestartExecution => {
            if observed.get("healthy").and_then(Value::as_bool) == Some(true) {
                (true, None)
            } else {
                (false, Some("component did not pass its health probe after restart".into()))
            }
        }
        _ => (true, Some("read-only step; nothing to verify".into())),
    }
}
