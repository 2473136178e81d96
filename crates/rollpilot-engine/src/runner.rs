use chrono::{DateTime, Duration, Utc};
use rollpilot_core::{
    ActionExecutor, ActionOutcome, ActionRequest, ActionStatus, GoalId, GoalPlan, PlanAction,
    PlanStatus, StateProbe, StepStatus, hash_canonical,
};
use rollpilot_store::{GoalIdempotencyRecord, GoalStore};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Run `fut` under the per-call timeout, turning an elapsed deadline into
/// [`rollpilot_core::PilotError::ActionTimeout`].
pub(crate) async fn bounded<T>(
    timeout: std::time::Duration,
    label: &str,
    fut: impl Future<Output = rollpilot_core::Result<T>>,
) -> rollpilot_core::Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(rollpilot_core::PilotError::ActionTimeout {
            action: label.to_string(),
            timeout_secs: timeout.as_secs(),
        }),
    }
}

/// Live state captured right before a write step, so it can be undone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreActionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Record of one executed plan step. Persisted in the `plan_completed`
/// checkpoint so a new lease owner can verify without re-executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecution {
    pub step_id: String,
    pub action: PlanAction,
    pub executor_action: String,
    #[serde(default)]
    pub params: Value,
    pub status: ActionStatus,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub previously_requested: bool,
    #[serde(default)]
    pub pre_state: PreActionState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StepExecution {
    /// A live write the executor reports as applied.
    pub fn is_live_write(&self) -> bool {
        self.action.is_write() && !self.dry_run && self.status == ActionStatus::Success
    }

    /// Writes that verification checks: applied live writes and narrated
    /// dry-run writes. A write the executor skipped changed nothing, so
    /// there is nothing to verify or roll back.
    pub fn needs_verification(&self) -> bool {
        self.is_live_write() || (self.action.is_write() && self.dry_run)
    }
}

/// Why a plan run stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailure {
    pub step_id: String,
    /// `action_failed`, `action_timeout`, `executor_error`, `state_probe_failed`,
    /// `store_error`, `invalid_step_action` or `lease_lost`.
    pub reason_code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct PlanRun {
    pub executions: Vec<StepExecution>,
    pub failure: Option<StepFailure>,
}

impl PlanRun {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Executes plan steps in order against the action executor.
///
/// Write steps get an idempotency key derived from goal, action and
/// parameters. Under `dry_run` write steps are narrated, never sent.
#[derive(Clone)]
pub struct PlanRunner {
    executor: Arc<dyn ActionExecutor>,
    probe: Arc<dyn StateProbe>,
    store: Arc<dyn GoalStore>,
    action_timeout: std::time::Duration,
    idempotency_ttl: Duration,
}

impl PlanRunner {
    pub fn new(
        executor: Arc<dyn ActionExecutor>,
        probe: Arc<dyn StateProbe>,
        store: Arc<dyn GoalStore>,
        action_timeout_secs: u64,
        idempotency_ttl_secs: u64,
    ) -> Self {
        Self {
            executor,
            probe,
            store,
            action_timeout: std::time::Duration::from_secs(action_timeout_secs.max(1)),
            idempotency_ttl: Duration::seconds(idempotency_ttl_secs.max(1) as i64),
        }
    }

    /// Idempotency key for one side effect of one goal.
    pub fn idempotency_key(goal_id: GoalId, action: PlanAction, params: &Value) -> String {
        hash_canonical(&json!({
            "goalId": goal_id.to_string(),
            "action": action.as_str(),
            "params": params,
        }))
    }

    /// Run every step of `plan`, stopping at the first failure. Step and plan
    /// statuses are updated in place.
    ///
    /// `renew` heartbeats the caller's lease and is called before every step.
    /// `Ok(false)` stops the run with `lease_lost` before the step touches
    /// anything, so an owner that lost its lease never issues another call.
    pub async fn run(
        &self,
        goal_id: GoalId,
        owner_id: &str,
        plan: &mut GoalPlan,
        now: DateTime<Utc>,
        renew: &mut (dyn FnMut() -> rollpilot_core::Result<bool> + Send),
    ) -> PlanRun {
        let mut run = PlanRun::default();
        plan.status = PlanStatus::Running;
        let dry_run = plan.dry_run;

        for step in plan.steps.iter_mut() {
            let lease_failure = match renew() {
                Ok(true) => None,
                Ok(false) => Some(("lease_lost", format!("lease lost before step {}", step.id))),
                Err(e) => Some(("store_error", format!("lease heartbeat failed: {e}"))),
            };
            if let Some((reason_code, message)) = lease_failure {
                run.failure = Some(StepFailure {
                    step_id: step.id.clone(),
                    reason_code: reason_code.into(),
                    message,
                });
                break;
            }
            let Some(action) = step.plan_action() else {
                step.status = StepStatus::Failed;
                run.failure = Some(StepFailure {
                    step_id: step.id.clone(),
                    reason_code: "invalid_step_action".into(),
                    message: format!("unsupported action {}", step.action),
                });
                break;
            };
            step.status = StepStatus::Running;
            let params = step.parameters.clone().unwrap_or(Value::Null);

            match self.run_step(goal_id, owner_id, &step.id, action, params, dry_run, now).await {
                Ok(execution) => {
                    step.output = Some(execution.output.clone());
                    if execution.status == ActionStatus::Failed {
                        step.status = StepStatus::Failed;
                        run.failure = Some(StepFailure {
                            step_id: step.id.clone(),
                            reason_code: "action_failed".into(),
                            message: execution
                                .message
                                .clone()
                                .unwrap_or_else(|| format!("{} reported failure", execution.executor_action)),
                        });
                        run.executions.push(execution);
                        break;
                    }
                    step.status = if execution.status == ActionStatus::Skipped {
                        StepStatus::Skipped
                    } else {
                        StepStatus::Completed
                    };
                    run.executions.push(execution);
                }
                Err(failure) => {
                    step.status = StepStatus::Failed;
                    run.failure = Some(failure);
                    break;
                }
            }
        }

        plan.status = if run.succeeded() { PlanStatus::Completed } else { PlanStatus::Failed };
        if let Some(failure) = &run.failure {
            warn!(
                goal_id = %goal_id,
                plan_id = %plan.plan_id,
                step = %failure.step_id,
                reason = %failure.reason_code,
                "plan step failed"
            );
        }
        run
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        goal_id: GoalId,
        owner_id: &str,
        step_id: &str,
        action: PlanAction,
        params: Value,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<StepExecution, StepFailure> {
        let started_at = Utc::now();
        let fail = |reason_code: &str, message: String| StepFailure {
            step_id: step_id.to_string(),
            reason_code: reason_code.to_string(),
            message,
        };

        let mut execution = StepExecution {
            step_id: step_id.to_string(),
            action,
            executor_action: action.executor_action().to_string(),
            params: params.clone(),
            status: ActionStatus::Success,
            output: Value::Null,
            message: None,
            dry_run,
            idempotency_key: None,
            previously_requested: false,
            pre_state: PreActionState::default(),
            started_at,
            finished_at: started_at,
        };

        if action.is_write() {
            execution.pre_state = match self.capture_pre_state(action, &params).await {
                Ok(state) => state,
                Err(e) if dry_run => {
                    debug!(error = %e, "pre-action state unavailable during dry run");
                    fallback_pre_state(action, &params)
                }
                Err(e) => return Err(fail("state_probe_failed", e.to_string())),
            };

            if dry_run {
                info!(
                    goal_id = %goal_id,
                    step = step_id,
                    action = action.executor_action(),
                    "dry run: write step narrated, not executed"
                );
                execution.output = json!({
                    "dryRun": true,
                    "wouldExecute": action.executor_action(),
                    "params": params,
                });
                execution.message = Some(format!("dry run: would call {}", action.executor_action()));
                execution.finished_at = Utc::now();
                return Ok(execution);
            }

            let key = Self::idempotency_key(goal_id, action, &params);
            let record = GoalIdempotencyRecord {
                key: key.clone(),
                goal_id,
                created_at: now,
                expires_at: now + self.idempotency_ttl,
                owner_id: owner_id.to_string(),
            };
            let inserted = self
                .store
                .put_idempotency_if_absent(&record, now)
                .map_err(|e| fail("store_error", e.to_string()))?;
            if !inserted {
                info!(goal_id = %goal_id, step = step_id, "side effect was already requested by an earlier attempt");
            }
            execution.idempotency_key = Some(key);
            execution.previously_requested = !inserted;
        }

        let mut request = ActionRequest::new(action.executor_action(), params);
        if let Some(key) = &execution.idempotency_key {
            request = request.with_idempotency(key.clone(), execution.previously_requested);
        }

        let outcome: ActionOutcome = match bounded(
            self.action_timeout,
            action.executor_action(),
            self.executor.execute_action(&request),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e @ rollpilot_core::PilotError::ActionTimeout { .. }) => {
                return Err(fail("action_timeout", e.to_string()));
            }
            Err(e) => return Err(fail("executor_error", e.to_string())),
        };

        debug!(
            goal_id = %goal_id,
            step = step_id,
            action = action.executor_action(),
            status = ?outcome.status,
            "step executed"
        );
        execution.status = outcome.status;
        execution.output = outcome.output;
        execution.message = outcome.message;
        execution.finished_at = Utc::now();
        Ok(execution)
    }

    async fn capture_pre_state(&self, action: PlanAction, params: &Value) -> rollpilot_core::Result<PreActionState> {
        match action {
            PlanAction::ScaleExecution => {
                let vcpu = bounded(self.action_timeout, "current_vcpu", self.probe.current_vcpu()).await?;
                Ok(PreActionState {
                    vcpu: Some(vcpu),
                    endpoint: None,
                })
            }
            PlanAction::SetRoutingPolicy => {
                let status = bounded(self.action_timeout, "l1_rpc_status", self.probe.l1_rpc_status()).await?;
                Ok(PreActionState {
                    vcpu: None,
                    endpoint: Some(status.endpoint),
                })
            }
            _ => Ok(fallback_pre_state(action, params)),
        }
    }
}

/// Pre-action state as the plan itself recorded it.
fn fallback_pre_state(action: PlanAction, params: &Value) -> PreActionState {
    match action {
        PlanAction::ScaleExecution => PreActionState {
            vcpu: params
                .get("previousVcpu")
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok()),
            endpoint: None,
        },
        PlanAction::SetRoutingPolicy => PreActionState {
            vcpu: None,
            endpoint: params
                .get("previousEndpoint")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        _ => PreActionState::default(),
    }
}
