use chrono::{DateTime, Utc};
use rollpilot_core::{
    GoalCandidate, GoalIntent, GoalPlan, GoalPlanStep, PlanAction, PlanStatus, PlanVersion, RiskLevel,
};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::validator::{
    PRECONDITION_COOLDOWN_CLEAR, PRECONDITION_L1_RPC_UNHEALTHY, PRECONDITION_WRITES_ALLOWED,
    PlanValidation, PlanValidator, ValidationFailure, ValidationRequest,
};

/// Result of planning a candidate and validating the plan, replanning if allowed.
#[derive(Debug, Clone)]
pub enum PlanOutcome {
    Ready(GoalPlan),
    Rejected {
        plan: GoalPlan,
        failure: ValidationFailure,
        message: String,
    },
}

impl PlanOutcome {
    pub fn plan(&self) -> &GoalPlan {
        match self {
            Self::Ready(plan) | Self::Rejected { plan, .. } => plan,
        }
    }
}

/// Rule-based planner: turns a goal intent into a fixed step sequence.
#[derive(Debug, Clone, Copy)]
pub struct GoalPlanner {
    max_replans: u32,
}

impl Default for GoalPlanner {
    fn default() -> Self {
        Self::new(1)
    }
}

impl GoalPlanner {
    pub fn new(max_replans: u32) -> Self {
        Self { max_replans }
    }

    pub fn build_plan(&self, candidate: &GoalCandidate, dry_run: bool, now: DateTime<Utc>) -> GoalPlan {
        Self::plan_for_intent(candidate.intent, &candidate.goal, &candidate.params, dry_run, now)
    }

    /// Build the v1 rule plan for an intent. `params` carries the salient
    /// parameters (`targetVcpu`, `currentVcpu`, `component`, `endpoint`, `previousEndpoint`).
    pub fn plan_for_intent(
        intent: GoalIntent,
        goal: &str,
        params: &Value,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> GoalPlan {
        let mut steps = vec![GoalPlanStep::new(
            0,
            PlanAction::CollectState,
            "Collect current state",
            "Capture a pre-action baseline",
        )];

        match intent {
            GoalIntent::Stabilize => {
                steps.push(GoalPlanStep::new(
                    steps.len(),
                    PlanAction::InspectAnomalies,
                    "Inspect active anomalies",
                    "Confirm the pressure is real before scaling",
                ));
                if let Some(step) = scale_step(steps.len(), params, RiskLevel::Medium, "Scale up execution client") {
                    steps.push(step);
                }
            }
            GoalIntent::Recover => {
                steps.push(GoalPlanStep::new(
                    steps.len(),
                    PlanAction::RunRca,
                    "Run root-cause analysis",
                    "Record why the component stalled",
                ));
                let component = params
                    .get("component")
                    .and_then(Value::as_str)
                    .unwrap_or("execution");
                steps.push(
                    GoalPlanStep::new(
                        steps.len(),
                        PlanAction::RestartExecution,
                        format!("Restart {component}"),
                        "Block production has stalled",
                    )
                    .with_parameters(json!({ "component": component }))
                    .with_precondition(PRECONDITION_WRITES_ALLOWED)
                    .with_rollback_hint("none; a restart has no inverse"),
                );
            }
            GoalIntent::Failover => {
                if let Some(endpoint) = params.get("endpoint").and_then(Value::as_str) {
                    let previous = params.get("previousEndpoint").cloned().unwrap_or(Value::Null);
                    let mut step = GoalPlanStep::new(
                        steps.len(),
                        PlanAction::SetRoutingPolicy,
                        "Switch L1 RPC endpoint",
                        "The active L1 RPC endpoint is unhealthy",
                    )
                    .with_parameters(json!({ "endpoint": endpoint, "previousEndpoint": previous }))
                    .with_precondition(PRECONDITION_WRITES_ALLOWED)
                    .with_precondition(PRECONDITION_L1_RPC_UNHEALTHY);
                    if let Some(prev) = previous.as_str() {
                        step = step.with_rollback_hint(format!("route back to {prev}"));
                    }
                    steps.push(step);
                } else {
                    steps.push(GoalPlanStep::new(
                        steps.len(),
                        PlanAction::InspectAnomalies,
                        "Inspect L1 RPC health",
                        "No fallback endpoint is configured",
                    ));
                }
            }
            GoalIntent::CostOptimize => {
                if let Some(step) = scale_step(steps.len(), params, RiskLevel::Low, "Scale down execution client") {
                    steps.push(step);
                }
            }
            GoalIntent::Investigate => {
                steps.push(GoalPlanStep::new(
                    steps.len(),
                    PlanAction::InspectAnomalies,
                    "Inspect active anomalies",
                    "Gather evidence for the operator",
                ));
                steps.push(GoalPlanStep::new(
                    steps.len(),
                    PlanAction::RunRca,
                    "Run root-cause analysis",
                    "Correlate the anomalies into a cause",
                ));
            }
        }

        GoalPlan {
            plan_id: Uuid::new_v4(),
            goal: goal.to_string(),
            intent,
            plan_version: PlanVersion::V1Rule,
            replan_count: 0,
            failure_reason_code: None,
            status: PlanStatus::Planned,
            dry_run,
            steps,
            created_at: now,
        }
    }

    /// The same plan with its write steps dropped.
    pub fn read_only_fallback(plan: &GoalPlan, reason: ValidationFailure, now: DateTime<Utc>) -> GoalPlan {
        let mut steps: Vec<GoalPlanStep> = plan
            .steps
            .iter()
            .filter(|s| !s.is_write())
            .cloned()
            .collect();
        if steps.is_empty() {
            steps.push(GoalPlanStep::new(
                0,
                PlanAction::CollectState,
                "Collect current state",
                "Write steps were dropped; record evidence only",
            ));
        }
        for (i, step) in steps.iter_mut().enumerate() {
            step.id = format!("step-{}", i + 1);
        }

        GoalPlan {
            plan_id: Uuid::new_v4(),
            goal: plan.goal.clone(),
            intent: plan.intent,
            plan_version: plan.plan_version,
            replan_count: plan.replan_count + 1,
            failure_reason_code: Some(reason.code().to_string()),
            status: PlanStatus::Planned,
            dry_run: plan.dry_run,
            steps,
            created_at: now,
        }
    }

    /// Plan a candidate and validate it. A runtime-precondition failure is
    /// replanned into a read-only fallback up to `max_replans` times; other
    /// failures are final.
    pub fn plan_and_validate(
        &self,
        candidate: &GoalCandidate,
        request: &ValidationRequest<'_>,
        now: DateTime<Utc>,
    ) -> PlanOutcome {
        self.validate_with_replan(self.build_plan(candidate, request.dry_run, now), request, now)
    }

    pub fn validate_with_replan(
        &self,
        mut plan: GoalPlan,
        request: &ValidationRequest<'_>,
        now: DateTime<Utc>,
    ) -> PlanOutcome {
        loop {
            match PlanValidator::validate(&plan, request) {
                PlanValidation::Valid { .. } => return PlanOutcome::Ready(plan),
                PlanValidation::Invalid {
                    failure_reason_code: ValidationFailure::RuntimePreconditionFailed,
                    message,
                    ..
                } if plan.replan_count < self.max_replans => {
                    info!(
                        plan_id = %plan.plan_id,
                        replan_count = plan.replan_count + 1,
                        reason = %message,
                        "replanning into read-only fallback"
                    );
                    plan = Self::read_only_fallback(&plan, ValidationFailure::RuntimePreconditionFailed, now);
                }
                PlanValidation::Invalid {
                    failure_reason_code,
                    message,
                    ..
                } => {
                    warn!(plan_id = %plan.plan_id, reason = %failure_reason_code, "plan rejected");
                    plan.failure_reason_code = Some(failure_reason_code.code().to_string());
                    return PlanOutcome::Rejected {
                        plan,
                        failure: failure_reason_code,
                        message,
                    };
                }
            }
        }
    }
}

fn scale_step(index: usize, params: &Value, risk: RiskLevel, title: &str) -> Option<GoalPlanStep> {
    let target = params.get("targetVcpu").and_then(Value::as_u64)?;
    let current = params.get("currentVcpu").and_then(Value::as_u64);
    let mut step = GoalPlanStep::new(index, PlanAction::ScaleExecution, title, format!("Move to {target} vCPU"))
        .with_parameters(json!({ "targetVcpu": target, "previousVcpu": current }))
        .with_precondition(PRECONDITION_WRITES_ALLOWED)
        .with_precondition(PRECONDITION_COOLDOWN_CLEAR);
    if let Some(current) = current {
        step = step.with_rollback_hint(format!("scale back to {current} vCPU"));
    }
    step.risk = risk;
    Some(step)
}
