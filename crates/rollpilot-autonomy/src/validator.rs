use rollpilot_core::{GoalIntent, GoalPlan, GoalPlanStep, PlanAction, RuntimeContext};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Scaling is refused while the scaling cooldown is running.
pub const PRECONDITION_COOLDOWN_CLEAR: &str = "cooldown_clear";
/// The step would write and this run may not write.
pub const PRECONDITION_WRITES_ALLOWED: &str = "writes_allowed";
/// Scaling to the vCPU count already in place is a no-op.
pub const PRECONDITION_TARGET_VCPU_DIFFERS: &str = "target_vcpu_differs";
/// Failover only makes sense while the active L1 RPC is unhealthy.
pub const PRECONDITION_L1_RPC_UNHEALTHY: &str = "l1_rpc_unhealthy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFailure {
    InvalidStepAction,
    RuntimePreconditionFailed,
    SchemaInvalid,
}

impl ValidationFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidStepAction => "invalid_step_action",
            Self::RuntimePreconditionFailed => "runtime_precondition_failed",
            Self::SchemaInvalid => "schema_invalid",
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Run conditions the plan is validated against.
#[derive(Debug, Clone, Copy)]
pub struct ValidationRequest<'a> {
    pub dry_run: bool,
    pub allow_writes: bool,
    pub read_only_mode: bool,
    pub runtime: &'a RuntimeContext,
}

impl ValidationRequest<'_> {
    fn writes_permitted(&self) -> bool {
        self.dry_run || (self.allow_writes && !self.read_only_mode)
    }
}

#[derive(Debug, Clone)]
pub enum PlanValidation {
    Valid {
        intent: GoalIntent,
        steps: Vec<GoalPlanStep>,
    },
    Invalid {
        failure_reason_code: ValidationFailure,
        step_id: Option<String>,
        message: String,
    },
}

impl PlanValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    pub fn failure(&self) -> Option<ValidationFailure> {
        match self {
            Self::Valid { .. } => None,
            Self::Invalid { failure_reason_code, .. } => Some(*failure_reason_code),
        }
    }

    fn invalid(code: ValidationFailure, step: Option<&GoalPlanStep>, message: String) -> Self {
        Self::Invalid {
            failure_reason_code: code,
            step_id: step.map(|s| s.id.clone()),
            message,
        }
    }
}

/// Static and runtime checks over a proposed plan.
///
/// Checks run in a fixed order (action whitelist, runtime preconditions,
/// schema) across all steps, stopping at the first failure.
pub struct PlanValidator;

impl PlanValidator {
    pub fn validate(plan: &GoalPlan, request: &ValidationRequest<'_>) -> PlanValidation {
        let result = Self::run_checks(plan, request);
        if let PlanValidation::Invalid { failure_reason_code, message, .. } = &result {
            debug!(
                plan_id = %plan.plan_id,
                reason = failure_reason_code.code(),
                message = %message,
                "plan rejected"
            );
        }
        result
    }

    fn run_checks(plan: &GoalPlan, request: &ValidationRequest<'_>) -> PlanValidation {
        for step in &plan.steps {
            if step.plan_action().is_none() {
                return PlanValidation::invalid(
                    ValidationFailure::InvalidStepAction,
                    Some(step),
                    format!("unsupported step action '{}'", step.action),
                );
            }
        }

        for step in &plan.steps {
            if let Err(message) = check_preconditions(step, request) {
                return PlanValidation::invalid(
                    ValidationFailure::RuntimePreconditionFailed,
                    Some(step),
                    message,
                );
            }
        }

        if plan.steps.is_empty() {
            return PlanValidation::invalid(
                ValidationFailure::SchemaInvalid,
                None,
                "plan has no steps".into(),
            );
        }
        for step in &plan.steps {
            if let Err(message) = check_schema(step) {
                return PlanValidation::invalid(ValidationFailure::SchemaInvalid, Some(step), message);
            }
        }

        PlanValidation::Valid {
            intent: plan.intent,
            steps: plan.steps.clone(),
        }
    }
}

/// Preconditions implied by the action, plus any the step declares.
fn effective_preconditions(step: &GoalPlanStep) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    match step.plan_action() {
        Some(PlanAction::ScaleExecution) => {
            names.extend([
                PRECONDITION_WRITES_ALLOWED,
                PRECONDITION_COOLDOWN_CLEAR,
                PRECONDITION_TARGET_VCPU_DIFFERS,
            ]);
        }
        Some(action) if action.is_write() => names.push(PRECONDITION_WRITES_ALLOWED),
        _ => {}
    }
    for declared in &step.preconditions {
        if !names.contains(&declared.as_str()) {
            names.push(declared);
        }
    }
    names
}

fn check_preconditions(step: &GoalPlanStep, request: &ValidationRequest<'_>) -> Result<(), String> {
    let runtime = request.runtime;
    for name in effective_preconditions(step) {
        match name {
            PRECONDITION_WRITES_ALLOWED => {
                if !request.writes_permitted() {
                    return Err(format!(
                        "step '{}' writes but writes are blocked (allow_writes={}, read_only_mode={})",
                        step.id, request.allow_writes, request.read_only_mode
                    ));
                }
            }
            PRECONDITION_COOLDOWN_CLEAR => {
                if runtime.cooldown_remaining_secs > 0 {
                    return Err(format!(
                        "step '{}' scales while the cooldown has {}s remaining",
                        step.id, runtime.cooldown_remaining_secs
                    ));
                }
            }
            PRECONDITION_TARGET_VCPU_DIFFERS => {
                let target = target_vcpu(step);
                if let (Some(target), Some(current)) = (target, runtime.current_vcpu) {
                    if target == current {
                        return Err(format!("step '{}' targets the current {current} vCPU", step.id));
                    }
                }
            }
            PRECONDITION_L1_RPC_UNHEALTHY => {
                if runtime.l1_rpc_healthy == Some(true) {
                    return Err(format!(
                        "step '{}' fails over while the L1 RPC is healthy",
                        step.id
                    ));
                }
            }
            unknown => {
                return Err(format!("step '{}' declares unknown precondition '{unknown}'", step.id));
            }
        }
    }
    Ok(())
}

fn check_schema(step: &GoalPlanStep) -> Result<(), String> {
    if step.title.trim().is_empty() {
        return Err(format!("step '{}' has no title", step.id));
    }
    if step.action.trim().is_empty() {
        return Err(format!("step '{}' has no action", step.id));
    }
    if step.reason.trim().is_empty() {
        return Err(format!("step '{}' has no reason", step.id));
    }
    match step.plan_action() {
        Some(PlanAction::ScaleExecution) if target_vcpu(step).is_none_or(|v| v == 0) => {
            Err(format!("step '{}' needs a positive targetVcpu", step.id))
        }
        Some(PlanAction::SetRoutingPolicy) if target_endpoint(step).is_none() => {
            Err(format!("step '{}' needs an endpoint", step.id))
        }
        _ => Ok(()),
    }
}

pub(crate) fn target_vcpu(step: &GoalPlanStep) -> Option<u32> {
    step.parameters
        .as_ref()?
        .get("targetVcpu")?
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
}

pub(crate) fn target_endpoint(step: &GoalPlanStep) -> Option<&str> {
    step.parameters
        .as_ref()?
        .get("endpoint")?
        .as_str()
        .filter(|s| !s.trim().is_empty())
}
