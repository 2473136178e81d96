use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::canonical::hash_canonical;
use crate::types::{CandidateId, PlanId};

// ── Risk ───────────────────────────────────────────────────────

/// How much damage a goal (or a single step) can do if it goes wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Intent / source ────────────────────────────────────────────

/// What a goal is trying to achieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalIntent {
    /// Relieve resource pressure on the execution client.
    Stabilize,
    /// Bring a stalled component back.
    Recover,
    /// Route away from an unhealthy L1 RPC endpoint.
    Failover,
    /// Give back capacity that is not being used.
    CostOptimize,
    /// Collect evidence only; never writes.
    Investigate,
}

impl GoalIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stabilize => "stabilize",
            Self::Recover => "recover",
            Self::Failover => "failover",
            Self::CostOptimize => "cost_optimize",
            Self::Investigate => "investigate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stabilize" => Some(Self::Stabilize),
            "recover" => Some(Self::Recover),
            "failover" => Some(Self::Failover),
            "cost_optimize" => Some(Self::CostOptimize),
            "investigate" => Some(Self::Investigate),
            _ => None,
        }
    }
}

impl fmt::Display for GoalIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which signal produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalSource {
    Anomaly,
    Metrics,
    Rca,
    Manual,
}

// ── Score ──────────────────────────────────────────────────────

pub const IMPACT_MAX: f64 = 40.0;
pub const URGENCY_MAX: f64 = 30.0;
pub const CONFIDENCE_MAX: f64 = 20.0;
pub const POLICY_FIT_MAX: f64 = 10.0;

/// Bounded sub-scores and their sum. `total` is the dispatch priority.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalScore {
    pub impact: f64,
    pub urgency: f64,
    pub confidence: f64,
    pub policy_fit: f64,
    pub total: f64,
}

impl GoalScore {
    /// Build a score, clamping every component to its range.
    pub fn new(impact: f64, urgency: f64, confidence: f64, policy_fit: f64) -> Self {
        let impact = impact.clamp(0.0, IMPACT_MAX);
        let urgency = urgency.clamp(0.0, URGENCY_MAX);
        let confidence = confidence.clamp(0.0, CONFIDENCE_MAX);
        let policy_fit = policy_fit.clamp(0.0, POLICY_FIT_MAX);
        Self {
            impact,
            urgency,
            confidence,
            policy_fit,
            total: impact + urgency + confidence + policy_fit,
        }
    }
}

// ── Candidate ──────────────────────────────────────────────────

/// A proposed goal, before it is accepted into the execution queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalCandidate {
    pub id: CandidateId,
    /// Human-readable goal statement.
    pub goal: String,
    pub intent: GoalIntent,
    pub source: GoalSource,
    pub risk: RiskLevel,
    /// In [0, 1].
    pub confidence: f64,
    /// Stable hash of intent + salient parameters.
    pub signature: String,
    pub score: GoalScore,
    /// Salient parameters (target vCPU, endpoint, component...).
    #[serde(default)]
    pub params: Value,
    pub generated_at: DateTime<Utc>,
}

impl GoalCandidate {
    pub fn new(
        goal: impl Into<String>,
        intent: GoalIntent,
        source: GoalSource,
        risk: RiskLevel,
        confidence: f64,
        params: Value,
        score: GoalScore,
        now: DateTime<Utc>,
    ) -> Self {
        let signature = goal_signature(intent, &params);
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            intent,
            source,
            risk,
            confidence: confidence.clamp(0.0, 1.0),
            signature,
            score,
            params,
            generated_at: now,
        }
    }
}

/// Stable signature of a goal: the same intent with the same salient
/// parameters always hashes to the same value regardless of key order.
pub fn goal_signature(intent: GoalIntent, params: &Value) -> String {
    hash_canonical(&serde_json::json!({ "intent": intent.as_str(), "params": params }))
}

// ── Plan ───────────────────────────────────────────────────────

/// The closed set of actions a plan step may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    CollectState,
    InspectAnomalies,
    RunRca,
    ScaleExecution,
    RestartExecution,
    SetRoutingPolicy,
}

impl PlanAction {
    pub const ALL: [PlanAction; 6] = [
        Self::CollectState,
        Self::InspectAnomalies,
        Self::RunRca,
        Self::ScaleExecution,
        Self::RestartExecution,
        Self::SetRoutingPolicy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CollectState => "collect_state",
            Self::InspectAnomalies => "inspect_anomalies",
            Self::RunRca => "run_rca",
            Self::ScaleExecution => "scale_execution",
            Self::RestartExecution => "restart_execution",
            Self::SetRoutingPolicy => "set_routing_policy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }

    /// Whether the action changes live infrastructure.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::ScaleExecution | Self::RestartExecution | Self::SetRoutingPolicy
        )
    }

    /// Name of the executor capability that carries out this step.
    pub fn executor_action(&self) -> &'static str {
        match self {
            Self::CollectState => "collect_state",
            Self::InspectAnomalies => "inspect_anomalies",
            Self::RunRca => "run_rca",
            Self::ScaleExecution => "scale_component",
            Self::RestartExecution => "restart_component",
            Self::SetRoutingPolicy => "switch_l1_rpc",
        }
    }
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanVersion {
    #[serde(rename = "v1-rule")]
    V1Rule,
    #[serde(rename = "v2-llm")]
    V2Llm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planned,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// A single step of a goal plan.
///
/// `action` stays a plain string because plans can arrive from outside the
/// engine (MCP callers, model-generated plans); the validator checks it
/// against [`PlanAction`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalPlanStep {
    pub id: String,
    pub title: String,
    pub action: String,
    #[serde(default)]
    pub reason: String,
    pub risk: RiskLevel,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_hint: Option<String>,
    pub status: StepStatus,
    /// Executor output once the step ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl GoalPlanStep {
    pub fn new(index: usize, action: PlanAction, title: impl Into<String>, reason: impl Into<String>) -> Self {
        let risk = match action {
            PlanAction::CollectState | PlanAction::InspectAnomalies | PlanAction::RunRca => {
                RiskLevel::Low
            }
            PlanAction::ScaleExecution => RiskLevel::Medium,
            PlanAction::RestartExecution | PlanAction::SetRoutingPolicy => RiskLevel::High,
        };
        Self {
            id: format!("step-{}", index + 1),
            title: title.into(),
            action: action.as_str().to_string(),
            reason: reason.into(),
            risk,
            requires_approval: action.is_write(),
            parameters: None,
            preconditions: Vec::new(),
            rollback_hint: None,
            status: StepStatus::Pending,
            output: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_precondition(mut self, precondition: impl Into<String>) -> Self {
        self.preconditions.push(precondition.into());
        self
    }

    pub fn with_rollback_hint(mut self, hint: impl Into<String>) -> Self {
        self.rollback_hint = Some(hint.into());
        self
    }

    /// The typed action, if the step names a supported one.
    pub fn plan_action(&self) -> Option<PlanAction> {
        PlanAction::parse(&self.action)
    }

    pub fn is_write(&self) -> bool {
        self.plan_action().is_some_and(|a| a.is_write())
    }
}

/// A goal broken into executable steps. Built once per dispatch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalPlan {
    pub plan_id: PlanId,
    pub goal: String,
    pub intent: GoalIntent,
    pub plan_version: PlanVersion,
    pub replan_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason_code: Option<String>,
    pub status: PlanStatus,
    pub dry_run: bool,
    pub steps: Vec<GoalPlanStep>,
    pub created_at: DateTime<Utc>,
}

impl GoalPlan {
    pub fn has_write_steps(&self) -> bool {
        self.steps.iter().any(|s| s.is_write())
    }

    /// Highest step risk, `Low` for an empty plan.
    pub fn max_risk(&self) -> RiskLevel {
        self.steps.iter().map(|s| s.risk).max().unwrap_or(RiskLevel::Low)
    }
}
