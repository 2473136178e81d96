use rollpilot_core::RiskLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::level::AutonomyLevel;
use crate::runtime_policy::RuntimeAutonomyPolicy;

// ── Decisions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
    RequireApproval,
    RequireMultiApproval,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::RequireApproval => "require_approval",
            Self::RequireMultiApproval => "require_multi_approval",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyReasonCode {
    Allowed,
    ApiKeyNotConfigured,
    ApiKeyInvalid,
    ReadOnlyWriteBlocked,
    ApprovalRequired,
    MultiApprovalRequired,
    AutonomyLevelBlocked,
    AutonomyDryRunOnly,
    RiskExceedsAutonomyLevel,
    ConfidenceBelowDryRunThreshold,
    ConfidenceBelowWriteThreshold,
}

impl PolicyReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::ApiKeyNotConfigured => "api_key_not_configured",
            Self::ApiKeyInvalid => "api_key_invalid",
            Self::ReadOnlyWriteBlocked => "read_only_write_blocked",
            Self::ApprovalRequired => "approval_required",
            Self::MultiApprovalRequired => "multi_approval_required",
            Self::AutonomyLevelBlocked => "autonomy_level_blocked",
            Self::AutonomyDryRunOnly => "autonomy_dry_run_only",
            Self::RiskExceedsAutonomyLevel => "risk_exceeds_autonomy_level",
            Self::ConfidenceBelowDryRunThreshold => "confidence_below_dry_run_threshold",
            Self::ConfidenceBelowWriteThreshold => "confidence_below_write_threshold",
        }
    }
}

impl fmt::Display for PolicyReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a policy evaluation. Denials are values, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub decision: Decision,
    pub reason_code: PolicyReasonCode,
    pub message: String,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            reason_code: PolicyReasonCode::Allowed,
            message: "allowed".into(),
        }
    }

    pub fn deny(reason_code: PolicyReasonCode, message: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason_code,
            message: message.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }

    pub fn is_denied(&self) -> bool {
        self.decision == Decision::Deny
    }
}

// ── MCP tool policy ────────────────────────────────────────────

/// Everything the tool policy needs to know about one call.
#[derive(Debug, Clone, Default)]
pub struct McpToolPolicyInput<'a> {
    pub tool_name: &'a str,
    pub is_write: bool,
    pub configured_api_key: Option<&'a str>,
    pub provided_api_key: Option<&'a str>,
    pub read_only_mode: bool,
    /// The tool is exempt from read-only mode.
    pub read_only_override: bool,
    pub approval_required: bool,
    pub multi_approval_required: bool,
}

/// A single ordered policy rule. `None` means "not my call, ask the next rule".
pub trait ToolRule: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, input: &McpToolPolicyInput<'_>) -> Option<PolicyDecision>;
}

/// Applies rules in registration order; the first rule that answers wins,
/// and a call no rule objects to is allowed.
pub struct GuardrailEngine {
    rules: Vec<Box<dyn ToolRule>>,
}

impl Default for GuardrailEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardrailEngine {
    pub fn new() -> Self {
        let mut engine = Self::empty();
        engine.add_rule(Box::new(ApiKeyConfiguredRule));
        engine.add_rule(Box::new(ApiKeyMatchRule));
        engine.add_rule(Box::new(ReadOnlyWriteRule));
        engine.add_rule(Box::new(WriteApprovalRule));
        engine
    }

    /// An engine with no rules; allows everything until rules are added.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Credential rules only, for gating approval issuance.
    pub fn credentials_only() -> Self {
        let mut engine = Self::empty();
        engine.add_rule(Box::new(ApiKeyConfiguredRule));
        engine.add_rule(Box::new(ApiKeyMatchRule));
        engine
    }

    pub fn add_rule(&mut self, rule: Box<dyn ToolRule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn evaluate(&self, input: &McpToolPolicyInput<'_>) -> PolicyDecision {
        for rule in &self.rules {
            if let Some(decision) = rule.evaluate(input) {
                info!(
                    rule = rule.name(),
                    tool = input.tool_name,
                    decision = %decision.decision,
                    reason = %decision.reason_code,
                    "tool policy rule matched"
                );
                return decision;
            }
        }
        debug!(tool = input.tool_name, "tool policy allowed");
        PolicyDecision::allow()
    }
}

// ── Built-in rules ─────────────────────────────────────────────

struct ApiKeyConfiguredRule;

impl ToolRule for ApiKeyConfiguredRule {
    fn name(&self) -> &str {
        "api_key_configured"
    }

    fn evaluate(&self, input: &McpToolPolicyInput<'_>) -> Option<PolicyDecision> {
        match input.configured_api_key {
            Some(key) if !key.is_empty() => None,
            _ => Some(PolicyDecision::deny(
                PolicyReasonCode::ApiKeyNotConfigured,
                "no API key is configured; all tool calls are refused",
            )),
        }
    }
}

struct ApiKeyMatchRule;

impl ToolRule for ApiKeyMatchRule {
    fn name(&self) -> &str {
        "api_key_match"
    }

    fn evaluate(&self, input: &McpToolPolicyInput<'_>) -> Option<PolicyDecision> {
        let configured = input.configured_api_key.unwrap_or_default();
        match input.provided_api_key {
            Some(provided) if keys_match(configured, provided) => None,
            _ => Some(PolicyDecision::deny(
                PolicyReasonCode::ApiKeyInvalid,
                "missing or invalid API key",
            )),
        }
    }
}

struct ReadOnlyWriteRule;

impl ToolRule for ReadOnlyWriteRule {
    fn name(&self) -> &str {
        "read_only_write"
    }

    fn evaluate(&self, input: &McpToolPolicyInput<'_>) -> Option<PolicyDecision> {
        if input.is_write && input.read_only_mode && !input.read_only_override {
            return Some(PolicyDecision::deny(
                PolicyReasonCode::ReadOnlyWriteBlocked,
                format!("'{}' is a write tool and read-only mode is on", input.tool_name),
            ));
        }
        None
    }
}

struct WriteApprovalRule;

impl ToolRule for WriteApprovalRule {
    fn name(&self) -> &str {
        "write_approval"
    }

    fn evaluate(&self, input: &McpToolPolicyInput<'_>) -> Option<PolicyDecision> {
        if !input.is_write {
            return None;
        }
        if input.multi_approval_required {
            return Some(PolicyDecision {
                decision: Decision::RequireMultiApproval,
                reason_code: PolicyReasonCode::MultiApprovalRequired,
                message: format!("'{}' needs approval from multiple approvers", input.tool_name),
            });
        }
        if input.approval_required {
            return Some(PolicyDecision {
                decision: Decision::RequireApproval,
                reason_code: PolicyReasonCode::ApprovalRequired,
                message: format!("'{}' needs an approval token", input.tool_name),
            });
        }
        None
    }
}

/// Length-independent comparison that does not stop at the first differing byte.
fn keys_match(configured: &str, provided: &str) -> bool {
    let (a, b) = (configured.as_bytes(), provided.as_bytes());
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= (x ^ y) as usize;
    }
    diff == 0
}

/// Evaluate a tool call against the built-in rule chain.
pub fn evaluate_mcp_tool_policy(input: &McpToolPolicyInput<'_>) -> PolicyDecision {
    GuardrailEngine::new().evaluate(input)
}

// ── Approval issuance ──────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ApprovalIssuePolicyInput<'a> {
    pub configured_api_key: Option<&'a str>,
    pub provided_api_key: Option<&'a str>,
}

/// Who may mint approval tickets: the same credential check as tool calls.
pub fn evaluate_mcp_approval_issue_policy(input: &ApprovalIssuePolicyInput<'_>) -> PolicyDecision {
    GuardrailEngine::credentials_only().evaluate(&McpToolPolicyInput {
        tool_name: "approvals/issue",
        configured_api_key: input.configured_api_key,
        provided_api_key: input.provided_api_key,
        ..Default::default()
    })
}

// ── Goal execution ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalExecutionPolicyInput {
    pub auto_execute: bool,
    pub allow_writes: bool,
    pub read_only_mode: bool,
}

/// Read-only mode beats a request to auto-execute with writes.
pub fn evaluate_goal_execution_policy(input: &GoalExecutionPolicyInput) -> PolicyDecision {
    if input.auto_execute && input.allow_writes && input.read_only_mode {
        return PolicyDecision::deny(
            PolicyReasonCode::ReadOnlyWriteBlocked,
            "auto-execution with writes is blocked while read-only mode is on",
        );
    }
    PolicyDecision::allow()
}

// ── Autonomy gate ──────────────────────────────────────────────

/// A plan about to be dispatched, as seen by the autonomy gate.
#[derive(Debug, Clone, Copy)]
pub struct AutonomyGateInput {
    pub policy: RuntimeAutonomyPolicy,
    pub dry_run: bool,
    pub has_write_steps: bool,
    pub risk: RiskLevel,
    pub confidence: f64,
}

/// Decide whether the runtime autonomy policy lets a plan run.
///
/// A live plan that may not write is denied outright; it is never quietly
/// turned into a dry run.
pub fn evaluate_autonomy_gate(input: &AutonomyGateInput) -> PolicyDecision {
    let policy = &input.policy;
    if !policy.level.allows_execution() {
        return PolicyDecision::deny(
            PolicyReasonCode::AutonomyLevelBlocked,
            format!("autonomy level {} does not dispatch goals", policy.level),
        );
    }

    if input.confidence < policy.min_confidence_dry_run {
        return PolicyDecision::deny(
            PolicyReasonCode::ConfidenceBelowDryRunThreshold,
            format!(
                "confidence {:.2} is below the dry-run threshold {:.2}",
                input.confidence, policy.min_confidence_dry_run
            ),
        );
    }

    if input.dry_run || !input.has_write_steps {
        return PolicyDecision::allow();
    }

    if policy.level == AutonomyLevel::DryRun {
        return PolicyDecision::deny(
            PolicyReasonCode::AutonomyDryRunOnly,
            format!("autonomy level {} only permits dry runs", policy.level),
        );
    }
    if !policy.level.permits_write_risk(input.risk) {
        return PolicyDecision::deny(
            PolicyReasonCode::RiskExceedsAutonomyLevel,
            format!(
                "{} risk exceeds what autonomy level {} may write",
                input.risk, policy.level
            ),
        );
    }
    if input.confidence < policy.min_confidence_write {
        return PolicyDecision::deny(
            PolicyReasonCode::ConfidenceBelowWriteThreshold,
            format!(
                "confidence {:.2} is below the write threshold {:.2}",
                input.confidence, policy.min_confidence_write
            ),
        );
    }
    PolicyDecision::allow()
}
