//! # rollpilot-autonomy
//!
//! The guard layer in front of every autonomous action. Implements six autonomy
//! levels (A0-A5), the runtime autonomy policy, single-use approval tickets,
//! the ordered policy rules for tool calls and goal execution, the rule-based
//! goal planner, and the plan validator.

pub mod approval;
pub mod guardrail;
pub mod level;
pub mod planner;
pub mod runtime_policy;
pub mod validator;

pub use approval::{
    ApprovalFailure, ApprovalTicket, ApprovalTicketing, ApprovalValidation, IssueApprovalRequest,
    IssuedApproval, MemoryTicketStore, TicketStore, hash_approval_params,
};
pub use guardrail::{
    ApprovalIssuePolicyInput, AutonomyGateInput, Decision, GoalExecutionPolicyInput, GuardrailEngine,
    McpToolPolicyInput, PolicyDecision, PolicyReasonCode, ToolRule, evaluate_autonomy_gate,
    evaluate_goal_execution_policy, evaluate_mcp_approval_issue_policy, evaluate_mcp_tool_policy,
};
pub use level::AutonomyLevel;
pub use planner::{GoalPlanner, PlanOutcome};
pub use runtime_policy::{AutonomyPolicyStore, AutonomyPolicyUpdate, RuntimeAutonomyPolicy};
pub use validator::{PlanValidation, PlanValidator, ValidationFailure, ValidationRequest};
