//! MCP JSON-RPC gateway.
//!
//! Every tool call passes the tool policy (credential, read-only mode,
//! approval requirement) before it touches the engine. Calls that need
//! approval must carry a ticket minted through `approvals/issue`, either as
//! `params.approvalToken` or, for a `tools/call` envelope, in
//! `params.arguments.approvalToken`. Tools listed as multi-approval take an
//! `approvalTokens` array instead.

use chrono::{DateTime, Utc};
use rollpilot_autonomy::{
    ApprovalIssuePolicyInput, ApprovalTicketing, ApprovalValidation, Decision, GoalPlanner,
    GuardrailEngine, IssueApprovalRequest, McpToolPolicyInput, PlanOutcome, PolicyDecision,
    ValidationRequest, evaluate_mcp_approval_issue_policy,
};
use rollpilot_config::PolicyConfig;
use rollpilot_core::{ActionExecutor, ActionRequest, GoalId, GoalIntent, PlanAction};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::orchestrator::{DispatchOptions, GoalManager};
use crate::runner::bounded;
use crate::verifier::{VerifyRequest, expected_state};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const POLICY_DENIED: i64 = -32001;
pub const APPROVAL_REJECTED: i64 = -32002;

// ── Wire types ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self { code: PARSE_ERROR, message: msg.into(), data: None }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self { code: INVALID_REQUEST, message: msg.into(), data: None }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self { code: METHOD_NOT_FOUND, message: format!("method not found: {method}"), data: None }
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self { code: INVALID_PARAMS, message: msg.into(), data: None }
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self { code: INTERNAL_ERROR, message: msg.into(), data: None }
    }

    pub fn policy_denied(decision: &PolicyDecision) -> Self {
        Self {
            code: POLICY_DENIED,
            message: decision.message.clone(),
            data: Some(json!({ "decision": decision.decision, "reasonCode": decision.reason_code })),
        }
    }

    pub fn approval_rejected(decision: Decision, reason_code: &str, message: impl Into<String>) -> Self {
        Self {
            code: APPROVAL_REJECTED,
            message: message.into(),
            data: Some(json!({ "decision": decision, "reasonCode": reason_code })),
        }
    }

    /// `data.reasonCode`, when present.
    pub fn reason_code(&self) -> Option<&str> {
        self.data.as_ref()?.get("reasonCode")?.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0".into(), id, result: Some(result), error: None }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self { jsonrpc: "2.0".into(), id, result: None, error: Some(error) }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Caller facts established by the boundary layer (e.g. an HTTP header).
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub api_key: Option<String>,
    /// Fixed clock for approval checks and dispatch; wall clock when `None`.
    pub now: Option<DateTime<Utc>>,
}

impl CallContext {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self { api_key: Some(api_key.into()), now: None }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }
}

// ── Tools ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpTool {
    GetGoalManagerState,
    PlanGoal,
    ExecuteGoalPlan,
    ScaleComponent,
    RestartComponent,
    SwitchL1Rpc,
    ReplayGoalDlq,
}

impl McpTool {
    pub const ALL: [McpTool; 7] = [
        Self::GetGoalManagerState,
        Self::PlanGoal,
        Self::ExecuteGoalPlan,
        Self::ScaleComponent,
        Self::RestartComponent,
        Self::SwitchL1Rpc,
        Self::ReplayGoalDlq,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetGoalManagerState => "get_goal_manager_state",
            Self::PlanGoal => "plan_goal",
            Self::ExecuteGoalPlan => "execute_goal_plan",
            Self::ScaleComponent => "scale_component",
            Self::RestartComponent => "restart_component",
            Self::SwitchL1Rpc => "switch_l1_rpc",
            Self::ReplayGoalDlq => "replay_goal_dlq",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    fn description(&self) -> &'static str {
        match self {
            Self::GetGoalManagerState => "Queue, dead-letter queue, leases, suppressions and recent checkpoints",
            Self::PlanGoal => "Build and validate a plan for an intent without running it",
            Self::ExecuteGoalPlan => "Dispatch the top queued goal (dry run unless allowWrites and dryRun=false)",
            Self::ScaleComponent => "Scale the execution client to a vCPU tier",
            Self::RestartComponent => "Restart a rollup component",
            Self::SwitchL1Rpc => "Route L1 RPC traffic to another endpoint",
            Self::ReplayGoalDlq => "Move a dead-lettered goal back to the queue",
        }
    }

    fn input_schema(&self) -> Value {
        match self {
            Self::GetGoalManagerState => json!({
                "type": "object",
                "properties": { "limit": { "type": "integer", "minimum": 1 } }
            }),
            Self::PlanGoal => json!({
                "type": "object",
                "properties": {
                    "intent": { "type": "string", "enum": ["stabilize", "recover", "failover", "cost_optimize", "investigate"] },
                    "goal": { "type": "string" },
                    "params": { "type": "object" },
                    "dryRun": { "type": "boolean" }
                },
                "required": ["intent"]
            }),
            Self::ExecuteGoalPlan => json!({
                "type": "object",
                "properties": {
                    "dryRun": { "type": "boolean" },
                    "allowWrites": { "type": "boolean" }
                }
            }),
            Self::ScaleComponent => json!({
                "type": "object",
                "properties": {
                    "targetVcpu": { "type": "integer", "enum": [1, 2, 4, 8] },
                    "component": { "type": "string" }
                },
                "required": ["targetVcpu"]
            }),
            Self::RestartComponent => json!({
                "type": "object",
                "properties": { "component": { "type": "string" } },
                "required": ["component"]
            }),
            Self::SwitchL1Rpc => json!({
                "type": "object",
                "properties": { "endpoint": { "type": "string" } },
                "required": ["endpoint"]
            }),
            Self::ReplayGoalDlq => json!({
                "type": "object",
                "properties": { "goalId": { "type": "string", "format": "uuid" } },
                "required": ["goalId"]
            }),
        }
    }

    /// Whether this particular call can change live infrastructure or engine state.
    pub fn is_write(&self, arguments: &Value) -> bool {
        match self {
            Self::GetGoalManagerState | Self::PlanGoal => false,
            Self::ExecuteGoalPlan => {
                let dry_run = arguments.get("dryRun").and_then(Value::as_bool).unwrap_or(true);
                let allow_writes = arguments.get("allowWrites").and_then(Value::as_bool).unwrap_or(false);
                allow_writes && !dry_run
            }
            Self::ScaleComponent | Self::RestartComponent | Self::SwitchL1Rpc | Self::ReplayGoalDlq => true,
        }
    }

    fn descriptor(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "inputSchema": self.input_schema(),
            "annotations": {
                "readOnlyHint": matches!(self, Self::GetGoalManagerState | Self::PlanGoal),
            },
        })
    }
}

/// A tool call with its arguments checked.
enum ToolCall {
    State { limit: usize },
    Plan { intent: GoalIntent, goal: String, params: Value, dry_run: bool },
    Execute { dry_run: bool, allow_writes: bool },
    Direct { action: PlanAction, params: Value },
    Replay { goal_id: GoalId },
}

fn parse_call(tool: McpTool, args: &Value) -> Result<ToolCall, String> {
    let str_arg = |key: &str| args.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty());
    match tool {
        McpTool::GetGoalManagerState => {
            let limit = match args.get("limit") {
                None | Some(Value::Null) => 20,
                Some(v) => v
                    .as_u64()
                    .filter(|n| *n > 0)
                    .ok_or("limit must be a positive integer")? as usize,
            };
            Ok(ToolCall::State { limit })
        }
        McpTool::PlanGoal => {
            let raw = str_arg("intent").ok_or("intent is required")?;
            let intent = GoalIntent::parse(raw).ok_or_else(|| format!("unknown intent: {raw}"))?;
            Ok(ToolCall::Plan {
                intent,
                goal: str_arg("goal").map(str::to_string).unwrap_or_else(|| format!("Operator-requested {intent}")),
                params: args.get("params").cloned().unwrap_or_else(|| json!({})),
                dry_run: args.get("dryRun").and_then(Value::as_bool).unwrap_or(true),
            })
        }
        McpTool::ExecuteGoalPlan => Ok(ToolCall::Execute {
            dry_run: args.get("dryRun").and_then(Value::as_bool).unwrap_or(true),
            allow_writes: args.get("allowWrites").and_then(Value::as_bool).unwrap_or(false),
        }),
        McpTool::ScaleComponent => {
            let target = args
                .get("targetVcpu")
                .and_then(Value::as_u64)
                .filter(|v| rollpilot_core::VCPU_TIERS.contains(&(*v as u32)))
                .ok_or("targetVcpu must be one of 1, 2, 4, 8")?;
            let mut params = json!({ "targetVcpu": target });
            if let Some(component) = str_arg("component") {
                params["component"] = json!(component);
            }
            Ok(ToolCall::Direct { action: PlanAction::ScaleExecution, params })
        }
        McpTool::RestartComponent => {
            let component = str_arg("component").ok_or("component is required")?;
            Ok(ToolCall::Direct {
                action: PlanAction::RestartExecution,
                params: json!({ "component": component }),
            })
        }
        McpTool::SwitchL1Rpc => {
            let endpoint = str_arg("endpoint").ok_or("endpoint is required")?;
            Ok(ToolCall::Direct {
                action: PlanAction::SetRoutingPolicy,
                params: json!({ "endpoint": endpoint }),
            })
        }
        McpTool::ReplayGoalDlq => {
            let raw = str_arg("goalId").ok_or("goalId is required")?;
            let goal_id = uuid::Uuid::parse_str(raw).map_err(|e| format!("goalId is not a uuid: {e}"))?;
            Ok(ToolCall::Replay { goal_id })
        }
    }
}

/// Tool output as MCP text content.
fn tool_text_content(payload: &Value) -> Value {
    json!({
        "type": "text",
        "text": serde_json::to_string_pretty(payload).unwrap_or_else(|_| "{}".to_string()),
    })
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

// ── Gateway ────────────────────────────────────────────────────

/// Serves MCP requests against one goal manager.
pub struct McpGateway {
    manager: Arc<GoalManager>,
    executor: Arc<dyn ActionExecutor>,
    ticketing: ApprovalTicketing,
    guardrails: GuardrailEngine,
    policy: PolicyConfig,
    action_timeout: std::time::Duration,
}

impl McpGateway {
    pub fn new(
        manager: Arc<GoalManager>,
        executor: Arc<dyn ActionExecutor>,
        policy: PolicyConfig,
        action_timeout_secs: u64,
    ) -> Self {
        let ticketing = ApprovalTicketing::new(
            manager.store().clone().ticket_store(),
            policy.approval_ttl_secs,
            policy.max_approval_ttl_secs,
        )
        .with_events(manager.events().clone());
        Self {
            manager,
            executor,
            ticketing,
            guardrails: GuardrailEngine::new(),
            policy,
            action_timeout: std::time::Duration::from_secs(action_timeout_secs.max(1)),
        }
    }

    pub fn ticketing(&self) -> &ApprovalTicketing {
        &self.ticketing
    }

    /// Handle one raw JSON-RPC message.
    pub async fn handle(&self, raw: Value, ctx: &CallContext) -> JsonRpcResponse {
        let id = raw.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(raw) {
            Ok(request) => self.handle_request(request, ctx).await,
            Err(e) => JsonRpcResponse::failure(id, JsonRpcError::invalid_request(e.to_string())),
        }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest, ctx: &CallContext) -> JsonRpcResponse {
        let id = request.id.clone().unwrap_or(Value::Null);
        if request.jsonrpc != "2.0" {
            return JsonRpcResponse::failure(id, JsonRpcError::invalid_request("jsonrpc must be \"2.0\""));
        }
        if request.method.is_empty() {
            return JsonRpcResponse::failure(id, JsonRpcError::invalid_request("method is required"));
        }
        let params = request.params.unwrap_or_else(|| json!({}));
        if !params.is_object() {
            return JsonRpcResponse::failure(id, JsonRpcError::invalid_params("params must be an object"));
        }
        debug!(method = %request.method, "mcp request");

        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.initialize()),
            "tools/list" => Ok(json!({
                "tools": McpTool::ALL.iter().map(McpTool::descriptor).collect::<Vec<_>>(),
            })),
            "approvals/issue" => self.issue_approval(&params, ctx),
            "tools/call" => self.tools_call(&params, ctx).await,
            method => match McpTool::parse(method) {
                Some(tool) => self.call_tool(tool, &params, &params, ctx).await,
                None => Err(JsonRpcError::method_not_found(method)),
            },
        };
        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => {
                if matches!(error.code, POLICY_DENIED | APPROVAL_REJECTED) {
                    info!(method = %request.method, code = error.code, reason = ?error.reason_code(), "mcp call refused");
                }
                JsonRpcResponse::failure(id, error)
            }
        }
    }

    fn initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": { "name": "rollpilot", "version": env!("CARGO_PKG_VERSION") },
            "capabilities": { "tools": { "listChanged": false } },
        })
    }

    async fn tools_call(&self, params: &Value, ctx: &CallContext) -> Result<Value, JsonRpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("tools/call requires a tool name"))?;
        let tool = McpTool::parse(name).ok_or_else(|| JsonRpcError::method_not_found(name))?;
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        if !arguments.is_object() {
            return Err(JsonRpcError::invalid_params("arguments must be an object"));
        }

        let payload = self.call_tool(tool, params, &arguments, ctx).await?;
        let is_error = payload.get("status").and_then(Value::as_str) == Some("failed");
        Ok(json!({
            "content": [tool_text_content(&payload)],
            "structuredContent": payload,
            "isError": is_error,
        }))
    }

    /// Policy, then argument checks, then approval, then the tool itself.
    async fn call_tool(
        &self,
        tool: McpTool,
        envelope: &Value,
        arguments: &Value,
        ctx: &CallContext,
    ) -> Result<Value, JsonRpcError> {
        let name = tool.name();
        let decision = self.guardrails.evaluate(&McpToolPolicyInput {
            tool_name: name,
            is_write: tool.is_write(arguments),
            configured_api_key: self.policy.api_key.as_deref(),
            provided_api_key: ctx.api_key.as_deref(),
            read_only_mode: self.policy.read_only_mode,
            read_only_override: self.policy.read_only_exempt_tools.iter().any(|t| t == name),
            approval_required: self.policy.approval_required_for_writes,
            multi_approval_required: self.policy.multi_approval_tools.iter().any(|t| t == name),
        });
        if decision.is_denied() {
            return Err(JsonRpcError::policy_denied(&decision));
        }

        let call = parse_call(tool, arguments).map_err(JsonRpcError::invalid_params)?;

        match decision.decision {
            Decision::RequireApproval => self.consume_single(tool, envelope, arguments, &decision, ctx)?,
            Decision::RequireMultiApproval => self.consume_many(tool, envelope, arguments, &decision, ctx)?,
            Decision::Allow | Decision::Deny => {}
        }

        self.run_tool(call, ctx).await
    }

    fn consume_single(
        &self,
        tool: McpTool,
        envelope: &Value,
        arguments: &Value,
        decision: &PolicyDecision,
        ctx: &CallContext,
    ) -> Result<(), JsonRpcError> {
        let token = envelope
            .get("approvalToken")
            .or_else(|| arguments.get("approvalToken"))
            .and_then(Value::as_str);
        let Some(token) = token else {
            return Err(JsonRpcError::approval_rejected(
                decision.decision,
                decision.reason_code.as_str(),
                format!("{} requires an approval token", tool.name()),
            ));
        };
        let validation = self
            .ticketing
            .validate_and_consume(token, tool.name(), arguments, ctx.now());
        approval_outcome(validation, decision.decision)
    }

    fn consume_many(
        &self,
        tool: McpTool,
        envelope: &Value,
        arguments: &Value,
        decision: &PolicyDecision,
        ctx: &CallContext,
    ) -> Result<(), JsonRpcError> {
        let tokens: Vec<String> = envelope
            .get("approvalTokens")
            .or_else(|| arguments.get("approvalTokens"))
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        if tokens.is_empty() {
            return Err(JsonRpcError::approval_rejected(
                decision.decision,
                decision.reason_code.as_str(),
                format!(
                    "{} requires approval tokens from {} distinct approvers",
                    tool.name(),
                    self.policy.min_distinct_approvers
                ),
            ));
        }
        let validation = self.ticketing.validate_and_consume_many(
            &tokens,
            tool.name(),
            arguments,
            self.policy.min_distinct_approvers,
            ctx.now(),
        );
        approval_outcome(validation, decision.decision)
    }

    async fn run_tool(&self, call: ToolCall, ctx: &CallContext) -> Result<Value, JsonRpcError> {
        let now = ctx.now();
        match call {
            ToolCall::State { limit } => to_result(&self.manager.list_state(limit)),
            ToolCall::Plan { intent, goal, params, dry_run } => {
                let runtime = bounded(self.action_timeout, "runtime_context", self.manager.probe().runtime_context())
                    .await
                    .map_err(|e| JsonRpcError::internal_error(format!("state probe unavailable: {e}")))?;
                let plan = GoalPlanner::plan_for_intent(intent, &goal, &params, dry_run, now);
                let request = ValidationRequest {
                    dry_run,
                    allow_writes: !dry_run,
                    read_only_mode: self.manager.read_only_mode(),
                    runtime: &runtime,
                };
                let outcome = match self.manager.planner().validate_with_replan(plan, &request, now) {
                    PlanOutcome::Ready(plan) => json!({ "valid": true, "plan": plan }),
                    PlanOutcome::Rejected { plan, failure, message } => json!({
                        "valid": false,
                        "failureReasonCode": failure.code(),
                        "message": message,
                        "plan": plan,
                    }),
                };
                Ok(outcome)
            }
            ToolCall::Execute { dry_run, allow_writes } => {
                let result = self
                    .manager
                    .dispatch_top_goal(DispatchOptions {
                        now: ctx.now,
                        dry_run,
                        allow_writes,
                        initiated_by: "mcp".into(),
                    })
                    .await;
                to_result(&result)
            }
            ToolCall::Direct { action, params } => self.run_direct(action, params, now).await,
            ToolCall::Replay { goal_id } => to_result(&self.manager.replay_dlq(goal_id, now)),
        }
    }

    /// Run one write action directly and verify it.
    async fn run_direct(&self, action: PlanAction, params: Value, now: DateTime<Utc>) -> Result<Value, JsonRpcError> {
        let request = ActionRequest::new(action.executor_action(), params.clone());
        let outcome = bounded(
            self.action_timeout,
            action.executor_action(),
            self.executor.execute_action(&request),
        )
        .await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(action = action.executor_action(), error = %e, "direct action failed");
                return Ok(json!({ "status": "failed", "message": e.to_string() }));
            }
        };
        info!(action = action.executor_action(), status = ?outcome.status, "direct action executed");

        let verification = if outcome.is_success() {
            let verify = VerifyRequest {
                action_type: action,
                dry_run: false,
                expected: expected_state(action, &params),
                observed: None,
            };
            Some(self.manager.verifier().verify_operation_outcome(&verify, now).await)
        } else {
            None
        };
        Ok(json!({
            "status": outcome.status,
            "output": outcome.output,
            "message": outcome.message,
            "verification": verification,
        }))
    }

    fn issue_approval(&self, params: &Value, ctx: &CallContext) -> Result<Value, JsonRpcError> {
        let decision = evaluate_mcp_approval_issue_policy(&ApprovalIssuePolicyInput {
            configured_api_key: self.policy.api_key.as_deref(),
            provided_api_key: ctx.api_key.as_deref(),
        });
        if decision.is_denied() {
            return Err(JsonRpcError::policy_denied(&decision));
        }
        let request: IssueApprovalRequest = serde_json::from_value(params.clone())
            .map_err(|e| JsonRpcError::invalid_params(format!("invalid approval request: {e}")))?;
        if McpTool::parse(&request.tool_name).is_none() {
            return Err(JsonRpcError::invalid_params(format!("unknown tool: {}", request.tool_name)));
        }
        let issued = self
            .ticketing
            .issue(&request, ctx.now())
            .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;
        to_result(&issued)
    }
}

fn approval_outcome(validation: ApprovalValidation, decision: Decision) -> Result<(), JsonRpcError> {
    match validation {
        ApprovalValidation::Approved { .. } => Ok(()),
        ApprovalValidation::Rejected(failure) => Err(JsonRpcError::approval_rejected(
            decision,
            failure.code(),
            failure.message(),
        )),
    }
}
