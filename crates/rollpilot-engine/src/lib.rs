//! # rollpilot-engine
//!
//! The goal orchestration engine. Turns system snapshots into scored goal
//! candidates, runs the top goal under a lease through policy check, plan
//! execution and verification, rolls back failed operations, and retries or
//! dead-letters goals that keep failing. Also hosts the MCP JSON-RPC gateway
//! through which external tool callers reach the engine.

pub mod candidates;
pub mod mcp;
pub mod orchestrator;
pub mod rollback;
pub mod runner;
pub mod verifier;

pub use candidates::{CandidateGenerator, policy_fit};
pub use mcp::{CallContext, JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpGateway, McpTool};
pub use orchestrator::{
    DispatchOptions, DispatchResult, DispatchStatus, GoalManager, GoalManagerConfigView,
    GoalManagerState, ReplayResult, TickResult, retry_backoff_ms,
};
pub use rollback::{RollbackPlan, RollbackResult, RollbackRunner};
pub use runner::{PlanRun, PlanRunner, PreActionState, StepExecution, StepFailure};
pub use verifier::{OperationVerificationResult, OperationVerifier, VerifyRequest};
