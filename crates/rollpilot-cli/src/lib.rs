//! # rollpilot-cli
//!
//! Operator command-line interface for the rollpilot goal engine.
//!
//! ## Commands
//!
//! - `rollpilot tick --snapshot <file>`: generate and enqueue goal candidates from a snapshot
//! - `rollpilot dispatch --snapshot <file>`: dry-run the highest-priority queued goal
//! - `rollpilot replay <goal-id>`: move a dead-lettered goal back to the queue
//! - `rollpilot state`: show queue, DLQ, leases, suppressions and checkpoints
//! - `rollpilot policy get|set|reset`: inspect or change the runtime autonomy policy
//! - `rollpilot approve --tool <name> --params <json>`: issue a single-use approval token
//! - `rollpilot mcp`: serve the MCP JSON-RPC surface over stdio
//! - `rollpilot config`: show the effective configuration
//! - `rollpilot doctor`: audit the configuration

pub mod adapters;
pub mod commands;

pub use adapters::{NarratingExecutor, SnapshotFileProbe};
pub use commands::Cli;
