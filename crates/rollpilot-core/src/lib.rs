//! # rollpilot-core
//!
//! Core types, traits, and primitives for the rollpilot goal engine.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! goals, candidates and plans, the system snapshot, and the outbound capability
//! traits through which the engine reaches the live rollup stack.

pub mod action;
pub mod canonical;
pub mod error;
pub mod event;
pub mod goal;
pub mod snapshot;
pub mod types;

pub use action::{ActionExecutor, ActionOutcome, ActionRequest, ActionStatus, EndpointStatus, StateProbe};
pub use canonical::{canonical_json, hash_canonical};
pub use error::{PilotError, Result};
pub use event::{Event, EventBus};
pub use goal::*;
pub use snapshot::{AnomalySeverity, AnomalySignal, MetricsSnapshot, RcaSignal, RuntimeContext, SystemSnapshot};
pub use types::*;
