//! # rollpilot-config
//!
//! Configuration system for the rollpilot engine. Reads from `rollpilot.toml`
//! and environment variables, in that precedence order.
//!
//! Supports hot-reload via filesystem watcher.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::RollpilotConfig;
pub use schema::{
    AutonomyConfig, ConfigWarning, GoalManagerConfig, LoggingConfig, PolicyConfig, StoreBackend,
    StoreConfig, WarningSeverity,
};
