use parking_lot::RwLock;
use rollpilot_config::AutonomyConfig;
use rollpilot_core::PilotError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::level::AutonomyLevel;

/// The runtime dial for autonomous execution.
///
/// Invariant: both thresholds are in [0, 1] and
/// `min_confidence_dry_run <= min_confidence_write`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuntimeAutonomyPolicy {
    pub level: AutonomyLevel,
    pub min_confidence_dry_run: f64,
    pub min_confidence_write: f64,
}

impl RuntimeAutonomyPolicy {
    pub fn new(level: AutonomyLevel, min_confidence_dry_run: f64, min_confidence_write: f64) -> Self {
        Self {
            level,
            min_confidence_dry_run,
            min_confidence_write,
        }
        .normalized()
    }

    pub fn from_config(config: &AutonomyConfig) -> rollpilot_core::Result<Self> {
        let level = AutonomyLevel::parse(&config.level).ok_or_else(|| PilotError::ConfigValidation {
            field: "autonomy.level".into(),
            reason: format!("unknown autonomy level '{}'", config.level),
        })?;
        Ok(Self::new(
            level,
            config.min_confidence_dry_run,
            config.min_confidence_write,
        ))
    }

    /// Clamp both thresholds to [0, 1], then pull the dry-run threshold down
    /// to the write threshold if it sits above it.
    pub fn normalized(mut self) -> Self {
        self.min_confidence_write = clamp_unit(self.min_confidence_write, 0.0);
        self.min_confidence_dry_run = clamp_unit(self.min_confidence_dry_run, 0.0)
            .min(self.min_confidence_write);
        self
    }
}

impl Default for RuntimeAutonomyPolicy {
    fn default() -> Self {
        Self::new(AutonomyLevel::default(), 0.5, 0.75)
    }
}

fn clamp_unit(v: f64, fallback: f64) -> f64 {
    if v.is_nan() { fallback } else { v.clamp(0.0, 1.0) }
}

/// A partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutonomyPolicyUpdate {
    #[serde(default)]
    pub level: Option<AutonomyLevel>,
    #[serde(default)]
    pub min_confidence_dry_run: Option<f64>,
    #[serde(default)]
    pub min_confidence_write: Option<f64>,
}

/// Explicitly owned holder of the runtime autonomy policy.
///
/// Cloning shares the same underlying policy.
#[derive(Debug, Clone)]
pub struct AutonomyPolicyStore {
    defaults: RuntimeAutonomyPolicy,
    state: Arc<RwLock<RuntimeAutonomyPolicy>>,
}

impl AutonomyPolicyStore {
    pub fn new(defaults: RuntimeAutonomyPolicy) -> Self {
        let defaults = defaults.normalized();
        Self {
            defaults,
            state: Arc::new(RwLock::new(defaults)),
        }
    }

    pub fn from_config(config: &AutonomyConfig) -> rollpilot_core::Result<Self> {
        Ok(Self::new(RuntimeAutonomyPolicy::from_config(config)?))
    }

    pub fn get(&self) -> RuntimeAutonomyPolicy {
        *self.state.read()
    }

    pub fn defaults(&self) -> RuntimeAutonomyPolicy {
        self.defaults
    }

    /// Apply a partial update and return the resulting policy.
    pub fn set(&self, update: &AutonomyPolicyUpdate) -> RuntimeAutonomyPolicy {
        let mut state = self.state.write();
        let current = *state;
        let next = RuntimeAutonomyPolicy {
            level: update.level.unwrap_or(current.level),
            min_confidence_dry_run: update
                .min_confidence_dry_run
                .map(|v| clamp_unit(v, current.min_confidence_dry_run))
                .unwrap_or(current.min_confidence_dry_run),
            min_confidence_write: update
                .min_confidence_write
                .map(|v| clamp_unit(v, current.min_confidence_write))
                .unwrap_or(current.min_confidence_write),
        }
        .normalized();
        *state = next;
        info!(
            level = %next.level,
            min_confidence_dry_run = next.min_confidence_dry_run,
            min_confidence_write = next.min_confidence_write,
            "runtime autonomy policy updated"
        );
        next
    }

    /// Replace the whole policy, e.g. with one loaded from a shared store.
    pub fn replace(&self, policy: RuntimeAutonomyPolicy) -> RuntimeAutonomyPolicy {
        let policy = policy.normalized();
        *self.state.write() = policy;
        policy
    }

    /// Restore the configured defaults.
    pub fn reset(&self) -> RuntimeAutonomyPolicy {
        *self.state.write() = self.defaults;
        info!(level = %self.defaults.level, "runtime autonomy policy reset");
        self.defaults
    }
}
