use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of the rollup stack that candidate generation works from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub metrics: MetricsSnapshot,
    #[serde(default)]
    pub anomalies: Vec<AnomalySignal>,
    #[serde(default)]
    pub rca: Option<RcaSignal>,
    /// Seconds left before another scaling action is allowed.
    #[serde(default)]
    pub cooldown_remaining_secs: u64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSnapshot {
    /// Execution client CPU usage, percent.
    pub cpu_usage: f64,
    pub txpool_pending: u64,
    /// Seconds since the L2 head last advanced.
    pub block_height_lag_secs: u64,
    pub current_vcpu: u32,
    pub l1_rpc_healthy: bool,
    pub l1_rpc_endpoint: Option<String>,
    /// Alternate L1 RPC endpoints, in failover order.
    pub l1_rpc_fallbacks: Vec<String>,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            cpu_usage: 0.0,
            txpool_pending: 0,
            block_height_lag_secs: 0,
            current_vcpu: 1,
            l1_rpc_healthy: true,
            l1_rpc_endpoint: None,
            l1_rpc_fallbacks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// An anomaly reported by the (external) detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalySignal {
    /// Metric name, e.g. "cpu_usage", "txpool_pending", "block_height".
    pub metric: String,
    pub severity: AnomalySeverity,
    #[serde(default)]
    pub z_score: f64,
    #[serde(default)]
    pub description: String,
}

/// Root-cause analysis verdict, when one is available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcaSignal {
    #[serde(default)]
    pub root_cause: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    pub confidence: f64,
}

/// Live conditions the plan validator checks preconditions against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeContext {
    pub cooldown_remaining_secs: u64,
    pub current_vcpu: Option<u32>,
    pub l1_rpc_healthy: Option<bool>,
}

impl From<&SystemSnapshot> for RuntimeContext {
    fn from(snapshot: &SystemSnapshot) -> Self {
        Self {
            cooldown_remaining_secs: snapshot.cooldown_remaining_secs,
            current_vcpu: Some(snapshot.metrics.current_vcpu),
            l1_rpc_healthy: Some(snapshot.metrics.l1_rpc_healthy),
        }
    }
}
