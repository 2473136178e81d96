use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, mapped from `rollpilot.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RollpilotConfig {
    pub goal_manager: GoalManagerConfig,
    pub autonomy: AutonomyConfig,
    pub policy: PolicyConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

// ── Goal manager ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalManagerConfig {
    /// Master switch. When false, tick and dispatch report `enabled: false` and do nothing.
    pub enabled: bool,
    /// Lease owner identity of this process. Empty = derived from hostname + pid.
    pub owner_id: String,
    /// How long a lease lives without a heartbeat. Must exceed two action
    /// timeouts: a write step makes a bounded pre-state probe and a bounded
    /// executor call between heartbeats.
    pub lease_ttl_secs: u64,
    /// Retries allowed before a goal is parked in the DLQ.
    pub max_retries: u32,
    /// Backoff = min(base_backoff_ms * 2^attempts, max_backoff_ms).
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Per-call timeout for action executors and probes.
    pub action_timeout_secs: u64,
    /// Lifetime of an idempotency record.
    pub idempotency_ttl_secs: u64,
    /// How long a suppressed signature blocks identical candidates.
    pub suppression_window_secs: u64,
    /// Active queue capacity; candidates beyond it are suppressed.
    pub max_queue_size: usize,
    pub max_candidates_per_tick: usize,
    /// Candidates whose score total is below this are suppressed.
    pub min_candidate_score: f64,
    /// Candidates whose confidence is below this are suppressed.
    pub min_candidate_confidence: f64,
    /// Read-only fallback plans allowed after a precondition failure.
    pub max_replans: u32,
}

impl Default for GoalManagerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            owner_id: String::new(),
            lease_ttl_secs: 60,
            max_retries: 3,
            base_backoff_ms: 5_000,
            max_backoff_ms: 300_000,
            action_timeout_secs: 20,
            idempotency_ttl_secs: 3_600,
            suppression_window_secs: 600,
            max_queue_size: 50,
            max_candidates_per_tick: 8,
            min_candidate_score: 35.0,
            min_candidate_confidence: 0.4,
            max_replans: 1,
        }
    }
}

// ── Autonomy ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutonomyConfig {
    /// Autonomy level: "A0" (manual) through "A5" (full auto).
    pub level: String,
    /// Minimum plan confidence to run at all (dry-run).
    pub min_confidence_dry_run: f64,
    /// Minimum plan confidence to perform live writes.
    pub min_confidence_write: f64,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            level: "A2".into(),
            min_confidence_dry_run: 0.5,
            min_confidence_write: 0.75,
        }
    }
}

// ── Policy ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Credential MCP callers must present. None = every tool call is denied.
    pub api_key: Option<String>,
    /// Block every write operation.
    pub read_only_mode: bool,
    /// Write tools need a single-use approval ticket.
    pub approval_required_for_writes: bool,
    /// Write tools still allowed while in read-only mode.
    pub read_only_exempt_tools: Vec<String>,
    /// Write tools that need tickets from several distinct approvers.
    pub multi_approval_tools: Vec<String>,
    pub min_distinct_approvers: usize,
    /// Default ticket lifetime.
    pub approval_ttl_secs: u64,
    /// Upper bound for a requested ticket lifetime.
    pub max_approval_ttl_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            read_only_mode: false,
            approval_required_for_writes: true,
            read_only_exempt_tools: vec![],
            multi_approval_tools: vec![],
            min_distinct_approvers: 2,
            approval_ttl_secs: 300,
            max_approval_ttl_secs: 3_600,
        }
    }
}

// ── Store ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Path to the SQLite database.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            db_path: PathBuf::from("rollpilot.db"),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "[{}] {}: {}", tag, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({})", h)?;
        }
        Ok(())
    }
}

const VALID_LEVELS: [&str; 6] = ["A0", "A1", "A2", "A3", "A4", "A5"];

impl RollpilotConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();
        let gm = &self.goal_manager;

        // ── Leases and retries ───
        if gm.lease_ttl_secs == 0 {
            warnings.push(ConfigWarning {
                field: "goal_manager.lease_ttl_secs".into(),
                message: "lease TTL is 0, every lease would be born expired".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 60".into()),
            });
        } else if gm.lease_ttl_secs <= gm.action_timeout_secs.max(1).saturating_mul(2) {
            warnings.push(ConfigWarning {
                field: "goal_manager.lease_ttl_secs".into(),
                message: format!(
                    "lease TTL {}s does not cover two action timeouts of {}s",
                    gm.lease_ttl_secs, gm.action_timeout_secs
                ),
                severity: WarningSeverity::Error,
                hint: Some(format!(
                    "A write step can spend two bounded calls between heartbeats; set it above {}",
                    gm.action_timeout_secs.max(1).saturating_mul(2)
                )),
            });
        }

        if gm.max_backoff_ms < gm.base_backoff_ms {
            warnings.push(ConfigWarning {
                field: "goal_manager.max_backoff_ms".into(),
                message: format!(
                    "max backoff {}ms is below base backoff {}ms",
                    gm.max_backoff_ms, gm.base_backoff_ms
                ),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }

        if gm.action_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "goal_manager.action_timeout_secs".into(),
                message: "action timeout is 0, every action would time out".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 20".into()),
            });
        }

        if gm.max_queue_size == 0 {
            warnings.push(ConfigWarning {
                field: "goal_manager.max_queue_size".into(),
                message: "queue size is 0, no goal can ever be queued".into(),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }

        if !(0.0..=1.0).contains(&gm.min_candidate_confidence) {
            warnings.push(ConfigWarning {
                field: "goal_manager.min_candidate_confidence".into(),
                message: format!("{} is outside [0, 1]", gm.min_candidate_confidence),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }

        // ── Autonomy ───
        if !VALID_LEVELS.contains(&self.autonomy.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "autonomy.level".into(),
                message: format!("level '{}' is invalid", self.autonomy.level),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid levels: {}", VALID_LEVELS.join(", "))),
            });
        } else if self.autonomy.level == "A5" {
            warnings.push(ConfigWarning {
                field: "autonomy.level".into(),
                message: "A5 allows critical-risk writes without a human".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Consider A3 or A4 for production".into()),
            });
        }

        let dry = self.autonomy.min_confidence_dry_run;
        let write = self.autonomy.min_confidence_write;
        for (field, v) in [
            ("autonomy.min_confidence_dry_run", dry),
            ("autonomy.min_confidence_write", write),
        ] {
            if !(0.0..=1.0).contains(&v) {
                warnings.push(ConfigWarning {
                    field: field.into(),
                    message: format!("{} is outside [0, 1]", v),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
        }
        if dry > write {
            warnings.push(ConfigWarning {
                field: "autonomy.min_confidence_dry_run".into(),
                message: format!("dry-run threshold {} exceeds write threshold {}", dry, write),
                severity: WarningSeverity::Error,
                hint: Some("Dry-run must never need more confidence than a live write".into()),
            });
        }

        // ── Policy ───
        if self.policy.api_key.is_none() {
            warnings.push(ConfigWarning {
                field: "policy.api_key".into(),
                message: "no API key configured, all MCP tool calls will be denied".into(),
                severity: WarningSeverity::Info,
                hint: Some("Set policy.api_key or ROLLPILOT_API_KEY".into()),
            });
        }
        if !self.policy.approval_required_for_writes && !self.policy.read_only_mode {
            warnings.push(ConfigWarning {
                field: "policy.approval_required_for_writes".into(),
                message: "write tools run without approval tickets".into(),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }
        if self.policy.approval_ttl_secs == 0
            || self.policy.approval_ttl_secs > self.policy.max_approval_ttl_secs
        {
            warnings.push(ConfigWarning {
                field: "policy.approval_ttl_secs".into(),
                message: format!(
                    "default TTL {}s is outside [1, {}]",
                    self.policy.approval_ttl_secs, self.policy.max_approval_ttl_secs
                ),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }
        if !self.policy.multi_approval_tools.is_empty() && self.policy.min_distinct_approvers < 2 {
            warnings.push(ConfigWarning {
                field: "policy.min_distinct_approvers".into(),
                message: "multi-approval tools configured with fewer than 2 approvers".into(),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
