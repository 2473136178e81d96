use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use rollpilot_config::{ConfigLoader, RollpilotConfig, WarningSeverity};
use rollpilot_engine::GoalManager;

use crate::adapters::{NarratingExecutor, SnapshotFileProbe};

mod approvals;
mod goals;
mod serve;

/// 🛰️ Rollpilot: autonomous goal orchestration for rollup operations
#[derive(Parser)]
#[command(name = "rollpilot", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to rollpilot.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate goal candidates from a snapshot and enqueue the admitted ones
    Tick {
        /// JSON file holding the system snapshot
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Dry-run the highest-priority queued goal (never writes to the rollup)
    Dispatch {
        /// JSON file the verifier re-reads as live state
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move a dead-lettered goal back to the queue with its attempts reset
    Replay {
        /// Goal id, as shown by `rollpilot state`
        goal_id: uuid::Uuid,
    },
    /// Show queue, dead-letter queue, leases, suppressions and checkpoints
    State {
        /// Maximum entries per collection
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or change the runtime autonomy policy
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
    /// Issue a single-use approval token for one write tool call
    Approve {
        /// MCP tool the token authorizes (e.g. scale_component)
        #[arg(short, long)]
        tool: String,

        /// Exact tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// Who approved the call
        #[arg(long)]
        approved_by: Option<String>,

        /// Why the call is approved
        #[arg(long)]
        reason: Option<String>,

        /// Token lifetime in seconds (clamped to policy.max_approval_ttl_secs)
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Serve the MCP JSON-RPC surface over stdin/stdout, one message per line
    Mcp {
        /// JSON file the state probe reads
        #[arg(short, long)]
        snapshot: Option<PathBuf>,

        /// API key presented on every call
        #[arg(long, env = "ROLLPILOT_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Audit configuration for unsafe or inconsistent settings
    Doctor,
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Show the effective policy
    Get,
    /// Update one or more fields of the policy
    Set {
        /// Autonomy level A0..A5
        #[arg(long)]
        level: Option<String>,

        /// Minimum goal confidence for dry-run execution
        #[arg(long)]
        min_confidence_dry_run: Option<f64>,

        /// Minimum goal confidence for live writes
        #[arg(long)]
        min_confidence_write: Option<f64>,
    },
    /// Restore the configured defaults
    Reset,
}

impl Cli {
    pub async fn run(self) -> rollpilot_core::Result<()> {
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // --verbose > --quiet > --log-level > [logging] level; RUST_LOG beats all
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(&config.logging.level)
        };
        init_tracing(log_level, &config.logging.format);

        match self.command {
            Commands::Tick { snapshot, json } => goals::cmd_tick(config, snapshot, json),
            Commands::Dispatch { snapshot, json } => goals::cmd_dispatch(config, snapshot, json).await,
            Commands::Replay { goal_id } => goals::cmd_replay(config, goal_id),
            Commands::State { limit, json } => goals::cmd_state(config, limit, json),
            Commands::Policy { action } => approvals::cmd_policy(config, action),
            Commands::Approve {
                tool,
                params,
                approved_by,
                reason,
                ttl,
            } => approvals::cmd_approve(config, tool, params, approved_by, reason, ttl),
            Commands::Mcp { snapshot, api_key } => serve::cmd_mcp(config, snapshot, api_key).await,
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Doctor => Self::cmd_doctor(config),
        }
    }

    fn cmd_config(config: RollpilotConfig, json: bool) -> rollpilot_core::Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }

        let gm = &config.goal_manager;
        println!("⚙️  Rollpilot Configuration\n");
        println!("   Goal manager:   {}", if gm.enabled { "enabled" } else { "disabled" });
        println!("   Owner:          {}", if gm.owner_id.is_empty() { "(generated)" } else { gm.owner_id.as_str() });
        println!("   Lease TTL:      {}s", gm.lease_ttl_secs);
        println!("   Max retries:    {}", gm.max_retries);
        println!("   Backoff:        {}ms .. {}ms", gm.base_backoff_ms, gm.max_backoff_ms);
        println!("   Action timeout: {}s", gm.action_timeout_secs);
        println!("   Autonomy:       {}", config.autonomy.level);
        println!(
            "   Confidence:     dry-run ≥ {:.2}, write ≥ {:.2}",
            config.autonomy.min_confidence_dry_run, config.autonomy.min_confidence_write
        );
        println!("   Read-only mode: {}", config.policy.read_only_mode);
        println!("   API key:        {}", if config.policy.api_key.is_some() { "set" } else { "not set" });
        println!("   Store:          {:?} ({})", config.store.backend, config.store.db_path.display());
        println!("   Logging:        {} / {}", config.logging.level, config.logging.format);
        Ok(())
    }

    fn cmd_doctor(config: RollpilotConfig) -> rollpilot_core::Result<()> {
        println!("🩺 Rollpilot Doctor: Configuration Audit");
        println!();

        let warnings = match config.validate() {
            Ok(w) => w,
            Err(e) => {
                println!("  ❌ {e}");
                return Ok(());
            }
        };

        let mut error_count = 0;
        let mut warn_count = 0;
        for w in &warnings {
            println!("  {w}");
            match w.severity {
                WarningSeverity::Error => error_count += 1,
                WarningSeverity::Warning => warn_count += 1,
                WarningSeverity::Info => {}
            }
        }

        if config.policy.api_key.is_none() {
            println!("  💡 policy.api_key: not set, MCP calls are accepted without a key");
        }
        if !config.policy.approval_required_for_writes {
            println!("  ⚠️  policy.approval_required_for_writes: write tools run without an approval token");
            warn_count += 1;
        }

        println!();
        if error_count == 0 && warn_count == 0 {
            println!("  ✅ No problems found");
        } else {
            println!("  {error_count} error(s), {warn_count} warning(s)");
        }
        Ok(())
    }
}

fn init_tracing(log_level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    // stdout carries command output (and MCP frames); logs go to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        "json" => builder.json().with_target(true).init(),
        "compact" => builder.compact().with_target(false).init(),
        _ => builder.pretty().with_target(false).init(),
    }
}

/// Store, probe and goal manager wired from config, the way every command
/// that touches goals needs them.
pub(crate) fn build_manager(
    config: &RollpilotConfig,
    probe: SnapshotFileProbe,
) -> rollpilot_core::Result<Arc<GoalManager>> {
    let store = rollpilot_store::open_store(&config.store)?;
    let manager = GoalManager::new(config, store, Arc::new(NarratingExecutor), Arc::new(probe))?;
    Ok(Arc::new(manager))
}
