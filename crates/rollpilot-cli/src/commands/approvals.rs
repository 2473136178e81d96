use chrono::Utc;
use rollpilot_autonomy::{ApprovalTicketing, AutonomyLevel, AutonomyPolicyUpdate, RuntimeAutonomyPolicy};
use rollpilot_config::RollpilotConfig;
use rollpilot_core::PilotError;
use rollpilot_engine::McpTool;
use serde_json::Value;

use super::{PolicyAction, build_manager};
use crate::adapters::SnapshotFileProbe;

pub(super) fn cmd_policy(config: RollpilotConfig, action: PolicyAction) -> rollpilot_core::Result<()> {
    let manager = build_manager(&config, SnapshotFileProbe::unavailable())?;

    let policy = match action {
        PolicyAction::Get => manager.autonomy_policy(),
        PolicyAction::Set {
            level,
            min_confidence_dry_run,
            min_confidence_write,
        } => {
            let level = level
                .map(|raw| {
                    AutonomyLevel::parse(&raw).ok_or_else(|| PilotError::ConfigValidation {
                        field: "level".into(),
                        reason: format!("'{raw}' is not one of A0..A5"),
                    })
                })
                .transpose()?;
            let update = AutonomyPolicyUpdate {
                level,
                min_confidence_dry_run,
                min_confidence_write,
            };
            let policy = manager.set_autonomy_policy(&update)?;
            println!("✅ Autonomy policy updated");
            policy
        }
        PolicyAction::Reset => {
            let policy = manager.reset_autonomy_policy()?;
            println!("✅ Autonomy policy reset to configured defaults");
            policy
        }
    };

    print_policy(&policy);
    Ok(())
}

fn print_policy(policy: &RuntimeAutonomyPolicy) {
    println!("🎚️  Autonomy Policy\n");
    println!("   Level:                  {} ({})", policy.level, policy.level.description());
    println!("   Min confidence dry-run: {:.2}", policy.min_confidence_dry_run);
    println!("   Min confidence write:   {:.2}", policy.min_confidence_write);
}

pub(super) fn cmd_approve(
    config: RollpilotConfig,
    tool: String,
    params: String,
    approved_by: Option<String>,
    reason: Option<String>,
    ttl: Option<u64>,
) -> rollpilot_core::Result<()> {
    let Some(mcp_tool) = McpTool::parse(&tool) else {
        return Err(PilotError::Config(format!("unknown tool '{tool}'")));
    };
    let tool_params: Value = serde_json::from_str(&params)?;
    if !tool_params.is_object() {
        return Err(PilotError::Config("--params must be a JSON object".into()));
    }
    if !mcp_tool.is_write(&tool_params) {
        println!("💡 {tool} with these arguments is read-only; it does not need a token");
    }

    let store = rollpilot_store::open_store(&config.store)?;
    let ticketing = ApprovalTicketing::new(
        store.ticket_store(),
        config.policy.approval_ttl_secs,
        config.policy.max_approval_ttl_secs,
    );
    let request = rollpilot_autonomy::IssueApprovalRequest {
        tool_name: tool,
        tool_params,
        ttl_seconds: ttl,
        approved_by,
        reason,
    };
    let issued = ticketing.issue(&request, Utc::now())?;

    println!("🎫 Approval issued\n");
    println!("   Token:   {}", issued.approval_token);
    println!("   Tool:    {}", issued.tool_name);
    println!("   Expires: {} ({}s)", issued.expires_at.to_rfc3339(), issued.ttl_seconds);
    println!("\n   The token is single-use and bound to these exact arguments.");
    Ok(())
}
