use chrono::Utc;
use rollpilot_config::RollpilotConfig;
use rollpilot_engine::{DispatchOptions, DispatchResult, DispatchStatus};
use std::path::PathBuf;

use super::build_manager;
use crate::adapters::SnapshotFileProbe;

pub(super) fn cmd_tick(config: RollpilotConfig, snapshot: PathBuf, json: bool) -> rollpilot_core::Result<()> {
    let probe = SnapshotFileProbe::new(snapshot);
    let system = probe.load()?;
    let manager = build_manager(&config, probe)?;
    let result = manager.tick(Utc::now(), &system);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    if !result.enabled {
        println!("⏸️  Goal manager is disabled ([goal_manager] enabled = false)");
        return Ok(());
    }
    println!("🎯 Tick complete\n");
    println!("   Generated:   {}", result.generated_count);
    println!("   Queued:      {}", result.queued_count);
    println!("   Suppressed:  {}", result.suppressed_count);
    println!("   Queue depth: {}", result.queue_depth);
    if let Some(err) = &result.error {
        println!("   ⚠️  {err}");
    }
    Ok(())
}

pub(super) async fn cmd_dispatch(
    config: RollpilotConfig,
    snapshot: PathBuf,
    json: bool,
) -> rollpilot_core::Result<()> {
    let manager = build_manager(&config, SnapshotFileProbe::new(snapshot))?;
    let result = manager.dispatch_top_goal(DispatchOptions::dry_run("cli")).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    print_dispatch(&result);
    Ok(())
}

fn print_dispatch(result: &DispatchResult) {
    let icon = match result.status {
        DispatchStatus::Completed => "✅",
        DispatchStatus::Requeued => "🔁",
        DispatchStatus::DeadLettered => "🪦",
        DispatchStatus::Idle | DispatchStatus::Disabled => "💤",
        DispatchStatus::LeaseLost | DispatchStatus::Aborted => "⚠️ ",
    };
    println!("{icon} Dispatch (dry run): {}", status_label(result.status));
    if let Some(goal_id) = result.goal_id {
        println!("   Goal:       {goal_id}");
    }
    if let Some(plan_id) = &result.plan_id {
        println!("   Plan:       {plan_id}");
    }
    if let Some(reason) = &result.reason {
        println!("   Reason:     {reason}");
    }
    if result.dispatched {
        println!("   Steps run:  {}", result.execution_log_count);
    }
    for v in &result.verifications {
        let mark = if v.passed { "✓" } else { "✗" };
        println!("   {mark} verify {}", v.details.as_deref().unwrap_or("ok"));
    }
    if let Some(rollback) = &result.rollback {
        println!("   Rollback:   {}", rollback.message);
    }
}

fn status_label(status: DispatchStatus) -> &'static str {
    match status {
        DispatchStatus::Disabled => "disabled",
        DispatchStatus::Idle => "idle",
        DispatchStatus::Completed => "completed",
        DispatchStatus::Requeued => "requeued",
        DispatchStatus::DeadLettered => "dead-lettered",
        DispatchStatus::LeaseLost => "lease lost",
        DispatchStatus::Aborted => "aborted",
    }
}

pub(super) fn cmd_replay(config: RollpilotConfig, goal_id: uuid::Uuid) -> rollpilot_core::Result<()> {
    let manager = build_manager(&config, SnapshotFileProbe::unavailable())?;
    let result = manager.replay_dlq(goal_id, Utc::now());
    if result.replayed {
        println!("🔁 Goal {goal_id} replayed from the dead-letter queue");
    } else {
        println!(
            "❌ Goal {goal_id} not replayed: {}",
            result.reason.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

pub(super) fn cmd_state(config: RollpilotConfig, limit: usize, json: bool) -> rollpilot_core::Result<()> {
    let manager = build_manager(&config, SnapshotFileProbe::unavailable())?;
    let state = manager.list_state(limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    let policy = state.autonomy_policy;
    println!("📋 Goal Manager State\n");
    println!(
        "   Autonomy: {} (dry-run ≥ {:.2}, write ≥ {:.2})",
        policy.level, policy.min_confidence_dry_run, policy.min_confidence_write
    );

    println!("\n   Queue ({}):", state.queue.len());
    for item in &state.queue {
        println!(
            "     {}  {:<10} {:<16} score {:>5.1}  attempts {}  {}",
            item.goal_id, item.status, item.intent, item.score.total, item.attempts, item.goal
        );
    }

    println!("\n   Dead-letter queue ({}):", state.dlq.len());
    for item in &state.dlq {
        println!(
            "     {}  {}  attempts {}  {}",
            item.goal_id,
            item.moved_at.format("%Y-%m-%d %H:%M:%S"),
            item.attempts,
            item.reason
        );
    }

    println!("\n   Live leases ({}):", state.leases.len());
    for lease in &state.leases {
        println!(
            "     {}  owner {}  until {}",
            lease.goal_id,
            lease.owner_id,
            lease.lease_expires_at.format("%H:%M:%S")
        );
    }

    println!("\n   Suppressions ({}):", state.suppressions.len());
    for s in &state.suppressions {
        println!("     {:<16} {:<22} {}", s.intent, s.reason_code, s.detail);
    }

    println!("\n   Recent checkpoints ({}):", state.checkpoints.len());
    for c in &state.checkpoints {
        println!(
            "     {}  {}  {:<18} attempt {}",
            c.timestamp.format("%H:%M:%S"),
            c.goal_id,
            c.phase,
            c.attempt
        );
    }

    for err in &state.errors {
        println!("\n   ⚠️  {err}");
    }
    Ok(())
}
