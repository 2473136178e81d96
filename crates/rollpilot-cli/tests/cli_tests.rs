#[cfg(test)]
mod tests {
    use chrono::Utc;
    use clap::Parser;
    use rollpilot_cli::{Cli, NarratingExecutor, SnapshotFileProbe};
    use rollpilot_config::{RollpilotConfig, StoreBackend};
    use rollpilot_core::*;
    use rollpilot_engine::{DispatchOptions, DispatchStatus, GoalManager};
    use rollpilot_store::{GoalStore, MemoryGoalStore};
    use serde_json::json;
    use std::io::Write;
    use std::sync::Arc;

    fn snapshot_file(lag_secs: u64, endpoint: Option<&str>) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let snapshot = json!({
            "metrics": {
                "cpu_usage": 95.0,
                "txpool_pending": 2000,
                "block_height_lag_secs": lag_secs,
                "current_vcpu": 2,
                "l1_rpc_healthy": true,
                "l1_rpc_endpoint": endpoint,
                "l1_rpc_fallbacks": ["https://l1-a.example", "https://l1-b.example"]
            },
            "observed_at": Utc::now().to_rfc3339()
        });
        write!(file, "{snapshot}").unwrap();
        file
    }

    // ── Argument parsing ───────────────────────────────────────

    mod parsing {
        use super::*;

        #[test]
        fn test_tick_requires_snapshot() {
            assert!(Cli::try_parse_from(["rollpilot", "tick"]).is_err());
            assert!(Cli::try_parse_from(["rollpilot", "tick", "--snapshot", "s.json", "--json"]).is_ok());
        }

        #[test]
        fn test_verbose_and_quiet_conflict() {
            assert!(Cli::try_parse_from(["rollpilot", "-v", "-q", "state"]).is_err());
            assert!(Cli::try_parse_from(["rollpilot", "state", "-v"]).is_ok());
        }

        #[test]
        fn test_replay_takes_a_uuid() {
            assert!(Cli::try_parse_from(["rollpilot", "replay", "not-a-uuid"]).is_err());
            let id = uuid::Uuid::new_v4().to_string();
            assert!(Cli::try_parse_from(["rollpilot", "replay", id.as_str()]).is_ok());
        }

        #[test]
        fn test_policy_set_flags() {
            let parsed = Cli::try_parse_from([
                "rollpilot",
                "policy",
                "set",
                "--level",
                "A3",
                "--min-confidence-write",
                "0.8",
            ]);
            assert!(parsed.is_ok());
            assert!(Cli::try_parse_from(["rollpilot", "policy", "set", "--min-confidence-write", "high"]).is_err());
        }

        #[test]
        fn test_approve_requires_tool() {
            assert!(Cli::try_parse_from(["rollpilot", "approve", "--params", "{}"]).is_err());
            assert!(
                Cli::try_parse_from([
                    "rollpilot",
                    "approve",
                    "--tool",
                    "scale_component",
                    "--params",
                    r#"{"targetVcpu":4}"#,
                    "--approved-by",
                    "alice",
                    "--ttl",
                    "60",
                ])
                .is_ok()
            );
        }
    }

    // ── Snapshot probe ─────────────────────────────────────────

    mod probe {
        use super::*;

        #[tokio::test]
        async fn test_reads_snapshot_file() {
            let file = snapshot_file(0, Some("https://l1-a.example"));
            let probe = SnapshotFileProbe::new(file.path());
            assert_eq!(probe.current_vcpu().await.unwrap(), 2);

            let status = probe.l1_rpc_status().await.unwrap();
            assert_eq!(status.endpoint, "https://l1-a.example");
            assert!(status.healthy);

            let snapshot = probe.snapshot().await.unwrap();
            assert_eq!(snapshot.metrics.txpool_pending, 2000);
            assert!(snapshot.anomalies.is_empty());
            assert_eq!(snapshot.cooldown_remaining_secs, 0);
        }

        #[tokio::test]
        async fn test_health_follows_block_lag() {
            let fresh = snapshot_file(5, None);
            assert!(SnapshotFileProbe::new(fresh.path()).health_probe("execution").await.unwrap());

            let stalled = snapshot_file(600, None);
            assert!(!SnapshotFileProbe::new(stalled.path()).health_probe("execution").await.unwrap());
        }

        #[tokio::test]
        async fn test_missing_endpoint_is_a_probe_error() {
            let file = snapshot_file(0, None);
            let err = SnapshotFileProbe::new(file.path()).l1_rpc_status().await.unwrap_err();
            assert!(matches!(err, PilotError::Probe(_)));
        }

        #[tokio::test]
        async fn test_unavailable_and_invalid_files_fail() {
            let err = SnapshotFileProbe::unavailable().snapshot().await.unwrap_err();
            assert!(matches!(err, PilotError::Probe(_)));

            let mut garbage = tempfile::NamedTempFile::new().unwrap();
            write!(garbage, "not json").unwrap();
            let err = SnapshotFileProbe::new(garbage.path()).snapshot().await.unwrap_err();
            assert!(err.to_string().contains("invalid snapshot"));

            let dir = tempfile::tempdir().unwrap();
            let missing = SnapshotFileProbe::new(dir.path().join("nope.json"));
            assert!(missing.current_vcpu().await.is_err());
        }
    }

    // ── Narrating executor ─────────────────────────────────────

    mod executor {
        use super::*;

        #[tokio::test]
        async fn test_writes_are_skipped() {
            let request = ActionRequest::new("scale_component", json!({ "targetVcpu": 4 }));
            let outcome = NarratingExecutor.execute_action(&request).await.unwrap();
            assert_eq!(outcome.status, ActionStatus::Skipped);
            assert_eq!(outcome.output["narrated"], true);
            assert!(outcome.message.unwrap().contains("scale_component"));
        }

        #[tokio::test]
        async fn test_reads_succeed() {
            let request = ActionRequest::new("collect_state", json!({}));
            let outcome = NarratingExecutor.execute_action(&request).await.unwrap();
            assert_eq!(outcome.status, ActionStatus::Success);
            assert!(outcome.message.is_none());
        }
    }

    // ── Operator flow ──────────────────────────────────────────

    mod flow {
        use super::*;

        fn manager(file: &tempfile::NamedTempFile) -> (Arc<MemoryGoalStore>, GoalManager) {
            let mut config = RollpilotConfig::default();
            config.store.backend = StoreBackend::Memory;
            config.goal_manager.owner_id = "operator".into();
            let store = Arc::new(MemoryGoalStore::new());
            let dyn_store: Arc<dyn GoalStore> = store.clone();
            let manager = GoalManager::new(
                &config,
                dyn_store,
                Arc::new(NarratingExecutor),
                Arc::new(SnapshotFileProbe::new(file.path())),
            )
            .unwrap();
            (store, manager)
        }

        #[tokio::test]
        async fn test_tick_then_dry_run_dispatch() {
            let file = snapshot_file(0, Some("https://l1-a.example"));
            let (store, manager) = manager(&file);

            let snapshot = SnapshotFileProbe::new(file.path()).load().unwrap();
            let tick = manager.tick(Utc::now(), &snapshot);
            assert!(tick.enabled);
            assert_eq!(tick.queued_count, 1);

            let result = manager.dispatch_top_goal(DispatchOptions::dry_run("cli")).await;
            assert_eq!(result.status, DispatchStatus::Completed);
            assert!(result.verifications.iter().all(|v| v.passed));

            let state = manager.list_state(10);
            assert!(state.queue.is_empty());
            assert!(state.leases.is_empty());
            assert!(!state.checkpoints.is_empty());
            assert!(store.list_dlq().unwrap().is_empty());

            // The finished goal holds its signature for the suppression window
            let again = manager.tick(Utc::now(), &snapshot);
            assert_eq!(again.queued_count, 0);
            assert_eq!(again.queue_depth, 0);
        }

        #[tokio::test]
        async fn test_tick_is_idempotent_for_the_same_snapshot() {
            let file = snapshot_file(0, Some("https://l1-a.example"));
            let (_store, manager) = manager(&file);
            let snapshot = SnapshotFileProbe::new(file.path()).load().unwrap();

            let now = Utc::now();
            assert_eq!(manager.tick(now, &snapshot).queued_count, 1);
            let again = manager.tick(now, &snapshot);
            assert_eq!(again.queued_count, 0);
            assert_eq!(again.queue_depth, 1);
        }
    }
}
