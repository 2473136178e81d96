#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use parking_lot::Mutex;
    use rollpilot_autonomy::{AutonomyLevel, AutonomyPolicyUpdate};
    use rollpilot_config::RollpilotConfig;
    use rollpilot_core::*;
    use rollpilot_engine::*;
    use rollpilot_store::*;
    use serde_json::{Value, json};
    use std::sync::Arc;

    // ── Test doubles ───────────────────────────────────────────

    struct Rollup {
        vcpu: u32,
        cpu: f64,
        txpool: u64,
        cooldown: u64,
        endpoint: String,
        l1_healthy: bool,
        /// The provider rejects every resize.
        scale_fails: bool,
        /// The provider acknowledges resizes but never applies them.
        scale_ignored: bool,
        /// The provider declines resizes without applying anything.
        scale_skipped: bool,
        /// Every executor call takes this long.
        action_delay_ms: u64,
    }

    impl Default for Rollup {
        fn default() -> Self {
            Self {
                vcpu: 2,
                cpu: 95.0,
                txpool: 2_000,
                cooldown: 0,
                endpoint: "https://l1-a.example".into(),
                l1_healthy: true,
                scale_fails: false,
                scale_ignored: false,
                scale_skipped: false,
                action_delay_ms: 0,
            }
        }
    }

    /// One scripted rollup stack: executor writes show up in probe reads.
    #[derive(Default)]
    struct FakeRollup {
        state: Mutex<Rollup>,
        calls: Mutex<Vec<ActionRequest>>,
        /// Runs inside the first executor call.
        on_first_call: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl FakeRollup {
        fn with(f: impl FnOnce(&mut Rollup)) -> Arc<Self> {
            let fake = Self::default();
            f(&mut fake.state.lock());
            Arc::new(fake)
        }

        fn calls_to(&self, action: &str) -> Vec<ActionRequest> {
            self.calls.lock().iter().filter(|c| c.action == action).cloned().collect()
        }

        fn vcpu(&self) -> u32 {
            self.state.lock().vcpu
        }

        fn snapshot_now(&self) -> SystemSnapshot {
            let s = self.state.lock();
            SystemSnapshot {
                metrics: MetricsSnapshot {
                    cpu_usage: s.cpu,
                    txpool_pending: s.txpool,
                    block_height_lag_secs: 0,
                    current_vcpu: s.vcpu,
                    l1_rpc_healthy: s.l1_healthy,
                    l1_rpc_endpoint: Some(s.endpoint.clone()),
                    l1_rpc_fallbacks: vec!["https://l1-a.example".into(), "https://l1-b.example".into()],
                },
                anomalies: Vec::new(),
                rca: None,
                cooldown_remaining_secs: s.cooldown,
                observed_at: Utc::now(),
            }
        }
    }

    #[async_trait]
    impl ActionExecutor for FakeRollup {
        async fn execute_action(&self, request: &ActionRequest) -> Result<ActionOutcome> {
            self.calls.lock().push(request.clone());
            let hook = self.on_first_call.lock().take();
            if let Some(hook) = hook {
                hook();
            }
            let delay = self.state.lock().action_delay_ms;
            if delay > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
            let mut s = self.state.lock();
            match request.action.as_str() {
                "scale_component" => {
                    if s.scale_fails {
                        return Ok(ActionOutcome::failed("capacity provider rejected the resize"));
                    }
                    if s.scale_skipped {
                        return Ok(ActionOutcome {
                            status: ActionStatus::Skipped,
                            output: json!({}),
                            message: Some("resize declined during maintenance window".into()),
                        });
                    }
                    let target = request.params["targetVcpu"].as_u64().unwrap_or(0) as u32;
                    if !s.scale_ignored {
                        s.vcpu = target;
                    }
                    Ok(ActionOutcome::success(json!({ "vcpu": target })))
                }
                "switch_l1_rpc" => {
                    s.endpoint = request.params["endpoint"].as_str().unwrap_or_default().to_string();
                    s.l1_healthy = true;
                    Ok(ActionOutcome::success(json!({ "endpoint": s.endpoint })))
                }
                other => Ok(ActionOutcome::success(json!({ "action": other }))),
            }
        }
    }

    #[async_trait]
    impl StateProbe for FakeRollup {
        async fn snapshot(&self) -> Result<SystemSnapshot> {
            Ok(self.snapshot_now())
        }

        async fn current_vcpu(&self) -> Result<u32> {
            Ok(self.vcpu())
        }

        async fn l1_rpc_status(&self) -> Result<EndpointStatus> {
            let s = self.state.lock();
            Ok(EndpointStatus {
                endpoint: s.endpoint.clone(),
                healthy: s.l1_healthy,
            })
        }

        async fn health_probe(&self, _component: &str) -> Result<bool> {
            Ok(true)
        }
    }

    struct Harness {
        rollup: Arc<FakeRollup>,
        store: Arc<MemoryGoalStore>,
        manager: Arc<GoalManager>,
    }

    fn config(f: impl FnOnce(&mut RollpilotConfig)) -> RollpilotConfig {
        let mut config = RollpilotConfig::default();
        config.goal_manager.owner_id = "worker-a".into();
        config.policy.api_key = Some("secret".into());
        f(&mut config);
        config
    }

    fn manager_for(config: &RollpilotConfig, rollup: &Arc<FakeRollup>, store: &Arc<MemoryGoalStore>) -> GoalManager {
        let store: Arc<dyn GoalStore> = store.clone();
        GoalManager::new(config, store, rollup.clone(), rollup.clone()).unwrap()
    }

    fn harness(config: RollpilotConfig, rollup: Arc<FakeRollup>) -> Harness {
        let store = Arc::new(MemoryGoalStore::new());
        let manager = Arc::new(manager_for(&config, &rollup, &store));
        Harness { rollup, store, manager }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn phases(store: &MemoryGoalStore, goal_id: GoalId) -> Vec<CheckpointPhase> {
        store.list_checkpoints(goal_id).unwrap().iter().map(|c| c.phase).collect()
    }

    fn only_goal(store: &MemoryGoalStore) -> GoalQueueItem {
        let items = store.scan_queue().unwrap().items;
        assert_eq!(items.len(), 1, "expected exactly one queued goal");
        items.into_iter().next().unwrap()
    }

    // ── Candidate generation ───────────────────────────────────

    mod candidates {
        use super::*;

        #[test]
        fn test_hot_cpu_yields_stabilize() {
            let rollup = FakeRollup::with(|s| s.txpool = 0);
            let candidates = CandidateGenerator::default().generate(&rollup.snapshot_now(), AutonomyLevel::MediumRisk, t0());
            assert_eq!(candidates.len(), 1);
            let c = &candidates[0];
            assert_eq!(c.intent, GoalIntent::Stabilize);
            assert_eq!(c.params["targetVcpu"], 4);
            assert_eq!(c.params["currentVcpu"], 2);
            assert!((c.confidence - 0.65).abs() < 1e-9);
            assert_eq!(c.score.policy_fit, 10.0);
        }

        #[test]
        fn test_generation_is_deterministic() {
            let rollup = FakeRollup::with(|s| s.l1_healthy = false);
            let snapshot = rollup.snapshot_now();
            let generator = CandidateGenerator::default();
            let a = generator.generate(&snapshot, AutonomyLevel::LowRisk, t0());
            let b = generator.generate(&snapshot, AutonomyLevel::LowRisk, t0() + Duration::seconds(30));
            let sig = |v: &[GoalCandidate]| v.iter().map(|c| (c.signature.clone(), c.score.total)).collect::<Vec<_>>();
            assert_eq!(sig(&a), sig(&b));
            assert!(a.windows(2).all(|w| w[0].score.total >= w[1].score.total));
        }

        #[test]
        fn test_failover_targets_first_other_fallback() {
            let rollup = FakeRollup::with(|s| {
                s.cpu = 40.0;
                s.txpool = 0;
                s.l1_healthy = false;
            });
            let candidates = CandidateGenerator::default().generate(&rollup.snapshot_now(), AutonomyLevel::HighRisk, t0());
            let failover = candidates.iter().find(|c| c.intent == GoalIntent::Failover).unwrap();
            assert_eq!(failover.params["endpoint"], "https://l1-b.example");
            assert_eq!(failover.params["previousEndpoint"], "https://l1-a.example");
            assert_eq!(failover.risk, RiskLevel::High);
        }

        #[test]
        fn test_idle_capacity_yields_cost_optimize() {
            let rollup = FakeRollup::with(|s| {
                s.cpu = 5.0;
                s.txpool = 0;
                s.vcpu = 4;
            });
            let candidates = CandidateGenerator::default().generate(&rollup.snapshot_now(), AutonomyLevel::LowRisk, t0());
            assert_eq!(candidates.len(), 1);
            assert_eq!(candidates[0].intent, GoalIntent::CostOptimize);
            assert_eq!(candidates[0].params["targetVcpu"], 2);
        }

        #[test]
        fn test_policy_fit_by_level() {
            assert_eq!(policy_fit(AutonomyLevel::Manual, RiskLevel::Low), 0.0);
            assert_eq!(policy_fit(AutonomyLevel::DryRun, RiskLevel::Low), 5.0);
            assert_eq!(policy_fit(AutonomyLevel::LowRisk, RiskLevel::Medium), 5.0);
            assert_eq!(policy_fit(AutonomyLevel::MediumRisk, RiskLevel::Medium), 10.0);
        }
    }

    // ── Tick ───────────────────────────────────────────────────

    mod tick {
        use super::*;

        #[test]
        fn test_tick_is_idempotent_for_unchanged_snapshot() {
            let h = harness(config(|_| {}), FakeRollup::with(|_| {}));
            let snapshot = h.rollup.snapshot_now();

            let first = h.manager.tick(t0(), &snapshot);
            assert!(first.enabled);
            assert_eq!(first.queued_count, 1);
            assert_eq!(first.queue_depth, 1);

            let second = h.manager.tick(t0() + Duration::seconds(10), &snapshot);
            assert_eq!(second.generated_count, 0);
            assert_eq!(second.queued_count, 0);
            assert_eq!(second.queue_depth, 1);
            assert_eq!(h.store.scan_queue().unwrap().items.len(), 1);
        }

        #[test]
        fn test_disabled_manager_does_nothing() {
            let h = harness(config(|c| c.goal_manager.enabled = false), FakeRollup::with(|_| {}));
            let result = h.manager.tick(t0(), &h.rollup.snapshot_now());
            assert!(!result.enabled);
            assert!(h.store.scan_queue().unwrap().items.is_empty());
        }

        fn suppressed_reason(config: RollpilotConfig, rollup: Arc<FakeRollup>) -> GoalSuppressionReasonCode {
            let h = harness(config, rollup);
            let result = h.manager.tick(t0(), &h.rollup.snapshot_now());
            assert_eq!(result.queued_count, 0);
            assert_eq!(result.suppressed_count, 1);
            let suppressions = h.store.list_suppressions(10).unwrap();
            assert_eq!(suppressions.len(), 1);
            suppressions[0].reason_code
        }

        #[test]
        fn test_low_confidence_suppressed() {
            let reason = suppressed_reason(
                config(|c| c.goal_manager.min_candidate_confidence = 0.9),
                FakeRollup::with(|_| {}),
            );
            assert_eq!(reason, GoalSuppressionReasonCode::LowConfidence);
        }

        #[test]
        fn test_low_score_suppressed() {
            let reason = suppressed_reason(
                config(|c| c.goal_manager.min_candidate_score = 95.0),
                FakeRollup::with(|_| {}),
            );
            assert_eq!(reason, GoalSuppressionReasonCode::LowScore);
        }

        #[test]
        fn test_manual_level_suppresses_as_policy_blocked() {
            let reason = suppressed_reason(
                config(|c| {
                    c.autonomy.level = "A0".into();
                    c.goal_manager.min_candidate_score = 10.0;
                }),
                FakeRollup::with(|_| {}),
            );
            assert_eq!(reason, GoalSuppressionReasonCode::PolicyBlocked);
        }

        #[test]
        fn test_unplannable_candidate_suppressed_as_invalid_plan() {
            let reason = suppressed_reason(
                config(|c| c.goal_manager.max_replans = 0),
                FakeRollup::with(|s| s.cooldown = 120),
            );
            assert_eq!(reason, GoalSuppressionReasonCode::InvalidPlan);
        }

        #[test]
        fn test_queue_full_suppresses_overflow() {
            let h = harness(
                config(|c| c.goal_manager.max_queue_size = 1),
                FakeRollup::with(|s| s.l1_healthy = false),
            );
            let result = h.manager.tick(t0(), &h.rollup.snapshot_now());
            assert_eq!(result.generated_count, 2);
            assert_eq!(result.queued_count, 1);
            assert_eq!(result.suppressed_count, 1);
            let suppressions = h.store.list_suppressions(10).unwrap();
            assert_eq!(suppressions[0].reason_code, GoalSuppressionReasonCode::QueueFull);
        }

        #[test]
        fn test_suppressed_candidate_not_reconsidered_within_window() {
            let h = harness(
                config(|c| c.goal_manager.min_candidate_confidence = 0.9),
                FakeRollup::with(|_| {}),
            );
            let snapshot = h.rollup.snapshot_now();
            assert_eq!(h.manager.tick(t0(), &snapshot).suppressed_count, 1);
            let again = h.manager.tick(t0() + Duration::seconds(60), &snapshot);
            assert_eq!(again.generated_count, 0);
            assert_eq!(again.suppressed_count, 0);
            // Past the suppression window the candidate is judged afresh
            let later = h.manager.tick(t0() + Duration::seconds(601), &snapshot);
            assert_eq!(later.suppressed_count, 1);
        }

        #[tokio::test]
        async fn test_tick_from_probe_queues_goal() {
            let h = harness(config(|_| {}), FakeRollup::with(|_| {}));
            let result = h.manager.tick_from_probe(t0()).await;
            assert_eq!(result.queued_count, 1);
            assert_eq!(only_goal(&h.store).intent, GoalIntent::Stabilize);
        }
    }

    // ── Dispatch ───────────────────────────────────────────────

    mod dispatch {
        use super::*;

        #[tokio::test]
        async fn test_dry_run_completes_without_writes() {
            let h = harness(config(|_| {}), FakeRollup::with(|_| {}));
            h.manager.tick(t0(), &h.rollup.snapshot_now());
            let goal_id = only_goal(&h.store).goal_id;

            let result = h.manager.dispatch_top_goal(DispatchOptions::dry_run("test").at(t0())).await;
            assert_eq!(result.status, DispatchStatus::Completed);
            assert_eq!(result.goal_id, Some(goal_id));
            assert_eq!(result.execution_log_count, 3);
            assert!(h.rollup.calls_to("scale_component").is_empty());
            assert_eq!(h.rollup.vcpu(), 2);
            assert!(result.verifications.iter().all(|v| v.passed));

            assert_eq!(
                phases(&h.store, goal_id),
                vec![
                    CheckpointPhase::Scheduled,
                    CheckpointPhase::LeaseAcquired,
                    CheckpointPhase::PolicyCheck,
                    CheckpointPhase::PlanStarted,
                    CheckpointPhase::PlanCompleted,
                    CheckpointPhase::VerifyCompleted,
                ]
            );
            assert!(h.store.scan_queue().unwrap().items.is_empty());
            let lease = h.store.get_lease(goal_id).unwrap().unwrap();
            assert!(!lease.is_live(t0()));
            let suppressed = h.store.list_suppressions(10).unwrap();
            assert_eq!(suppressed.len(), 1);
            assert_eq!(suppressed[0].reason_code, GoalSuppressionReasonCode::RecentlyCompleted);
        }

        #[tokio::test]
        async fn test_completed_goal_is_not_requeued_for_same_snapshot() {
            let h = harness(config(|_| {}), FakeRollup::with(|_| {}));
            let snapshot = h.rollup.snapshot_now();
            assert_eq!(h.manager.tick(t0(), &snapshot).queued_count, 1);

            for cycle in 1..=5 {
                let at = t0() + Duration::seconds(cycle * 10);
                let result = h.manager.dispatch_top_goal(DispatchOptions::dry_run("test").at(at)).await;
                let again = h.manager.tick(at, &snapshot);
                assert_eq!(again.queued_count, 0, "cycle {cycle}");
                assert_eq!(again.generated_count, 0, "cycle {cycle}");
                assert_eq!(again.queue_depth, 0);
                if cycle == 1 {
                    assert_eq!(result.status, DispatchStatus::Completed);
                } else {
                    assert_eq!(result.status, DispatchStatus::Idle);
                }
            }
            assert!(h.store.scan_queue().unwrap().items.is_empty());

            // Once the window passes the same condition is acted on again
            let later = h.manager.tick(t0() + Duration::seconds(10 + 601), &snapshot);
            assert_eq!(later.queued_count, 1);
        }

        #[tokio::test]
        async fn test_leftover_completed_row_is_pruned_on_tick() {
            let h = harness(config(|_| {}), FakeRollup::with(|_| {}));
            h.manager.tick(t0(), &h.rollup.snapshot_now());
            let mut item = only_goal(&h.store);
            item.status = GoalQueueStatus::Completed;
            h.store.update_queue_item(&item).unwrap();

            let quiet = FakeRollup::with(|s| {
                s.cpu = 10.0;
                s.txpool = 0;
            });
            assert!(h.manager.tick(t0(), &quiet.snapshot_now()).error.is_none());
            assert!(h.store.get_queue_item(item.goal_id).unwrap().is_none());
        }

        #[tokio::test]
        async fn test_skipped_write_is_neither_verified_nor_rolled_back() {
            let h = harness(
                config(|c| c.autonomy.level = "A3".into()),
                FakeRollup::with(|s| s.scale_skipped = true),
            );
            h.manager.tick(t0(), &h.rollup.snapshot_now());

            let result = h.manager.dispatch_top_goal(DispatchOptions::live("test").at(t0())).await;
            assert_eq!(result.status, DispatchStatus::Completed);
            assert!(result.verifications.is_empty());
            assert!(result.rollback.is_none());
            assert_eq!(h.rollup.calls_to("scale_component").len(), 1);
            assert_eq!(h.rollup.vcpu(), 2);
        }

        #[tokio::test]
        async fn test_live_dispatch_scales_and_verifies() {
            let h = harness(config(|c| c.autonomy.level = "A3".into()), FakeRollup::with(|_| {}));
            h.manager.tick(t0(), &h.rollup.snapshot_now());

            let result = h.manager.dispatch_top_goal(DispatchOptions::live("test").at(t0())).await;
            assert_eq!(result.status, DispatchStatus::Completed);
            assert_eq!(h.rollup.vcpu(), 4);
            assert_eq!(result.verifications.len(), 1);
            assert!(result.verifications[0].passed);

            let scale = h.rollup.calls_to("scale_component");
            assert_eq!(scale.len(), 1);
            assert!(scale[0].idempotency_key.is_some());
            assert!(!scale[0].previously_requested);
        }

        #[tokio::test]
        async fn test_nothing_queued_is_idle() {
            let h = harness(config(|_| {}), FakeRollup::with(|_| {}));
            let result = h.manager.dispatch_top_goal(DispatchOptions::dry_run("test").at(t0())).await;
            assert_eq!(result.status, DispatchStatus::Idle);
            assert!(!result.dispatched);
        }

        #[tokio::test]
        async fn test_read_only_mode_blocks_live_writes() {
            let h = harness(
                config(|c| {
                    c.autonomy.level = "A3".into();
                    c.policy.read_only_mode = true;
                }),
                FakeRollup::with(|_| {}),
            );
            h.manager.tick(t0(), &h.rollup.snapshot_now());

            let result = h.manager.dispatch_top_goal(DispatchOptions::live("test").at(t0())).await;
            assert_eq!(result.status, DispatchStatus::Requeued);
            assert_eq!(result.reason.as_deref(), Some("read_only_write_blocked"));
            assert!(h.rollup.calls.lock().is_empty());
            assert_eq!(h.rollup.vcpu(), 2);
        }

        #[tokio::test]
        async fn test_manual_level_denies_queued_goal() {
            let h = harness(config(|_| {}), FakeRollup::with(|_| {}));
            h.manager.tick(t0(), &h.rollup.snapshot_now());
            h.manager
                .set_autonomy_policy(&AutonomyPolicyUpdate {
                    level: Some(AutonomyLevel::Manual),
                    ..Default::default()
                })
                .unwrap();

            let result = h.manager.dispatch_top_goal(DispatchOptions::dry_run("test").at(t0())).await;
            assert_eq!(result.reason.as_deref(), Some("autonomy_level_blocked"));
            assert!(h.rollup.calls.lock().is_empty());
        }

        #[tokio::test]
        async fn test_medium_risk_write_denied_at_low_risk_level() {
            let h = harness(config(|_| {}), FakeRollup::with(|_| {}));
            h.manager.tick(t0(), &h.rollup.snapshot_now());
            let result = h.manager.dispatch_top_goal(DispatchOptions::live("test").at(t0())).await;
            assert_eq!(result.reason.as_deref(), Some("risk_exceeds_autonomy_level"));
            assert!(h.rollup.calls_to("scale_component").is_empty());
        }

        #[tokio::test]
        async fn test_scaling_cooldown_defers_goal() {
            let h = harness(config(|_| {}), FakeRollup::with(|_| {}));
            h.manager.tick(t0(), &h.rollup.snapshot_now());
            h.rollup.state.lock().cooldown = 90;
            let result = h.manager.dispatch_top_goal(DispatchOptions::dry_run("test").at(t0())).await;
            assert_eq!(result.status, DispatchStatus::Idle);
            assert_eq!(only_goal(&h.store).status, GoalQueueStatus::Queued);
        }

        #[tokio::test]
        async fn test_goal_leased_elsewhere_is_skipped() {
            let h = harness(config(|_| {}), FakeRollup::with(|_| {}));
            h.manager.tick(t0(), &h.rollup.snapshot_now());
            let goal_id = only_goal(&h.store).goal_id;
            h.store
                .try_acquire_lease(goal_id, "worker-b", t0(), Duration::seconds(60))
                .unwrap()
                .unwrap();

            let result = h.manager.dispatch_top_goal(DispatchOptions::dry_run("test").at(t0())).await;
            assert_eq!(result.status, DispatchStatus::Idle);
            assert!(h.store.list_checkpoints(goal_id).unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_two_managers_never_run_the_same_goal() {
            let rollup = FakeRollup::with(|_| {});
            let store = Arc::new(MemoryGoalStore::new());
            let a = manager_for(&config(|_| {}), &rollup, &store);
            let b = manager_for(&config(|c| c.goal_manager.owner_id = "worker-b".into()), &rollup, &store);
            a.tick(t0(), &rollup.snapshot_now());
            let goal_id = only_goal(&store).goal_id;

            let (ra, rb) = tokio::join!(
                a.dispatch_top_goal(DispatchOptions::dry_run("a").at(t0())),
                b.dispatch_top_goal(DispatchOptions::dry_run("b").at(t0())),
            );
            let completed = [&ra, &rb].iter().filter(|r| r.status == DispatchStatus::Completed).count();
            assert_eq!(completed, 1);
            assert!([&ra, &rb].iter().any(|r| r.status == DispatchStatus::Idle));

            let scheduled = phases(&store, goal_id)
                .into_iter()
                .filter(|p| *p == CheckpointPhase::Scheduled)
                .count();
            assert_eq!(scheduled, 1);
        }
    }

    // ── Lease upkeep during execution ──────────────────────────

    mod leases {
        use super::*;

        #[tokio::test]
        async fn test_lease_taken_mid_plan_stops_before_write() {
            let h = harness(config(|c| c.autonomy.level = "A3".into()), FakeRollup::with(|_| {}));
            h.manager.tick(t0(), &h.rollup.snapshot_now());
            let goal_id = only_goal(&h.store).goal_id;

            // Another owner takes the goal while the first read step runs
            let store = h.store.clone();
            *h.rollup.on_first_call.lock() = Some(Box::new(move || {
                store.release_lease(goal_id, "worker-a", t0()).unwrap();
                store
                    .try_acquire_lease(goal_id, "worker-b", t0(), Duration::seconds(60))
                    .unwrap()
                    .unwrap();
            }));

            let result = h.manager.dispatch_top_goal(DispatchOptions::live("test").at(t0())).await;
            assert_eq!(result.status, DispatchStatus::LeaseLost);
            assert_eq!(h.rollup.calls.lock().len(), 1);
            assert!(h.rollup.calls_to("scale_component").is_empty());
            assert_eq!(h.rollup.vcpu(), 2);

            let lease = h.store.get_lease(goal_id).unwrap().unwrap();
            assert_eq!(lease.owner_id, "worker-b");
            assert!(lease.is_live(t0()));
            let seen = phases(&h.store, goal_id);
            assert!(!seen.contains(&CheckpointPhase::PlanCompleted));
            assert!(!seen.contains(&CheckpointPhase::Failed));
        }

        #[tokio::test]
        async fn test_slow_plan_keeps_its_lease() {
            let rollup = FakeRollup::with(|s| s.action_delay_ms = 1_900);
            let store = Arc::new(MemoryGoalStore::new());
            let slow = |owner: &str| {
                config(|c| {
                    c.autonomy.level = "A3".into();
                    c.goal_manager.owner_id = owner.into();
                    c.goal_manager.lease_ttl_secs = 5;
                    c.goal_manager.action_timeout_secs = 2;
                })
            };
            let a = manager_for(&slow("worker-a"), &rollup, &store);
            let b = manager_for(&slow("worker-b"), &rollup, &store);
            a.tick(Utc::now(), &rollup.snapshot_now());

            // Three executor calls outlast one TTL; b arrives after it
            let (ra, rb) = tokio::join!(a.dispatch_top_goal(DispatchOptions::live("a")), async {
                tokio::time::sleep(std::time::Duration::from_millis(5_300)).await;
                b.dispatch_top_goal(DispatchOptions::live("b")).await
            });
            assert_eq!(ra.status, DispatchStatus::Completed);
            assert_eq!(rb.status, DispatchStatus::Idle);
            let scale = rollup.calls_to("scale_component");
            assert_eq!(scale.len(), 1);
            assert!(!scale[0].previously_requested);
            assert_eq!(rollup.vcpu(), 4);
        }

        #[tokio::test]
        async fn test_rejected_heartbeat_stops_runner() {
            let rollup = FakeRollup::with(|_| {});
            let store: Arc<dyn GoalStore> = Arc::new(MemoryGoalStore::new());
            let runner = PlanRunner::new(rollup.clone(), rollup.clone(), store, 5, 3_600);
            let candidate = CandidateGenerator::default()
                .generate(&rollup.snapshot_now(), AutonomyLevel::HighRisk, t0())
                .into_iter()
                .find(|c| c.intent == GoalIntent::Stabilize)
                .unwrap();
            let mut plan = rollpilot_autonomy::GoalPlanner::default().build_plan(&candidate, false, t0());
            assert_eq!(plan.steps.len(), 3);

            let mut beats = 0;
            let mut renew = || -> Result<bool> {
                beats += 1;
                Ok(beats < 2)
            };
            let run = runner
                .run(candidate.id, "worker-a", &mut plan, t0(), &mut renew)
                .await;
            let failure = run.failure.unwrap();
            assert_eq!(failure.reason_code, "lease_lost");
            assert_eq!(failure.step_id, plan.steps[1].id);
            assert_eq!(run.executions.len(), 1);
            assert_eq!(rollup.calls.lock().len(), 1);
            assert_eq!(plan.status, PlanStatus::Failed);
        }
    }

    // ── Retries, DLQ, replay ───────────────────────────────────

    mod retries {
        use super::*;

        #[test]
        fn test_backoff_doubles_and_caps() {
            assert_eq!(retry_backoff_ms(5_000, 300_000, 0), 5_000);
            assert_eq!(retry_backoff_ms(5_000, 300_000, 1), 10_000);
            assert_eq!(retry_backoff_ms(5_000, 300_000, 3), 40_000);
            assert_eq!(retry_backoff_ms(5_000, 300_000, 10), 300_000);
            assert_eq!(retry_backoff_ms(5_000, 300_000, 200), 300_000);
        }

        #[tokio::test]
        async fn test_failed_action_requeues_then_dead_letters_then_replays() {
            let h = harness(
                config(|c| {
                    c.autonomy.level = "A3".into();
                    c.goal_manager.max_retries = 1;
                }),
                FakeRollup::with(|s| s.scale_fails = true),
            );
            h.manager.tick(t0(), &h.rollup.snapshot_now());
            let goal_id = only_goal(&h.store).goal_id;

            let first = h.manager.dispatch_top_goal(DispatchOptions::live("test").at(t0())).await;
            assert_eq!(first.status, DispatchStatus::Requeued);
            assert_eq!(first.reason.as_deref(), Some("action_failed"));
            let item = only_goal(&h.store);
            assert_eq!(item.attempts, 1);
            assert_eq!(item.status, GoalQueueStatus::Requeued);
            assert_eq!(item.next_attempt_at, Some(t0() + Duration::milliseconds(10_000)));

            // Still backing off
            let early = h
                .manager
                .dispatch_top_goal(DispatchOptions::live("test").at(t0() + Duration::seconds(1)))
                .await;
            assert_eq!(early.status, DispatchStatus::Idle);

            let retry_at = t0() + Duration::seconds(11);
            let second = h.manager.dispatch_top_goal(DispatchOptions::live("test").at(retry_at)).await;
            assert_eq!(second.status, DispatchStatus::DeadLettered);
            assert!(h.store.scan_queue().unwrap().items.is_empty());
            let parked = h.store.get_dlq_item(goal_id).unwrap().unwrap();
            assert_eq!(parked.attempts, 2);
            assert_eq!(parked.reason, "action_failed");
            assert!(phases(&h.store, goal_id).ends_with(&[CheckpointPhase::Failed, CheckpointPhase::Dlq]));

            // The retry saw the first attempt's side-effect record
            let scale = h.rollup.calls_to("scale_component");
            assert_eq!(scale.len(), 2);
            assert!(scale[1].previously_requested);

            let replay = h.manager.replay_dlq(goal_id, retry_at);
            assert!(replay.replayed);
            let item = only_goal(&h.store);
            assert_eq!(item.attempts, 0);
            assert_eq!(item.status, GoalQueueStatus::Queued);
            assert!(h.store.get_dlq_item(goal_id).unwrap().is_none());

            h.rollup.state.lock().scale_fails = false;
            let third = h.manager.dispatch_top_goal(DispatchOptions::live("test").at(retry_at)).await;
            assert_eq!(third.status, DispatchStatus::Completed);
            assert_eq!(h.rollup.vcpu(), 4);
        }

        #[test]
        fn test_replay_unknown_goal_reports_not_found() {
            let h = harness(config(|_| {}), FakeRollup::with(|_| {}));
            let replay = h.manager.replay_dlq(uuid::Uuid::new_v4(), t0());
            assert!(!replay.replayed);
            assert_eq!(replay.reason.as_deref(), Some("not_found"));
        }

        #[tokio::test]
        async fn test_malformed_row_quarantined_to_dlq() {
            let h = harness(config(|_| {}), FakeRollup::with(|_| {}));
            let goal_id = uuid::Uuid::new_v4();
            h.store.inject_malformed_record(goal_id.to_string(), "{not json");

            let result = h.manager.dispatch_top_goal(DispatchOptions::dry_run("test").at(t0())).await;
            assert_eq!(result.status, DispatchStatus::Idle);
            let parked = h.store.get_dlq_item(goal_id).unwrap().unwrap();
            assert_eq!(parked.reason, "malformed_record");
            assert_eq!(parked.raw_record.as_deref(), Some("{not json"));
            assert!(h.store.scan_queue().unwrap().malformed.is_empty());

            let replay = h.manager.replay_dlq(goal_id, t0());
            assert_eq!(replay.reason.as_deref(), Some("unrecoverable_record"));
        }
    }

    // ── Verification and rollback ──────────────────────────────

    mod rollback {
        use super::*;

        #[tokio::test]
        async fn test_unverified_scale_is_rolled_back() {
            let h = harness(
                config(|c| c.autonomy.level = "A3".into()),
                FakeRollup::with(|s| s.scale_ignored = true),
            );
            h.manager.tick(t0(), &h.rollup.snapshot_now());
            let goal_id = only_goal(&h.store).goal_id;

            let result = h.manager.dispatch_top_goal(DispatchOptions::live("test").at(t0())).await;
            assert_eq!(result.status, DispatchStatus::Requeued);
            assert_eq!(result.reason.as_deref(), Some("verification_failed"));
            assert!(!result.verifications[0].passed);

            let rollback = result.rollback.unwrap();
            assert!(rollback.attempted);
            assert!(rollback.success);
            assert!(rollback.verification.unwrap().passed);

            let scale = h.rollup.calls_to("scale_component");
            assert_eq!(scale.len(), 2);
            assert_eq!(scale[1].params["targetVcpu"], 2);
            assert_eq!(h.rollup.vcpu(), 2);

            assert!(phases(&h.store, goal_id).ends_with(&[
                CheckpointPhase::VerifyCompleted,
                CheckpointPhase::RollbackCompleted,
                CheckpointPhase::Failed,
                CheckpointPhase::Requeued,
            ]));
        }

        fn live_scale(pre: Option<u32>, target: u32) -> StepExecution {
            StepExecution {
                step_id: "step-3".into(),
                action: PlanAction::ScaleExecution,
                executor_action: "scale_component".into(),
                params: json!({ "targetVcpu": target }),
                status: ActionStatus::Success,
                output: Value::Null,
                message: None,
                dry_run: false,
                idempotency_key: None,
                previously_requested: false,
                pre_state: PreActionState { vcpu: pre, endpoint: None },
                started_at: t0(),
                finished_at: t0(),
            }
        }

        #[test]
        fn test_rollback_plan_restores_previous_vcpu() {
            let plan = rollpilot_engine::rollback::build_rollback_plan(&live_scale(Some(2), 4));
            assert!(plan.available);
            assert_eq!(plan.action_type, Some(PlanAction::ScaleExecution));
            assert_eq!(plan.params, Some(json!({ "targetVcpu": 2 })));
        }

        #[test]
        fn test_no_rollback_without_captured_state() {
            let plan = rollpilot_engine::rollback::build_rollback_plan(&live_scale(None, 4));
            assert!(!plan.available);
        }

        #[tokio::test]
        async fn test_unavailable_rollback_is_not_attempted() {
            let rollup = FakeRollup::with(|_| {});
            let verifier = OperationVerifier::new(rollup.clone(), 5);
            let runner = RollbackRunner::new(rollup.clone(), verifier, 5);
            let mut restart = live_scale(None, 4);
            restart.action = PlanAction::RestartExecution;
            let plan = rollpilot_engine::rollback::build_rollback_plan(&restart);
            let result = runner.run_rollback_plan(&plan, false, t0()).await;
            assert!(!result.attempted);
            assert!(rollup.calls.lock().is_empty());
        }

        #[tokio::test]
        async fn test_verifier_uses_supplied_observation() {
            let verifier = OperationVerifier::new(FakeRollup::with(|_| {}), 5);
            let request = VerifyRequest {
                action_type: PlanAction::SetRoutingPolicy,
                dry_run: false,
                expected: json!({ "endpoint": "https://l1-b.example" }),
                observed: Some(json!({ "endpoint": "https://l1-b.example", "healthy": false })),
            };
            let result = verifier.verify_operation_outcome(&request, t0()).await;
            assert!(!result.passed);
            assert!(result.details.unwrap().contains("unhealthy"));
        }

        #[tokio::test]
        async fn test_resume_at_verification_after_owner_crash() {
            let h = harness(config(|c| c.autonomy.level = "A3".into()), FakeRollup::with(|_| {}));
            h.manager.tick(t0(), &h.rollup.snapshot_now());
            let mut item = only_goal(&h.store);
            let goal_id = item.goal_id;

            // A dead owner leased the goal, scaled 2 -> 4 and died before verifying
            h.store
                .try_acquire_lease(goal_id, "worker-dead", t0(), Duration::seconds(60))
                .unwrap()
                .unwrap();
            item.status = GoalQueueStatus::Running;
            h.store.update_queue_item(&item).unwrap();
            for phase in [
                CheckpointPhase::Scheduled,
                CheckpointPhase::LeaseAcquired,
                CheckpointPhase::PolicyCheck,
                CheckpointPhase::PlanStarted,
            ] {
                h.store
                    .append_checkpoint(&GoalExecutionCheckpoint::new(goal_id, phase, 0, t0()))
                    .unwrap();
            }
            h.store
                .append_checkpoint(
                    &GoalExecutionCheckpoint::new(goal_id, CheckpointPhase::PlanCompleted, 0, t0())
                        .with_details(json!({
                            "planId": uuid::Uuid::new_v4(),
                            "dryRun": false,
                            "executions": [live_scale(Some(2), 4)],
                        })),
                )
                .unwrap();
            h.rollup.state.lock().vcpu = 4;

            // Still leased by the dead owner
            let blocked = h
                .manager
                .dispatch_top_goal(DispatchOptions::live("test").at(t0() + Duration::seconds(30)))
                .await;
            assert_eq!(blocked.status, DispatchStatus::Idle);

            let result = h
                .manager
                .dispatch_top_goal(DispatchOptions::live("test").at(t0() + Duration::seconds(61)))
                .await;
            assert_eq!(result.status, DispatchStatus::Completed);
            assert_eq!(result.verifications.len(), 1);
            assert!(h.rollup.calls_to("scale_component").is_empty());
            assert!(!phases(&h.store, goal_id)[5..].contains(&CheckpointPhase::PlanStarted));
        }
    }

    // ── Autonomy policy and state ──────────────────────────────

    mod state {
        use super::*;

        #[test]
        fn test_autonomy_policy_shared_through_store() {
            let rollup = FakeRollup::with(|_| {});
            let store = Arc::new(MemoryGoalStore::new());
            let a = manager_for(&config(|_| {}), &rollup, &store);
            let b = manager_for(&config(|_| {}), &rollup, &store);

            a.set_autonomy_policy(&AutonomyPolicyUpdate {
                level: Some(AutonomyLevel::HighRisk),
                min_confidence_write: Some(0.9),
                ..Default::default()
            })
            .unwrap();
            let seen = b.autonomy_policy();
            assert_eq!(seen.level, AutonomyLevel::HighRisk);
            assert_eq!(seen.min_confidence_write, 0.9);

            let reset = b.reset_autonomy_policy().unwrap();
            assert_eq!(reset.level, AutonomyLevel::LowRisk);
            assert_eq!(a.autonomy_policy().level, AutonomyLevel::LowRisk);
        }

        #[tokio::test]
        async fn test_list_state_reports_everything() {
            let h = harness(config(|c| c.goal_manager.max_queue_size = 1), FakeRollup::with(|s| s.l1_healthy = false));
            h.manager.tick(t0(), &h.rollup.snapshot_now());
            let result = h.manager.dispatch_top_goal(DispatchOptions::dry_run("test").at(t0())).await;
            assert_eq!(result.status, DispatchStatus::Completed);

            let state = h.manager.list_state(20);
            assert!(state.queue.is_empty());
            let reasons: Vec<_> = state.suppressions.iter().map(|s| s.reason_code).collect();
            assert_eq!(reasons.len(), 2);
            assert!(reasons.contains(&GoalSuppressionReasonCode::QueueFull));
            assert!(reasons.contains(&GoalSuppressionReasonCode::RecentlyCompleted));
            assert!(!state.checkpoints.is_empty());
            assert!(state.errors.is_empty());

            let view = h.manager.config();
            assert_eq!(view.owner_id, "worker-a");
            assert_eq!(view.goal_manager.max_queue_size, 1);
        }
    }

    // ── MCP gateway ────────────────────────────────────────────

    mod mcp {
        use super::*;

        fn gateway(f: impl FnOnce(&mut RollpilotConfig)) -> (Harness, McpGateway) {
            let config = config(f);
            let h = harness(config.clone(), FakeRollup::with(|_| {}));
            let gateway = McpGateway::new(h.manager.clone(), h.rollup.clone(), config.policy.clone(), 5);
            (h, gateway)
        }

        fn authed() -> CallContext {
            CallContext::with_api_key("secret").at(t0())
        }

        fn call(name: &str, arguments: Value) -> Value {
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": { "name": name, "arguments": arguments },
            })
        }

        async fn issue(gateway: &McpGateway, tool: &str, params: Value, approver: &str) -> String {
            let response = gateway
                .handle(
                    json!({
                        "jsonrpc": "2.0",
                        "id": "issue",
                        "method": "approvals/issue",
                        "params": { "toolName": tool, "toolParams": params, "approvedBy": approver },
                    }),
                    &authed(),
                )
                .await;
            assert!(!response.is_error(), "{response:?}");
            response.result.unwrap()["approvalToken"].as_str().unwrap().to_string()
        }

        #[tokio::test]
        async fn test_initialize_and_list_tools() {
            let (_h, gw) = gateway(|_| {});
            let init = gw
                .handle(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}), &authed())
                .await;
            assert_eq!(init.result.unwrap()["serverInfo"]["name"], "rollpilot");

            let list = gw
                .handle(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}), &authed())
                .await;
            let tools = list.result.unwrap()["tools"].as_array().unwrap().clone();
            assert_eq!(tools.len(), McpTool::ALL.len());
            let state = tools.iter().find(|t| t["name"] == "get_goal_manager_state").unwrap();
            assert_eq!(state["annotations"]["readOnlyHint"], true);
        }

        #[tokio::test]
        async fn test_protocol_errors() {
            let (_h, gw) = gateway(|_| {});
            let bad_version = gw.handle(json!({"jsonrpc": "1.0", "id": 1, "method": "tools/list"}), &authed()).await;
            assert_eq!(bad_version.error.unwrap().code, -32600);

            let unknown = gw.handle(json!({"jsonrpc": "2.0", "id": 1, "method": "drop_tables"}), &authed()).await;
            assert_eq!(unknown.error.unwrap().code, -32601);

            let unknown_tool = gw.handle(call("drop_tables", json!({})), &authed()).await;
            assert_eq!(unknown_tool.error.unwrap().code, -32601);
        }

        #[tokio::test]
        async fn test_missing_api_key_denied() {
            let (_h, gw) = gateway(|_| {});
            let response = gw.handle(call("get_goal_manager_state", json!({})), &CallContext::default()).await;
            let error = response.error.unwrap();
            assert_eq!(error.code, -32001);
            assert_eq!(error.reason_code(), Some("api_key_invalid"));
        }

        #[tokio::test]
        async fn test_read_tool_needs_no_approval() {
            let (h, gw) = gateway(|_| {});
            h.manager.tick(t0(), &h.rollup.snapshot_now());
            let response = gw.handle(call("get_goal_manager_state", json!({ "limit": 5 })), &authed()).await;
            let result = response.result.unwrap();
            assert_eq!(result["isError"], false);
            assert_eq!(result["structuredContent"]["queue"].as_array().unwrap().len(), 1);
            assert_eq!(result["content"][0]["type"], "text");
        }

        #[tokio::test]
        async fn test_plan_goal_validates_without_running() {
            let (h, gw) = gateway(|_| {});
            let response = gw
                .handle(
                    call("plan_goal", json!({ "intent": "stabilize", "params": { "currentVcpu": 2, "targetVcpu": 4 } })),
                    &authed(),
                )
                .await;
            let result = response.result.unwrap();
            assert_eq!(result["structuredContent"]["valid"], true);
            assert!(h.rollup.calls.lock().is_empty());

            let bad = gw.handle(call("plan_goal", json!({ "intent": "teleport" })), &authed()).await;
            assert_eq!(bad.error.unwrap().code, -32602);
        }

        #[tokio::test]
        async fn test_write_without_token_rejected() {
            let (h, gw) = gateway(|_| {});
            let response = gw.handle(call("scale_component", json!({ "targetVcpu": 4 })), &authed()).await;
            let error = response.error.unwrap();
            assert_eq!(error.code, -32002);
            assert_eq!(error.reason_code(), Some("approval_required"));
            assert!(h.rollup.calls.lock().is_empty());
        }

        #[tokio::test]
        async fn test_approved_write_runs_once() {
            let (h, gw) = gateway(|_| {});
            let token = issue(&gw, "scale_component", json!({ "targetVcpu": 4 }), "alice").await;

            let args = json!({ "targetVcpu": 4, "approvalToken": token });
            let first = gw.handle(call("scale_component", args.clone()), &authed()).await;
            let result = first.result.unwrap();
            assert_eq!(result["structuredContent"]["status"], "success");
            assert_eq!(result["structuredContent"]["verification"]["passed"], true);
            assert_eq!(h.rollup.vcpu(), 4);

            let replayed = gw.handle(call("scale_component", args), &authed()).await;
            let error = replayed.error.unwrap();
            assert_eq!(error.code, -32002);
            assert_eq!(error.reason_code(), Some("approval_token_missing_or_consumed"));
            assert_eq!(h.rollup.calls_to("scale_component").len(), 1);
        }

        #[tokio::test]
        async fn test_token_bound_to_params() {
            let (h, gw) = gateway(|_| {});
            let token = issue(&gw, "scale_component", json!({ "targetVcpu": 4 }), "alice").await;
            let response = gw
                .handle(call("scale_component", json!({ "targetVcpu": 8, "approvalToken": token })), &authed())
                .await;
            assert_eq!(response.error.unwrap().reason_code(), Some("approval_params_mismatch"));
            assert_eq!(h.rollup.vcpu(), 2);
        }

        #[tokio::test]
        async fn test_invalid_arguments_do_not_burn_token() {
            let (h, gw) = gateway(|_| {});
            let token = issue(&gw, "scale_component", json!({ "targetVcpu": 4 }), "alice").await;
            let bad = gw
                .handle(call("scale_component", json!({ "targetVcpu": "four", "approvalToken": token })), &authed())
                .await;
            assert_eq!(bad.error.unwrap().code, -32602);
            assert!(h.rollup.calls.lock().is_empty());

            let ok = gw
                .handle(call("scale_component", json!({ "targetVcpu": 4, "approvalToken": token })), &authed())
                .await;
            assert!(!ok.is_error(), "{ok:?}");
            assert_eq!(h.rollup.vcpu(), 4);
        }

        #[tokio::test]
        async fn test_direct_method_call_with_token_in_params() {
            let (h, gw) = gateway(|_| {});
            let token = issue(&gw, "switch_l1_rpc", json!({ "endpoint": "https://l1-b.example" }), "alice").await;
            let response = gw
                .handle(
                    json!({
                        "jsonrpc": "2.0",
                        "id": 7,
                        "method": "switch_l1_rpc",
                        "params": { "endpoint": "https://l1-b.example", "approvalToken": token },
                    }),
                    &authed(),
                )
                .await;
            assert_eq!(response.id, json!(7));
            assert_eq!(response.result.unwrap()["verification"]["passed"], true);
            assert_eq!(h.rollup.state.lock().endpoint, "https://l1-b.example");
        }

        #[tokio::test]
        async fn test_read_only_mode_denies_writes_unless_exempt() {
            let (_h, gw) = gateway(|c| {
                c.policy.read_only_mode = true;
                c.policy.read_only_exempt_tools = vec!["restart_component".into()];
            });
            let denied = gw.handle(call("scale_component", json!({ "targetVcpu": 4 })), &authed()).await;
            assert_eq!(denied.error.unwrap().reason_code(), Some("read_only_write_blocked"));

            let exempt = gw.handle(call("restart_component", json!({ "component": "execution" })), &authed()).await;
            assert_eq!(exempt.error.unwrap().reason_code(), Some("approval_required"));
        }

        #[tokio::test]
        async fn test_multi_approval_needs_distinct_approvers() {
            let (h, gw) = gateway(|c| c.policy.multi_approval_tools = vec!["restart_component".into()]);
            let params = json!({ "component": "execution" });
            let a1 = issue(&gw, "restart_component", params.clone(), "alice").await;
            let a2 = issue(&gw, "restart_component", params.clone(), "alice").await;
            let same = gw
                .handle(call("restart_component", json!({ "component": "execution", "approvalTokens": [a1, a2] })), &authed())
                .await;
            assert_eq!(same.error.unwrap().reason_code(), Some("approval_insufficient_approvers"));

            let b1 = issue(&gw, "restart_component", params.clone(), "alice").await;
            let b2 = issue(&gw, "restart_component", params, "bob").await;
            let ok = gw
                .handle(call("restart_component", json!({ "component": "execution", "approvalTokens": [b1, b2] })), &authed())
                .await;
            assert!(!ok.is_error(), "{ok:?}");
            assert_eq!(h.rollup.calls_to("restart_component").len(), 1);
        }

        #[tokio::test]
        async fn test_issuing_approval_requires_api_key() {
            let (_h, gw) = gateway(|_| {});
            let response = gw
                .handle(
                    json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "method": "approvals/issue",
                        "params": { "toolName": "scale_component", "toolParams": { "targetVcpu": 4 } },
                    }),
                    &CallContext::with_api_key("wrong").at(t0()),
                )
                .await;
            assert_eq!(response.error.unwrap().code, -32001);
        }

        #[tokio::test]
        async fn test_dry_run_execute_is_a_read() {
            let (h, gw) = gateway(|_| {});
            h.manager.tick(t0(), &h.rollup.snapshot_now());
            let response = gw.handle(call("execute_goal_plan", json!({ "dryRun": true })), &authed()).await;
            let result = response.result.unwrap();
            assert_eq!(result["structuredContent"]["status"], "completed");
            assert!(h.rollup.calls_to("scale_component").is_empty());

            let live = gw
                .handle(call("execute_goal_plan", json!({ "dryRun": false, "allowWrites": true })), &authed())
                .await;
            assert_eq!(live.error.unwrap().code, -32002);
        }
    }
}
