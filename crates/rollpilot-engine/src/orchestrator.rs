use chrono::{DateTime, Duration, Utc};
use rollpilot_autonomy::{
    AutonomyGateInput, AutonomyPolicyStore, AutonomyPolicyUpdate, GoalExecutionPolicyInput,
    GoalPlanner, PlanOutcome, RuntimeAutonomyPolicy, ValidationRequest, evaluate_autonomy_gate,
    evaluate_goal_execution_policy,
};
use rollpilot_config::{GoalManagerConfig, RollpilotConfig};
use rollpilot_core::{
    ActionExecutor, Event, EventBus, GoalCandidate, GoalId, GoalIntent, OwnerId, PlanId,
    RuntimeContext, StateProbe, SystemSnapshot,
};
use rollpilot_store::{
    CheckpointPhase, GoalDlqItem, GoalExecutionCheckpoint, GoalLeaseRecord, GoalQueueItem,
    GoalQueueStatus, GoalStore, GoalSuppressionReasonCode, GoalSuppressionRecord, MalformedRecord,
    ReplayOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::candidates::CandidateGenerator;
use crate::rollback::{RollbackResult, RollbackRunner, build_rollback_plan};
use crate::runner::{PlanRunner, StepExecution, bounded};
use crate::verifier::{OperationVerificationResult, OperationVerifier, VerifyRequest};

// ── Results ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickResult {
    pub enabled: bool,
    pub generated_count: usize,
    pub queued_count: usize,
    pub suppressed_count: usize,
    pub queue_depth: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOptions {
    /// Fixed clock for every phase of the attempt; wall clock when `None`.
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default)]
    pub allow_writes: bool,
    #[serde(default = "default_initiator")]
    pub initiated_by: String,
}

fn default_true() -> bool {
    true
}

fn default_initiator() -> String {
    "system".into()
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            now: None,
            dry_run: true,
            allow_writes: false,
            initiated_by: default_initiator(),
        }
    }
}

impl DispatchOptions {
    pub fn dry_run(initiated_by: impl Into<String>) -> Self {
        Self {
            initiated_by: initiated_by.into(),
            ..Self::default()
        }
    }

    pub fn live(initiated_by: impl Into<String>) -> Self {
        Self {
            dry_run: false,
            allow_writes: true,
            initiated_by: initiated_by.into(),
            ..Self::default()
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Disabled,
    /// Nothing was eligible, or every eligible goal is leased elsewhere.
    Idle,
    Completed,
    Requeued,
    DeadLettered,
    /// Another owner took the goal over mid-attempt; this caller stopped writing.
    LeaseLost,
    /// A store fault ended the attempt; the lease is left to expire.
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub enabled: bool,
    pub dispatched: bool,
    pub goal_id: Option<GoalId>,
    pub plan_id: Option<PlanId>,
    pub status: DispatchStatus,
    pub execution_log_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verifications: Vec<OperationVerificationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackResult>,
}

impl DispatchResult {
    fn undispatched(enabled: bool, status: DispatchStatus, reason: impl Into<String>) -> Self {
        Self {
            enabled,
            dispatched: false,
            goal_id: None,
            plan_id: None,
            status,
            execution_log_count: 0,
            reason: Some(reason.into()),
            verifications: Vec::new(),
            rollback: None,
        }
    }

    fn for_goal(goal_id: GoalId, status: DispatchStatus) -> Self {
        Self {
            enabled: true,
            dispatched: true,
            goal_id: Some(goal_id),
            plan_id: None,
            status,
            execution_log_count: 0,
            reason: None,
            verifications: Vec::new(),
            rollback: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResult {
    pub replayed: bool,
    pub goal_id: GoalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<GoalQueueItem>,
}

/// Snapshot of everything the goal manager holds, for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalManagerState {
    pub queue: Vec<GoalQueueItem>,
    pub dlq: Vec<GoalDlqItem>,
    pub leases: Vec<GoalLeaseRecord>,
    pub suppressions: Vec<GoalSuppressionRecord>,
    pub checkpoints: Vec<GoalExecutionCheckpoint>,
    pub autonomy_policy: RuntimeAutonomyPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalManagerConfigView {
    pub owner_id: OwnerId,
    pub read_only_mode: bool,
    pub goal_manager: GoalManagerConfig,
    pub autonomy_policy: RuntimeAutonomyPolicy,
}

/// `min(base * 2^attempts, max)` in milliseconds.
pub fn retry_backoff_ms(base_ms: u64, max_ms: u64, attempts: u32) -> u64 {
    let factor = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(max_ms)
}

// ── Goal manager ───────────────────────────────────────────────

/// One dispatch attempt on a leased goal.
struct Attempt {
    item: GoalQueueItem,
    lease: GoalLeaseRecord,
    fixed_now: Option<DateTime<Utc>>,
}

impl Attempt {
    fn now(&self) -> DateTime<Utc> {
        self.fixed_now.unwrap_or_else(Utc::now)
    }

    fn goal_id(&self) -> GoalId {
        self.item.goal_id
    }
}

/// Where an interrupted attempt left off.
struct ResumePoint {
    plan_id: Option<PlanId>,
    executions: Vec<StepExecution>,
}

/// Durable goal orchestrator: generation on `tick`, leased execution on
/// `dispatch_top_goal`, retries and the dead-letter queue.
///
/// Several managers (in one process or many) may share a store; the lease
/// is the only thing that serializes work on a goal.
pub struct GoalManager {
    config: GoalManagerConfig,
    read_only_mode: bool,
    owner_id: OwnerId,
    store: Arc<dyn GoalStore>,
    probe: Arc<dyn StateProbe>,
    autonomy: AutonomyPolicyStore,
    generator: CandidateGenerator,
    planner: GoalPlanner,
    runner: PlanRunner,
    verifier: OperationVerifier,
    rollback: RollbackRunner,
    events: EventBus,
}

impl GoalManager {
    pub fn new(
        config: &RollpilotConfig,
        store: Arc<dyn GoalStore>,
        executor: Arc<dyn ActionExecutor>,
        probe: Arc<dyn StateProbe>,
    ) -> rollpilot_core::Result<Self> {
        let gm = config.goal_manager.clone();
        let autonomy = AutonomyPolicyStore::from_config(&config.autonomy)?;
        if let Some(persisted) = store.load_autonomy_policy()? {
            autonomy.replace(persisted);
        }
        let owner_id = if gm.owner_id.trim().is_empty() {
            default_owner_id()
        } else {
            gm.owner_id.clone()
        };

        let verifier = OperationVerifier::new(probe.clone(), gm.action_timeout_secs);
        let runner = PlanRunner::new(
            executor.clone(),
            probe.clone(),
            store.clone(),
            gm.action_timeout_secs,
            gm.idempotency_ttl_secs,
        );
        let rollback = RollbackRunner::new(executor, verifier.clone(), gm.action_timeout_secs);

        info!(owner = %owner_id, enabled = gm.enabled, "goal manager ready");
        Ok(Self {
            read_only_mode: config.policy.read_only_mode,
            owner_id,
            store,
            probe,
            autonomy,
            generator: CandidateGenerator::new(gm.max_candidates_per_tick),
            planner: GoalPlanner::new(gm.max_replans),
            runner,
            verifier,
            rollback,
            events: EventBus::default(),
            config: gm,
        })
    }

    pub fn with_owner_id(mut self, owner_id: impl Into<OwnerId>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn GoalStore> {
        &self.store
    }

    pub fn probe(&self) -> &Arc<dyn StateProbe> {
        &self.probe
    }

    pub fn planner(&self) -> &GoalPlanner {
        &self.planner
    }

    pub fn verifier(&self) -> &OperationVerifier {
        &self.verifier
    }

    pub fn read_only_mode(&self) -> bool {
        self.read_only_mode
    }

    fn lease_ttl(&self) -> Duration {
        Duration::seconds(self.config.lease_ttl_secs.max(1) as i64)
    }

    fn probe_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.action_timeout_secs.max(1))
    }

    // ── Autonomy policy ────────────────────────────────────────

    /// The shared runtime policy, refreshed from the store.
    pub fn autonomy_policy(&self) -> RuntimeAutonomyPolicy {
        match self.store.load_autonomy_policy() {
            Ok(Some(policy)) => self.autonomy.replace(policy),
            Ok(None) => self.autonomy.get(),
            Err(e) => {
                warn!(error = %e, "could not load autonomy policy; using last known");
                self.autonomy.get()
            }
        }
    }

    pub fn set_autonomy_policy(&self, update: &AutonomyPolicyUpdate) -> rollpilot_core::Result<RuntimeAutonomyPolicy> {
        self.autonomy_policy();
        let policy = self.autonomy.set(update);
        self.store.save_autonomy_policy(&policy)?;
        Ok(policy)
    }

    pub fn reset_autonomy_policy(&self) -> rollpilot_core::Result<RuntimeAutonomyPolicy> {
        let policy = self.autonomy.reset();
        self.store.save_autonomy_policy(&policy)?;
        Ok(policy)
    }

    // ── Tick ───────────────────────────────────────────────────

    /// Generate candidates from `snapshot`, dedup them against the queue and
    /// live suppressions, and queue or suppress the rest.
    pub fn tick(&self, now: DateTime<Utc>, snapshot: &SystemSnapshot) -> TickResult {
        if !self.config.enabled {
            return TickResult::default();
        }
        match self.try_tick(now, snapshot) {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "goal manager tick failed");
                TickResult {
                    enabled: true,
                    error: Some(e.to_string()),
                    ..TickResult::default()
                }
            }
        }
    }

    /// Like [`tick`](Self::tick), with the snapshot fetched from the state probe.
    pub async fn tick_from_probe(&self, now: DateTime<Utc>) -> TickResult {
        if !self.config.enabled {
            return TickResult::default();
        }
        match bounded(self.probe_timeout(), "snapshot", self.probe.snapshot()).await {
            Ok(snapshot) => self.tick(now, &snapshot),
            Err(e) => {
                warn!(error = %e, "state snapshot unavailable; tick skipped");
                TickResult {
                    enabled: true,
                    error: Some(e.to_string()),
                    ..TickResult::default()
                }
            }
        }
    }

    fn try_tick(&self, now: DateTime<Utc>, snapshot: &SystemSnapshot) -> rollpilot_core::Result<TickResult> {
        self.purge_expired(now);
        let policy = self.autonomy_policy();
        let scan = self.store.scan_queue()?;
        self.prune_completed(&scan.items);
        let mut active: HashSet<String> = scan
            .items
            .iter()
            .filter(|i| i.status.is_active())
            .map(|i| i.signature.clone())
            .collect();
        let mut depth = scan.items.iter().filter(|i| i.status.is_active()).count();
        let runtime = RuntimeContext::from(snapshot);

        let mut result = TickResult {
            enabled: true,
            ..TickResult::default()
        };
        for candidate in self.generator.generate(snapshot, policy.level, now) {
            if active.contains(&candidate.signature) {
                debug!(intent = %candidate.intent, "candidate already active; skipped");
                continue;
            }
            if self.store.live_suppression(&candidate.signature, now)?.is_some() {
                debug!(intent = %candidate.intent, "candidate recently suppressed; skipped");
                continue;
            }
            result.generated_count += 1;

            match self.admit(&candidate, &runtime, depth, now) {
                Ok(()) => {
                    let item = GoalQueueItem::from_candidate(&candidate, now);
                    self.store.enqueue(&item)?;
                    active.insert(candidate.signature.clone());
                    depth += 1;
                    result.queued_count += 1;
                    info!(
                        goal_id = %item.goal_id,
                        intent = %item.intent,
                        score = item.score.total,
                        "goal queued"
                    );
                    self.events.publish(Event::GoalQueued {
                        goal_id: item.goal_id,
                        intent: item.intent.as_str().to_string(),
                        score: item.score.total,
                    });
                }
                Err((reason_code, detail)) => {
                    self.store.record_suppression(&GoalSuppressionRecord {
                        signature: candidate.signature.clone(),
                        intent: candidate.intent,
                        reason_code,
                        detail: detail.clone(),
                        suppressed_at: now,
                        expires_at: now + Duration::seconds(self.config.suppression_window_secs as i64),
                    })?;
                    result.suppressed_count += 1;
                    info!(intent = %candidate.intent, reason = %reason_code, detail = %detail, "candidate suppressed");
                    self.events.publish(Event::GoalSuppressed {
                        signature: candidate.signature.clone(),
                        intent: candidate.intent.as_str().to_string(),
                        reason_code: reason_code.as_str().to_string(),
                    });
                }
            }
        }

        result.queue_depth = depth;
        Ok(result)
    }

    /// Minimum bars a candidate must clear to be queued.
    fn admit(
        &self,
        candidate: &GoalCandidate,
        runtime: &RuntimeContext,
        depth: usize,
        now: DateTime<Utc>,
    ) -> Result<(), (GoalSuppressionReasonCode, String)> {
        if candidate.confidence < self.config.min_candidate_confidence {
            return Err((
                GoalSuppressionReasonCode::LowConfidence,
                format!(
                    "confidence {:.2} below minimum {:.2}",
                    candidate.confidence, self.config.min_candidate_confidence
                ),
            ));
        }
        if candidate.score.total < self.config.min_candidate_score {
            return Err((
                GoalSuppressionReasonCode::LowScore,
                format!(
                    "score {:.1} below minimum {:.1}",
                    candidate.score.total, self.config.min_candidate_score
                ),
            ));
        }
        if candidate.score.policy_fit <= 0.0 {
            return Err((
                GoalSuppressionReasonCode::PolicyBlocked,
                "autonomy level does not allow goal execution".into(),
            ));
        }
        let request = ValidationRequest {
            dry_run: true,
            allow_writes: true,
            read_only_mode: self.read_only_mode,
            runtime,
        };
        if let PlanOutcome::Rejected { failure, message, .. } = self.planner.plan_and_validate(candidate, &request, now) {
            return Err((GoalSuppressionReasonCode::InvalidPlan, format!("{failure}: {message}")));
        }
        if depth >= self.config.max_queue_size {
            return Err((
                GoalSuppressionReasonCode::QueueFull,
                format!("active queue holds {depth} goals"),
            ));
        }
        Ok(())
    }

    /// Completed rows are normally removed when the goal finishes; this
    /// sweeps any left behind by an owner that stopped in between.
    fn prune_completed(&self, items: &[GoalQueueItem]) {
        for item in items.iter().filter(|i| i.status == GoalQueueStatus::Completed) {
            match self.store.remove_queue_item(item.goal_id) {
                Ok(_) => debug!(goal_id = %item.goal_id, "completed goal pruned from queue"),
                Err(e) => warn!(goal_id = %item.goal_id, error = %e, "could not prune completed goal"),
            }
        }
    }

    fn purge_expired(&self, now: DateTime<Utc>) {
        let purged = (
            self.store.purge_expired_idempotency(now),
            self.store.purge_expired_suppressions(now),
            self.store.purge_expired_tickets(now),
        );
        match purged {
            (Ok(idempotency), Ok(suppressions), Ok(tickets)) => {
                if idempotency + suppressions + tickets > 0 {
                    debug!(idempotency, suppressions, tickets, "purged expired records");
                }
            }
            (a, b, c) => {
                for e in [a.err(), b.err(), c.err()].into_iter().flatten() {
                    warn!(error = %e, "failed to purge expired records");
                }
            }
        }
    }

    // ── Dispatch ───────────────────────────────────────────────

    /// Lease the best eligible goal and drive it through policy check, plan
    /// execution and verification. Never fails; faults land in `reason`.
    pub async fn dispatch_top_goal(&self, options: DispatchOptions) -> DispatchResult {
        if !self.config.enabled {
            return DispatchResult::undispatched(false, DispatchStatus::Disabled, "goal manager is disabled");
        }
        let now = options.now.unwrap_or_else(Utc::now);
        match self.try_dispatch(&options, now).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "goal dispatch aborted");
                DispatchResult::undispatched(true, DispatchStatus::Aborted, e.to_string())
            }
        }
    }

    async fn try_dispatch(&self, options: &DispatchOptions, now: DateTime<Utc>) -> rollpilot_core::Result<DispatchResult> {
        let scan = self.store.scan_queue()?;
        self.quarantine_malformed(&scan.malformed, now);

        let runtime = match bounded(self.probe_timeout(), "runtime_context", self.probe.runtime_context()).await {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "runtime context unavailable; dispatch skipped");
                return Ok(DispatchResult::undispatched(
                    true,
                    DispatchStatus::Idle,
                    format!("state probe unavailable: {e}"),
                ));
            }
        };

        for candidate in scan.items.iter().filter(|i| i.is_dispatchable(now)) {
            if runtime.cooldown_remaining_secs > 0 && scales_capacity(candidate.intent) {
                debug!(goal_id = %candidate.goal_id, "scaling cooldown active; goal deferred");
                continue;
            }
            let Some(lease) = self
                .store
                .try_acquire_lease(candidate.goal_id, &self.owner_id, now, self.lease_ttl())?
            else {
                continue;
            };
            // Re-read under the lease: the scan may predate another owner's completion.
            let current = self.store.get_queue_item(candidate.goal_id)?;
            let Some(item) = current.filter(|i| i.is_dispatchable(now)) else {
                self.store.release_lease(candidate.goal_id, &self.owner_id, now)?;
                continue;
            };

            let goal_id = item.goal_id;
            let attempt = Attempt {
                item,
                lease,
                fixed_now: options.now,
            };
            return match self.run_attempt(attempt, options, &runtime).await {
                Ok(result) => Ok(result),
                Err(e) => {
                    error!(goal_id = %goal_id, error = %e, "goal attempt aborted");
                    let released_at = options.now.unwrap_or_else(Utc::now);
                    if let Err(release) = self.store.release_lease(goal_id, &self.owner_id, released_at) {
                        warn!(goal_id = %goal_id, error = %release, "could not release lease");
                    }
                    let mut result = DispatchResult::for_goal(goal_id, DispatchStatus::Aborted);
                    result.reason = Some(e.to_string());
                    Ok(result)
                }
            };
        }

        Ok(DispatchResult::undispatched(true, DispatchStatus::Idle, "no dispatchable goal"))
    }

    async fn run_attempt(
        &self,
        mut attempt: Attempt,
        options: &DispatchOptions,
        runtime: &RuntimeContext,
    ) -> rollpilot_core::Result<DispatchResult> {
        let goal_id = attempt.goal_id();
        self.checkpoint(
            &attempt,
            CheckpointPhase::Scheduled,
            json!({
                "initiatedBy": options.initiated_by,
                "dryRun": options.dry_run,
                "allowWrites": options.allow_writes,
            }),
        )?;
        self.checkpoint(
            &attempt,
            CheckpointPhase::LeaseAcquired,
            json!({
                "version": attempt.lease.version,
                "leaseExpiresAt": attempt.lease.lease_expires_at,
            }),
        )?;
        attempt.item.status = GoalQueueStatus::Running;
        self.store.update_queue_item(&attempt.item)?;

        info!(
            goal_id = %goal_id,
            owner = %self.owner_id,
            attempt = attempt.item.attempts,
            intent = %attempt.item.intent,
            dry_run = options.dry_run,
            "goal dispatched"
        );
        self.events.publish(Event::GoalDispatched {
            goal_id,
            owner_id: self.owner_id.clone(),
            attempt: attempt.item.attempts,
        });

        if let Some(resume) = self.resume_point(&attempt)? {
            info!(goal_id = %goal_id, "previous attempt finished its plan; resuming at verification");
            return self.verify_and_finish(attempt, resume.plan_id, resume.executions).await;
        }

        // ── Policy check ──
        let policy = self.autonomy_policy();
        self.checkpoint(
            &attempt,
            CheckpointPhase::PolicyCheck,
            json!({
                "level": policy.level,
                "dryRun": options.dry_run,
                "allowWrites": options.allow_writes,
                "readOnlyMode": self.read_only_mode,
            }),
        )?;

        let execution_policy = evaluate_goal_execution_policy(&GoalExecutionPolicyInput {
            auto_execute: true,
            allow_writes: options.allow_writes && !options.dry_run,
            read_only_mode: self.read_only_mode,
        });
        if execution_policy.is_denied() {
            return self
                .fail_attempt(attempt, execution_policy.reason_code.as_str(), &execution_policy.message, None, 0)
                .await;
        }

        let request = ValidationRequest {
            dry_run: options.dry_run,
            allow_writes: options.allow_writes,
            read_only_mode: self.read_only_mode,
            runtime,
        };
        let mut plan = match self
            .planner
            .plan_and_validate(&attempt.item.to_candidate(), &request, attempt.now())
        {
            PlanOutcome::Ready(plan) => plan,
            PlanOutcome::Rejected { plan, failure, message } => {
                return self
                    .fail_attempt(attempt, failure.code(), &message, Some(plan.plan_id), 0)
                    .await;
            }
        };

        let gate = evaluate_autonomy_gate(&AutonomyGateInput {
            policy,
            dry_run: options.dry_run,
            has_write_steps: plan.has_write_steps(),
            risk: plan.max_risk(),
            confidence: attempt.item.confidence,
        });
        if gate.is_denied() {
            info!(goal_id = %goal_id, reason = gate.reason_code.as_str(), "autonomy gate denied the plan");
            return self
                .fail_attempt(attempt, gate.reason_code.as_str(), &gate.message, Some(plan.plan_id), 0)
                .await;
        }
        if !self.renew(&mut attempt)? {
            return Ok(self.lease_lost(&attempt));
        }

        // ── Plan execution ──
        self.checkpoint(
            &attempt,
            CheckpointPhase::PlanStarted,
            json!({
                "planId": plan.plan_id,
                "planVersion": plan.plan_version,
                "replanCount": plan.replan_count,
                "failureReasonCode": plan.failure_reason_code,
                "dryRun": plan.dry_run,
                "steps": plan.steps.len(),
            }),
        )?;
        let started = attempt.now();
        let run = {
            let mut heartbeat = || self.renew(&mut attempt);
            self.runner
                .run(goal_id, &self.owner_id, &mut plan, started, &mut heartbeat)
                .await
        };
        if run.failure.as_ref().is_some_and(|f| f.reason_code == "lease_lost") || !self.renew(&mut attempt)? {
            return Ok(self.lease_lost(&attempt));
        }
        if let Some(failure) = &run.failure {
            return self
                .fail_attempt(
                    attempt,
                    &failure.reason_code,
                    &failure.message,
                    Some(plan.plan_id),
                    run.executions.len(),
                )
                .await;
        }
        self.checkpoint(
            &attempt,
            CheckpointPhase::PlanCompleted,
            json!({
                "planId": plan.plan_id,
                "dryRun": plan.dry_run,
                "executions": run.executions,
            }),
        )?;

        self.verify_and_finish(attempt, Some(plan.plan_id), run.executions).await
    }

    /// Verify every write the plan made; complete the goal, or roll the
    /// failed operation back and send the goal around the retry path.
    async fn verify_and_finish(
        &self,
        mut attempt: Attempt,
        plan_id: Option<PlanId>,
        executions: Vec<StepExecution>,
    ) -> rollpilot_core::Result<DispatchResult> {
        let goal_id = attempt.goal_id();
        let mut verifications = Vec::new();
        let mut failed: Option<&StepExecution> = None;
        for execution in executions.iter().filter(|e| e.needs_verification()) {
            if !self.renew(&mut attempt)? {
                return Ok(self.lease_lost(&attempt));
            }
            let verification = self
                .verifier
                .verify_operation_outcome(&VerifyRequest::for_execution(execution), attempt.now())
                .await;
            let passed = verification.passed;
            verifications.push(verification);
            if !passed {
                failed = Some(execution);
                break;
            }
        }
        if !self.renew(&mut attempt)? {
            return Ok(self.lease_lost(&attempt));
        }
        self.checkpoint(
            &attempt,
            CheckpointPhase::VerifyCompleted,
            json!({
                "planId": plan_id,
                "passed": failed.is_none(),
                "results": verifications,
            }),
        )?;

        let Some(failed) = failed else {
            let now = attempt.now();
            let mut item = attempt.item.clone();
            item.status = GoalQueueStatus::Completed;
            item.last_error = None;
            self.store.update_queue_item(&item)?;
            // The same signature stays quiet for a window, then the row goes.
            self.store.record_suppression(&GoalSuppressionRecord {
                signature: item.signature.clone(),
                intent: item.intent,
                reason_code: GoalSuppressionReasonCode::RecentlyCompleted,
                detail: format!("goal {goal_id} completed"),
                suppressed_at: now,
                expires_at: now + Duration::seconds(self.config.suppression_window_secs as i64),
            })?;
            self.store.remove_queue_item(goal_id)?;
            self.store.release_lease(goal_id, &self.owner_id, now)?;
            info!(goal_id = %goal_id, plan_id = ?plan_id, "goal completed");
            self.events.publish(Event::GoalCompleted {
                goal_id,
                plan_id: plan_id.unwrap_or_default(),
            });
            let mut result = DispatchResult::for_goal(goal_id, DispatchStatus::Completed);
            result.plan_id = plan_id;
            result.execution_log_count = executions.len();
            result.verifications = verifications;
            return Ok(result);
        };

        // ── Rollback ──
        let rollback_plan = build_rollback_plan(failed);
        let rollback = self
            .rollback
            .run_rollback_plan(&rollback_plan, failed.dry_run, attempt.now())
            .await;
        warn!(
            goal_id = %goal_id,
            step = %failed.step_id,
            rollback_attempted = rollback.attempted,
            rollback_success = rollback.success,
            "verification failed; rollback finished"
        );
        self.events.publish(Event::RollbackExecuted {
            goal_id,
            success: rollback.success,
        });
        if !self.renew(&mut attempt)? {
            return Ok(self.lease_lost(&attempt));
        }
        self.checkpoint(
            &attempt,
            CheckpointPhase::RollbackCompleted,
            json!({ "plan": rollback_plan, "result": rollback }),
        )?;

        let (reason, message) = if rollback.attempted && !rollback.success {
            ("rollback_failed", format!("verification failed and rollback failed: {}", rollback.message))
        } else {
            let details = verifications
                .last()
                .and_then(|v| v.details.clone())
                .unwrap_or_else(|| "post-check disagreed with the expected state".into());
            ("verification_failed", details)
        };
        let mut result = self
            .fail_attempt(attempt, reason, &message, plan_id, executions.len())
            .await?;
        result.verifications = verifications;
        result.rollback = Some(rollback);
        Ok(result)
    }

    /// Count a failed attempt: requeue with backoff, or park in the DLQ once
    /// `max_retries` is exhausted. Releases the lease.
    async fn fail_attempt(
        &self,
        mut attempt: Attempt,
        reason: &str,
        message: &str,
        plan_id: Option<PlanId>,
        execution_log_count: usize,
    ) -> rollpilot_core::Result<DispatchResult> {
        let goal_id = attempt.goal_id();
        if !self.renew(&mut attempt)? {
            return Ok(self.lease_lost(&attempt));
        }
        self.checkpoint(
            &attempt,
            CheckpointPhase::Failed,
            json!({ "reason": reason, "message": message, "planId": plan_id }),
        )?;

        let now = attempt.now();
        let mut item = attempt.item.clone();
        item.attempts += 1;
        item.last_error = Some(format!("{reason}: {message}"));

        let mut result = DispatchResult::for_goal(goal_id, DispatchStatus::Requeued);
        result.plan_id = plan_id;
        result.execution_log_count = execution_log_count;
        result.reason = Some(reason.to_string());

        if item.attempts > self.config.max_retries {
            self.checkpoint(
                &attempt,
                CheckpointPhase::Dlq,
                json!({ "reason": reason, "attempts": item.attempts }),
            )?;
            item.status = GoalQueueStatus::Dlq;
            let parked = GoalDlqItem {
                id: Uuid::new_v4(),
                goal_id,
                moved_at: now,
                reason: reason.to_string(),
                attempts: item.attempts,
                last_error: item.last_error.clone(),
                queue_item: Some(item.clone()),
                raw_record: None,
            };
            self.store.move_to_dlq(&parked)?;
            warn!(goal_id = %goal_id, attempts = item.attempts, reason, "goal moved to dead-letter queue");
            self.events.publish(Event::GoalDeadLettered {
                goal_id,
                attempts: item.attempts,
                reason: reason.to_string(),
            });
            result.status = DispatchStatus::DeadLettered;
        } else {
            let delay_ms = retry_backoff_ms(self.config.base_backoff_ms, self.config.max_backoff_ms, item.attempts);
            let next_attempt_at = now + Duration::milliseconds(delay_ms as i64);
            self.checkpoint(
                &attempt,
                CheckpointPhase::Requeued,
                json!({ "reason": reason, "attempts": item.attempts, "nextAttemptAt": next_attempt_at }),
            )?;
            item.status = GoalQueueStatus::Requeued;
            item.next_attempt_at = Some(next_attempt_at);
            self.store.update_queue_item(&item)?;
            info!(
                goal_id = %goal_id,
                attempts = item.attempts,
                delay_ms,
                reason,
                "goal requeued"
            );
            self.events.publish(Event::GoalRequeued {
                goal_id,
                attempts: item.attempts,
                next_attempt_at,
                reason: reason.to_string(),
            });
        }

        self.store.release_lease(goal_id, &self.owner_id, now)?;
        Ok(result)
    }

    /// Heartbeat the lease. `false` means another owner has it now.
    fn renew(&self, attempt: &mut Attempt) -> rollpilot_core::Result<bool> {
        let renewed = self.store.heartbeat_lease(
            attempt.goal_id(),
            &self.owner_id,
            attempt.lease.version,
            attempt.now(),
            self.lease_ttl(),
        )?;
        match renewed {
            Some(lease) => {
                attempt.lease = lease;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn lease_lost(&self, attempt: &Attempt) -> DispatchResult {
        warn!(goal_id = %attempt.goal_id(), owner = %self.owner_id, "lease lost; stopping");
        let mut result = DispatchResult::for_goal(attempt.goal_id(), DispatchStatus::LeaseLost);
        result.reason = Some("lease was taken over by another owner".into());
        result
    }

    fn checkpoint(&self, attempt: &Attempt, phase: CheckpointPhase, details: Value) -> rollpilot_core::Result<()> {
        debug!(goal_id = %attempt.goal_id(), phase = %phase, "checkpoint");
        self.store.append_checkpoint(
            &GoalExecutionCheckpoint::new(attempt.goal_id(), phase, attempt.item.attempts, attempt.now())
                .with_owner(self.owner_id.clone())
                .with_details(details),
        )
    }

    /// A `plan_completed` for this attempt with nothing terminal after it
    /// means the previous owner died between execution and verification.
    fn resume_point(&self, attempt: &Attempt) -> rollpilot_core::Result<Option<ResumePoint>> {
        let checkpoints: Vec<GoalExecutionCheckpoint> = self
            .store
            .list_checkpoints(attempt.goal_id())?
            .into_iter()
            .filter(|c| c.attempt == attempt.item.attempts)
            .collect();
        let Some(index) = checkpoints
            .iter()
            .rposition(|c| c.phase == CheckpointPhase::PlanCompleted)
        else {
            return Ok(None);
        };
        let finished = checkpoints[index + 1..].iter().any(|c| {
            matches!(
                c.phase,
                CheckpointPhase::VerifyCompleted
                    | CheckpointPhase::RollbackCompleted
                    | CheckpointPhase::Failed
                    | CheckpointPhase::Requeued
                    | CheckpointPhase::Dlq
            )
        });
        if finished {
            return Ok(None);
        }

        let details = checkpoints[index].details.clone().unwrap_or(Value::Null);
        let executions = match details.get("executions").cloned() {
            Some(raw) => match serde_json::from_value::<Vec<StepExecution>>(raw) {
                Ok(executions) => executions,
                Err(e) => {
                    warn!(goal_id = %attempt.goal_id(), error = %e, "plan_completed checkpoint unreadable; re-executing");
                    return Ok(None);
                }
            },
            None => return Ok(None),
        };
        let plan_id = details
            .get("planId")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());
        Ok(Some(ResumePoint { plan_id, executions }))
    }

    /// Park undecodable queue rows in the DLQ so they stop blocking the queue.
    fn quarantine_malformed(&self, records: &[MalformedRecord], now: DateTime<Utc>) {
        for record in records {
            let Ok(goal_id) = Uuid::parse_str(&record.goal_id) else {
                error!(goal_id = %record.goal_id, "malformed queue row has no usable goal id");
                continue;
            };
            let parked = GoalDlqItem {
                id: Uuid::new_v4(),
                goal_id,
                moved_at: now,
                reason: "malformed_record".into(),
                attempts: 0,
                last_error: Some(record.reason.clone()),
                queue_item: None,
                raw_record: Some(record.raw.clone()),
            };
            match self.store.move_to_dlq(&parked) {
                Ok(()) => {
                    error!(goal_id = %goal_id, reason = %record.reason, "malformed queue row moved to dead-letter queue");
                    self.events.publish(Event::GoalDeadLettered {
                        goal_id,
                        attempts: 0,
                        reason: "malformed_record".into(),
                    });
                }
                Err(e) => error!(goal_id = %goal_id, error = %e, "could not quarantine malformed queue row"),
            }
        }
    }

    // ── DLQ / state ────────────────────────────────────────────

    /// Move a dead-lettered goal back to `queued` with its attempts reset.
    pub fn replay_dlq(&self, goal_id: GoalId, now: DateTime<Utc>) -> ReplayResult {
        let mut result = ReplayResult {
            replayed: false,
            goal_id,
            reason: None,
            item: None,
        };
        match self.store.replay_from_dlq(goal_id, now) {
            Ok(ReplayOutcome::Replayed(item)) => {
                info!(goal_id = %goal_id, "goal replayed from dead-letter queue");
                self.events.publish(Event::GoalReplayed { goal_id });
                result.replayed = true;
                result.item = Some(item);
            }
            Ok(ReplayOutcome::NotFound) => result.reason = Some("not_found".into()),
            Ok(ReplayOutcome::LeaseHeld(lease)) => {
                result.reason = Some(format!("lease_held: {} until {}", lease.owner_id, lease.lease_expires_at));
            }
            Ok(ReplayOutcome::Unrecoverable) => result.reason = Some("unrecoverable_record".into()),
            Err(e) => {
                error!(goal_id = %goal_id, error = %e, "dead-letter replay failed");
                result.reason = Some(format!("store_error: {e}"));
            }
        }
        result
    }

    /// Queue, DLQ, live leases, suppressions and recent checkpoints, each
    /// truncated to `limit`.
    pub fn list_state(&self, limit: usize) -> GoalManagerState {
        let now = Utc::now();
        let mut errors = Vec::new();

        let queue = match self.store.scan_queue() {
            Ok(scan) => {
                for bad in &scan.malformed {
                    errors.push(format!("queue: malformed row {}: {}", bad.goal_id, bad.reason));
                }
                scan.items.into_iter().take(limit).collect()
            }
            Err(e) => listing_error(&mut errors, "queue", e),
        };
        let dlq = self
            .store
            .list_dlq()
            .unwrap_or_else(|e| listing_error(&mut errors, "dlq", e));
        let leases = self
            .store
            .list_leases()
            .unwrap_or_else(|e| listing_error(&mut errors, "leases", e));
        let suppressions = self
            .store
            .list_suppressions(limit)
            .unwrap_or_else(|e| listing_error(&mut errors, "suppressions", e));
        let checkpoints = self
            .store
            .recent_checkpoints(limit)
            .unwrap_or_else(|e| listing_error(&mut errors, "checkpoints", e));

        GoalManagerState {
            queue,
            dlq: dlq.into_iter().take(limit).collect(),
            leases: leases.into_iter().filter(|l| l.is_live(now)).take(limit).collect(),
            suppressions,
            checkpoints,
            autonomy_policy: self.autonomy_policy(),
            errors,
        }
    }

    /// Effective goal-manager configuration plus the runtime autonomy policy.
    pub fn config(&self) -> GoalManagerConfigView {
        GoalManagerConfigView {
            owner_id: self.owner_id.clone(),
            read_only_mode: self.read_only_mode,
            goal_manager: self.config.clone(),
            autonomy_policy: self.autonomy_policy(),
        }
    }
}

fn listing_error<T>(errors: &mut Vec<String>, collection: &str, e: rollpilot_core::PilotError) -> Vec<T> {
    warn!(collection, error = %e, "could not list goal manager state");
    errors.push(format!("{collection}: {e}"));
    Vec::new()
}

fn scales_capacity(intent: GoalIntent) -> bool {
    matches!(intent, GoalIntent::Stabilize | GoalIntent::CostOptimize)
}

fn default_owner_id() -> OwnerId {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "rollpilot".into());
    format!("{host}-{}", std::process::id())
}
