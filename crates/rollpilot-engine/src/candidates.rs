use chrono::{DateTime, Utc};
use rollpilot_autonomy::AutonomyLevel;
use rollpilot_core::{
    AnomalySeverity, AnomalySignal, GoalCandidate, GoalIntent, GoalScore, GoalSource, RiskLevel,
    SystemSnapshot, next_vcpu_tier, previous_vcpu_tier,
};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use tracing::debug;

/// CPU usage (percent) at or above which the execution client counts as saturated.
pub const CPU_HOT_PERCENT: f64 = 80.0;
/// CPU usage (percent) at or below which capacity counts as idle.
pub const CPU_IDLE_PERCENT: f64 = 20.0;
pub const TXPOOL_BACKLOG: u64 = 1_000;
/// Seconds without a new L2 block before the chain counts as stalled.
pub const BLOCK_STALL_SECS: u64 = 120;

/// Policy-fit sub-score for a goal of `risk` under `level`.
///
/// Full marks when the level may perform the goal's writes, half when the
/// level only allows dry runs (or writes of lower risk), nothing at A0.
pub fn policy_fit(level: AutonomyLevel, risk: RiskLevel) -> f64 {
    if !level.allows_execution() {
        0.0
    } else if level.permits_write_risk(risk) {
        10.0
    } else {
        5.0
    }
}

/// Turns a system snapshot into scored goal candidates.
///
/// Pure: the same snapshot and level always produce the same intents,
/// parameters, signatures and scores.
#[derive(Debug, Clone, Copy)]
pub struct CandidateGenerator {
    max_candidates: usize,
}

impl Default for CandidateGenerator {
    fn default() -> Self {
        Self::new(8)
    }
}

impl CandidateGenerator {
    pub fn new(max_candidates: usize) -> Self {
        Self {
            max_candidates: max_candidates.max(1),
        }
    }

    /// Candidates for `snapshot`, best score first, at most `max_candidates`.
    pub fn generate(
        &self,
        snapshot: &SystemSnapshot,
        level: AutonomyLevel,
        now: DateTime<Utc>,
    ) -> Vec<GoalCandidate> {
        let mut covered: BTreeSet<usize> = BTreeSet::new();
        let mut candidates = Vec::new();

        if let Some(c) = stabilize(snapshot, level, now, &mut covered) {
            candidates.push(c);
        }
        if let Some(c) = recover(snapshot, level, now, &mut covered) {
            candidates.push(c);
        }
        if let Some(c) = failover(snapshot, level, now) {
            candidates.push(c);
        }
        if let Some(c) = cost_optimize(snapshot, level, now) {
            candidates.push(c);
        }
        if let Some(c) = investigate(snapshot, level, now, &covered) {
            candidates.push(c);
        }

        candidates.sort_by(|a, b| b.score.total.total_cmp(&a.score.total));
        candidates.truncate(self.max_candidates);
        debug!(
            count = candidates.len(),
            cpu = snapshot.metrics.cpu_usage,
            anomalies = snapshot.anomalies.len(),
            "generated goal candidates"
        );
        candidates
    }
}

fn score(impact: f64, urgency: f64, confidence: f64, risk: RiskLevel, level: AutonomyLevel) -> GoalScore {
    GoalScore::new(impact, urgency, confidence * 20.0, policy_fit(level, risk))
}

fn severity_urgency(severity: AnomalySeverity) -> f64 {
    match severity {
        AnomalySeverity::Low => 5.0,
        AnomalySeverity::Medium => 10.0,
        AnomalySeverity::High => 20.0,
        AnomalySeverity::Critical => 30.0,
    }
}

fn is_pressure_metric(anomaly: &AnomalySignal) -> bool {
    matches!(anomaly.metric.as_str(), "cpu_usage" | "txpool_pending")
}

fn is_stall_metric(anomaly: &AnomalySignal) -> bool {
    anomaly.metric.starts_with("block")
}

// ── Rules ──────────────────────────────────────────────────────

fn stabilize(
    snapshot: &SystemSnapshot,
    level: AutonomyLevel,
    now: DateTime<Utc>,
    covered: &mut BTreeSet<usize>,
) -> Option<GoalCandidate> {
    let metrics = &snapshot.metrics;
    let cpu_hot = metrics.cpu_usage >= CPU_HOT_PERCENT;
    let backlog = metrics.txpool_pending >= TXPOOL_BACKLOG;
    let hot: Vec<(usize, &AnomalySignal)> = snapshot
        .anomalies
        .iter()
        .enumerate()
        .filter(|(_, a)| is_pressure_metric(a) && a.severity >= AnomalySeverity::High)
        .collect();

    if !cpu_hot && !backlog && hot.is_empty() {
        return None;
    }
    // Already at the top tier: nothing to scale to, leave it to `investigate`.
    let target = next_vcpu_tier(metrics.current_vcpu)?;
    covered.extend(hot.iter().map(|(i, _)| *i));

    let signals = [cpu_hot, backlog, !hot.is_empty()].into_iter().filter(|s| *s).count() as f64;
    let confidence = (0.5 + 0.15 * signals).min(0.95);
    let urgency = [
        (metrics.cpu_usage - 50.0) / 50.0 * 30.0,
        (metrics.txpool_pending as f64 / 5_000.0).min(1.0) * 30.0,
        hot.iter().map(|(_, a)| severity_urgency(a.severity)).fold(0.0, f64::max),
    ]
    .into_iter()
    .fold(0.0, f64::max);

    let risk = RiskLevel::Medium;
    let source = if hot.is_empty() { GoalSource::Metrics } else { GoalSource::Anomaly };
    Some(GoalCandidate::new(
        format!(
            "Stabilize execution client: scale {} -> {} vCPU",
            metrics.current_vcpu, target
        ),
        GoalIntent::Stabilize,
        source,
        risk,
        confidence,
        json!({ "currentVcpu": metrics.current_vcpu, "targetVcpu": target }),
        score(25.0 + 5.0 * signals, urgency, confidence, risk, level),
        now,
    ))
}

fn recover(
    snapshot: &SystemSnapshot,
    level: AutonomyLevel,
    now: DateTime<Utc>,
    covered: &mut BTreeSet<usize>,
) -> Option<GoalCandidate> {
    let lag = snapshot.metrics.block_height_lag_secs;
    let stalled = lag >= BLOCK_STALL_SECS;
    let stall_anomalies: Vec<(usize, &AnomalySignal)> = snapshot
        .anomalies
        .iter()
        .enumerate()
        .filter(|(_, a)| is_stall_metric(a) && a.severity >= AnomalySeverity::Medium)
        .collect();
    if !stalled && stall_anomalies.is_empty() {
        return None;
    }
    covered.extend(stall_anomalies.iter().map(|(i, _)| *i));

    let component = snapshot
        .rca
        .as_ref()
        .and_then(|r| r.component.clone())
        .unwrap_or_else(|| "execution".to_string());
    let mut confidence = 0.6;
    if lag >= BLOCK_STALL_SECS * 5 / 2 {
        confidence += 0.2;
    }
    if !stall_anomalies.is_empty() {
        confidence += 0.1;
    }
    let urgency = ((lag as f64 / 600.0).min(1.0) * 30.0).max(
        stall_anomalies
            .iter()
            .map(|(_, a)| severity_urgency(a.severity))
            .fold(0.0, f64::max),
    );

    let risk = RiskLevel::High;
    let source = if stall_anomalies.is_empty() { GoalSource::Metrics } else { GoalSource::Anomaly };
    Some(GoalCandidate::new(
        format!("Recover stalled block production: restart {component}"),
        GoalIntent::Recover,
        source,
        risk,
        confidence,
        json!({ "component": component }),
        score(35.0, urgency, confidence, risk, level),
        now,
    ))
}

fn failover(snapshot: &SystemSnapshot, level: AutonomyLevel, now: DateTime<Utc>) -> Option<GoalCandidate> {
    let metrics = &snapshot.metrics;
    if metrics.l1_rpc_healthy {
        return None;
    }
    let current = metrics.l1_rpc_endpoint.clone();
    let next = metrics
        .l1_rpc_fallbacks
        .iter()
        .find(|e| Some(*e) != current.as_ref())
        .cloned();

    let params = match &next {
        Some(endpoint) => json!({ "endpoint": endpoint, "previousEndpoint": current }),
        None => json!({ "previousEndpoint": current }),
    };
    let goal = match &next {
        Some(endpoint) => format!("Fail over L1 RPC to {endpoint}"),
        None => "Investigate unhealthy L1 RPC (no fallback configured)".to_string(),
    };
    let risk = RiskLevel::High;
    let confidence = 0.85;
    Some(GoalCandidate::new(
        goal,
        GoalIntent::Failover,
        GoalSource::Metrics,
        risk,
        confidence,
        params,
        score(35.0, 25.0, confidence, risk, level),
        now,
    ))
}

fn cost_optimize(snapshot: &SystemSnapshot, level: AutonomyLevel, now: DateTime<Utc>) -> Option<GoalCandidate> {
    let metrics = &snapshot.metrics;
    if metrics.cpu_usage > CPU_IDLE_PERCENT || !snapshot.anomalies.is_empty() {
        return None;
    }
    let target = previous_vcpu_tier(metrics.current_vcpu)?;
    let confidence = (0.5 + (CPU_IDLE_PERCENT - metrics.cpu_usage) / 40.0).clamp(0.5, 0.9);
    let risk = RiskLevel::Low;
    Some(GoalCandidate::new(
        format!(
            "Reduce idle capacity: scale {} -> {} vCPU",
            metrics.current_vcpu, target
        ),
        GoalIntent::CostOptimize,
        GoalSource::Metrics,
        risk,
        confidence,
        json!({ "currentVcpu": metrics.current_vcpu, "targetVcpu": target }),
        score(10.0, 5.0, confidence, risk, level),
        now,
    ))
}

fn investigate(
    snapshot: &SystemSnapshot,
    level: AutonomyLevel,
    now: DateTime<Utc>,
    covered: &BTreeSet<usize>,
) -> Option<GoalCandidate> {
    let uncovered: Vec<&AnomalySignal> = snapshot
        .anomalies
        .iter()
        .enumerate()
        .filter(|(i, _)| !covered.contains(i))
        .map(|(_, a)| a)
        .collect();
    if uncovered.is_empty() && snapshot.rca.is_none() {
        return None;
    }

    let metrics: BTreeSet<&str> = uncovered.iter().map(|a| a.metric.as_str()).collect();
    let root_cause = snapshot.rca.as_ref().and_then(|r| r.root_cause.clone());
    let confidence = snapshot
        .rca
        .as_ref()
        .map(|r| r.confidence)
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);
    let urgency = uncovered
        .iter()
        .map(|a| severity_urgency(a.severity))
        .fold(0.0, f64::max);
    let impact = (10.0 + 5.0 * metrics.len() as f64).min(25.0);

    let mut params = json!({ "metrics": metrics });
    if let Some(cause) = &root_cause {
        params["rootCause"] = Value::String(cause.clone());
    }
    let (goal, source) = match (&root_cause, metrics.is_empty()) {
        (Some(cause), _) => (format!("Investigate suspected root cause: {cause}"), GoalSource::Rca),
        (None, false) => (
            format!(
                "Investigate anomalies on {}",
                metrics.iter().copied().collect::<Vec<_>>().join(", ")
            ),
            GoalSource::Anomaly,
        ),
        (None, true) => ("Investigate RCA signal".to_string(), GoalSource::Rca),
    };

    let risk = RiskLevel::Low;
    Some(GoalCandidate::new(
        goal,
        GoalIntent::Investigate,
        source,
        risk,
        confidence,
        params,
        score(impact, urgency, confidence, risk, level),
        now,
    ))
}
