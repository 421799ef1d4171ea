//! HealthMonitor - metrics snapshot, threshold checks, remediation hints.
//!
//! Health is the worst violation severity: none is healthy, a warning is
//! degraded, a critical violation is unhealthy. Remediations are advisory
//! text for operators; nothing here acts on them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::app::priority::PriorityCalculator;
use crate::app::worker::{PoolMetrics, WorkerPool};
use crate::config::{HealthThresholds, millis};
use crate::domain::{AgentId, AgentStatus, OutcomeRecord, StorageError};
use crate::ports::{ClaimStore, Clock, IssueStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthMetrics {
    pub taken_at: DateTime<Utc>,
    pub total_agents: usize,
    pub active_agents: usize,
    /// Active agents holding no claim.
    pub idle_agents: usize,
    /// Active agents holding a claim older than the stall timeout.
    pub stalled_agents: usize,
    pub pool: Option<PoolMetrics>,
    pub queue_depth: usize,
    pub active_claims: usize,
    /// Outcomes in the trailing window, scaled to one hour.
    pub throughput_per_hour: f64,
    /// Outcomes in the trailing window.
    pub outcomes_in_window: usize,
    pub success_rate: Option<f64>,
    pub p95_duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    LowSuccessRate,
    StalledWorkers,
    QueueBacklog,
    NoActiveAgents,
    SlowCompletions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    fn from_violations(violations: &[Violation]) -> Self {
        match violations.iter().map(|v| v.severity).max() {
            None => HealthStatus::Healthy,
            Some(Severity::Warning) => HealthStatus::Degraded,
            Some(Severity::Critical) => HealthStatus::Unhealthy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub violations: Vec<Violation>,
    pub metrics: HealthMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Remediation {
    pub violation: Option<ViolationKind>,
    pub agent_id: Option<AgentId>,
    pub suggestion: String,
}

pub struct HealthMonitor {
    issues: Arc<dyn IssueStore>,
    claims: Arc<dyn ClaimStore>,
    priority: Arc<PriorityCalculator>,
    clock: Arc<dyn Clock>,
    pool: Option<Arc<WorkerPool>>,
    thresholds: HealthThresholds,
    stall_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        issues: Arc<dyn IssueStore>,
        claims: Arc<dyn ClaimStore>,
        priority: Arc<PriorityCalculator>,
        clock: Arc<dyn Clock>,
        thresholds: HealthThresholds,
        stall_timeout: Duration,
    ) -> Self {
        Self {
            issues,
            claims,
            priority,
            clock,
            pool: None,
            thresholds,
            stall_timeout,
        }
    }

    /// Include worker pool counts in snapshots.
    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub async fn get_health_metrics(&self) -> Result<HealthMetrics, StorageError> {
        let now = self.clock.now();
        let agents = self.claims.list_agents(None).await?;
        let active_claims = self.claims.active_claims().await?;

        let holding: HashSet<AgentId> = active_claims.iter().map(|c| c.agent_id).collect();
        let stalled: HashSet<AgentId> = active_claims
            .iter()
            .filter(|c| c.age(now) > self.stall_timeout)
            .map(|c| c.agent_id)
            .collect();
        let active: Vec<AgentId> = agents
            .iter()
            .filter(|a| a.status == AgentStatus::Active)
            .map(|a| a.id)
            .collect();

        let window = self.recent_outcomes(now).await?;
        let window_hours = self.thresholds.throughput_window_ms as f64 / 3_600_000.0;
        let successes = window.iter().filter(|o| o.is_success()).count();

        let pool = match &self.pool {
            Some(pool) => Some(pool.metrics().await),
            None => None,
        };

        Ok(HealthMetrics {
            taken_at: now,
            total_agents: agents.len(),
            active_agents: active.len(),
            idle_agents: active.iter().filter(|id| !holding.contains(id)).count(),
            stalled_agents: active.iter().filter(|id| stalled.contains(id)).count(),
            pool,
            queue_depth: self.priority.queue_depth().await?,
            active_claims: active_claims.len(),
            throughput_per_hour: if window_hours > 0.0 {
                window.len() as f64 / window_hours
            } else {
                0.0
            },
            outcomes_in_window: window.len(),
            success_rate: (!window.is_empty()).then(|| successes as f64 / window.len() as f64),
            p95_duration_ms: p95(window.iter().map(|o| o.duration_ms).collect()),
        })
    }

    pub async fn check_health(&self) -> Result<HealthReport, StorageError> {
        let metrics = self.get_health_metrics().await?;
        let violations = self.violations(&metrics);
        let status = HealthStatus::from_violations(&violations);
        if status != HealthStatus::Healthy {
            warn!(?status, violations = violations.len(), "health check found violations");
        } else {
            debug!("health check passed");
        }
        Ok(HealthReport {
            status,
            violations,
            metrics,
        })
    }

    pub async fn generate_remediations(&self) -> Result<Vec<Remediation>, StorageError> {
        let report = self.check_health().await?;
        let mut out: Vec<Remediation> = report
            .violations
            .iter()
            .map(|v| Remediation {
                violation: Some(v.kind),
                agent_id: None,
                suggestion: suggestion_for(v.kind).to_string(),
            })
            .collect();

        let now = self.clock.now();
        let mut failures: HashMap<AgentId, usize> = HashMap::new();
        for outcome in self.recent_outcomes(now).await? {
            if !outcome.is_success() {
                *failures.entry(outcome.agent_id).or_default() += 1;
            }
        }
        // listing order keeps remediations stable
        for agent in self.claims.list_agents(None).await? {
            let count = failures.get(&agent.id).copied().unwrap_or(0);
            if count >= self.thresholds.repeated_failure_threshold {
                out.push(Remediation {
                    violation: None,
                    agent_id: Some(agent.id),
                    suggestion: format!(
                        "investigate agent {} ({}): {count} recent failures",
                        agent.name, agent.id
                    ),
                });
            }
        }
        Ok(out)
    }

    fn violations(&self, m: &HealthMetrics) -> Vec<Violation> {
        let t = &self.thresholds;
        let mut v = Vec::new();

        if let Some(rate) = m.success_rate
            && m.outcomes_in_window >= t.min_outcomes_for_rate
            && rate < t.min_success_rate
        {
            let severity = if rate < t.critical_success_rate {
                Severity::Critical
            } else {
                Severity::Warning
            };
            v.push(Violation {
                kind: ViolationKind::LowSuccessRate,
                severity,
                message: format!(
                    "success rate {:.0}% below {:.0}%",
                    rate * 100.0,
                    t.min_success_rate * 100.0
                ),
            });
        }

        if m.stalled_agents > t.max_stalled_workers {
            v.push(Violation {
                kind: ViolationKind::StalledWorkers,
                severity: Severity::Warning,
                message: format!(
                    "{} stalled agents (max {})",
                    m.stalled_agents, t.max_stalled_workers
                ),
            });
        }

        if m.queue_depth > t.max_queue_depth {
            v.push(Violation {
                kind: ViolationKind::QueueBacklog,
                severity: Severity::Warning,
                message: format!("queue depth {} above {}", m.queue_depth, t.max_queue_depth),
            });
        }

        if m.active_agents == 0 && m.queue_depth > 0 {
            v.push(Violation {
                kind: ViolationKind::NoActiveAgents,
                severity: Severity::Critical,
                message: format!("{} ready issues and no active agents", m.queue_depth),
            });
        }

        if let Some(p95) = m.p95_duration_ms
            && p95 > t.max_p95_duration_ms
        {
            v.push(Violation {
                kind: ViolationKind::SlowCompletions,
                severity: Severity::Warning,
                message: format!("p95 duration {p95}ms above {}ms", t.max_p95_duration_ms),
            });
        }

        v
    }

    async fn recent_outcomes(&self, now: DateTime<Utc>) -> Result<Vec<OutcomeRecord>, StorageError> {
        let since = now - millis(self.thresholds.throughput_window_ms);
        let mut outcomes = self.issues.list_outcomes().await?;
        outcomes.retain(|o| o.completed_at > since);
        Ok(outcomes)
    }
}

fn suggestion_for(kind: ViolationKind) -> &'static str {
    match kind {
        ViolationKind::LowSuccessRate => {
            "review recent failure summaries and pause intake for the failing capability"
        }
        ViolationKind::StalledWorkers => {
            "restart stalled workers or lower the stall timeout"
        }
        ViolationKind::QueueBacklog => "scale up workers or apply backpressure to new work",
        ViolationKind::NoActiveAgents => "register agents; ready work has nobody to take it",
        ViolationKind::SlowCompletions => "split large issues or raise the stall timeout",
    }
}

/// Nearest-rank 95th percentile.
fn p95(mut values: Vec<u64>) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let rank = ((values.len() as f64) * 0.95).ceil() as usize;
    values.get(rank.saturating_sub(1)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::claims::ClaimsManager;
    use crate::app::testing::Fixture;
    use crate::domain::{AgentRegistration, Claim, NewIssue, OutcomeReport};
    use crate::ports::IdGenerator;
    use rstest::rstest;

    fn monitor(fx: &Fixture) -> HealthMonitor {
        let priority = Arc::new(PriorityCalculator::new(
            fx.issues.clone(),
            fx.claims.clone(),
            fx.clock.clone(),
            fx.config.priority.clone(),
        ));
        HealthMonitor::new(
            fx.issues.clone(),
            fx.claims.clone(),
            priority,
            fx.clock.clone(),
            fx.config.health.clone(),
            fx.config.scale.stall_timeout(),
        )
    }

    /// Record an outcome for `agent` on a fresh issue, `duration_ms` long.
    async fn outcome(fx: &Fixture, agent: AgentId, success: bool, duration_ms: i64) {
        let issue = fx.issue(NewIssue::new("done")).await;
        let now = fx.clock.now();
        let claim = Claim::new(
            fx.ids.claim_id(),
            issue.id,
            agent,
            now - Duration::milliseconds(duration_ms),
            Duration::seconds(60),
        );
        let report = if success {
            OutcomeReport::success("ok")
        } else {
            OutcomeReport::failure("no")
        };
        let record = OutcomeRecord::for_claim(fx.ids.outcome_id(), &claim, report, now);
        fx.issues.record_outcome(record).await.unwrap();
        fx.issues
            .update_status(issue.id, crate::domain::IssueStatus::Closed, now)
            .await
            .unwrap();
    }

    async fn register(cm: &ClaimsManager, name: &str) -> AgentId {
        cm.register_agent(AgentRegistration::new(name)).await.unwrap().id
    }

    #[test]
    fn p95_uses_nearest_rank() {
        assert_eq!(p95(vec![]), None);
        assert_eq!(p95(vec![7]), Some(7));
        assert_eq!(p95((1..=100).collect()), Some(95));
        assert_eq!(p95((1..=10).collect()), Some(10));
    }

    #[tokio::test]
    async fn empty_system_is_healthy() {
        let fx = Fixture::new();
        let report = monitor(&fx).check_health().await.unwrap();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.metrics.success_rate, None);
        assert_eq!(report.metrics.queue_depth, 0);
    }

    #[tokio::test]
    async fn queued_work_without_agents_is_critical() {
        let fx = Fixture::new();
        fx.issue(NewIssue::new("waiting")).await;
        let report = monitor(&fx).check_health().await.unwrap();
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.violations[0].kind, ViolationKind::NoActiveAgents);
    }

    #[rstest]
    #[case(10, 0, HealthStatus::Healthy)]
    #[case(7, 3, HealthStatus::Degraded)]
    #[case(4, 6, HealthStatus::Unhealthy)]
    #[case(1, 2, HealthStatus::Healthy)]
    #[tokio::test]
    async fn success_rate_thresholds(
        #[case] ok: usize,
        #[case] failed: usize,
        #[case] expected: HealthStatus,
    ) {
        let fx = Fixture::new();
        let cm = fx.claims_manager();
        let agent = register(&cm, "a").await;
        for _ in 0..ok {
            outcome(&fx, agent, true, 1_000).await;
        }
        for _ in 0..failed {
            outcome(&fx, agent, false, 1_000).await;
        }
        let report = monitor(&fx).check_health().await.unwrap();
        assert_eq!(report.status, expected);
    }

    #[tokio::test]
    async fn agent_metrics_split_idle_and_stalled() {
        let mut config = crate::config::CoordinatorConfig::default();
        config.health.max_stalled_workers = 0;
        config.claims.claim_ttl_ms = 60 * 60 * 1000;
        let fx = Fixture::with_config(config);
        let cm = fx.claims_manager();
        let busy = register(&cm, "busy").await;
        let _idle = register(&cm, "idle").await;
        let issue = fx.issue(NewIssue::new("long")).await;
        cm.claim_issue(busy, issue.id).await.unwrap();

        fx.clock.advance(fx.config.scale.stall_timeout() + Duration::seconds(1));
        let report = monitor(&fx).check_health().await.unwrap();
        let m = &report.metrics;
        assert_eq!((m.total_agents, m.active_agents, m.idle_agents), (2, 2, 1));
        assert_eq!(m.stalled_agents, 1);
        assert_eq!(m.active_claims, 1);
        assert!(report.violations.iter().any(|v| v.kind == ViolationKind::StalledWorkers));
    }

    #[tokio::test]
    async fn throughput_counts_only_the_window() {
        let fx = Fixture::new();
        let cm = fx.claims_manager();
        let agent = register(&cm, "a").await;
        outcome(&fx, agent, true, 10).await;
        fx.clock.advance(Duration::hours(2));
        outcome(&fx, agent, true, 10).await;
        outcome(&fx, agent, true, 10).await;

        let m = monitor(&fx).get_health_metrics().await.unwrap();
        assert_eq!(m.outcomes_in_window, 2);
        assert!((m.throughput_per_hour - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn slow_completions_are_flagged() {
        let fx = Fixture::new();
        let cm = fx.claims_manager();
        let agent = register(&cm, "a").await;
        outcome(&fx, agent, true, 2 * 60 * 60 * 1000).await;
        let report = monitor(&fx).check_health().await.unwrap();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.violations[0].kind, ViolationKind::SlowCompletions);
    }

    #[tokio::test]
    async fn remediations_name_repeatedly_failing_agents() {
        let fx = Fixture::new();
        let cm = fx.claims_manager();
        let flaky = register(&cm, "flaky").await;
        let solid = register(&cm, "solid").await;
        for _ in 0..3 {
            outcome(&fx, flaky, false, 100).await;
        }
        outcome(&fx, solid, false, 100).await;
        for _ in 0..6 {
            outcome(&fx, solid, true, 100).await;
        }

        let remediations = monitor(&fx).generate_remediations().await.unwrap();
        let named: Vec<_> = remediations.iter().filter_map(|r| r.agent_id).collect();
        assert_eq!(named, vec![flaky]);
        assert!(remediations.iter().any(|r| r.suggestion.contains("investigate agent flaky")));
        // 6/10 success is below the 80% floor
        assert!(remediations
            .iter()
            .any(|r| r.violation == Some(ViolationKind::LowSuccessRate)));
    }
}
