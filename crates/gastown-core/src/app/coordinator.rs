//! Coordinator - the façade agents and operators talk to.
//!
//! Wires the claims manager, priority calculator, router, health monitor,
//! and scale manager over one pair of stores. `run` starts the background
//! loops (scale, reaper, dispatch) and hands back a shutdown handle.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::app::claims::{ClaimOutcome, ClaimsManager};
use crate::app::dispatch_loop::DispatchLoop;
use crate::app::health::{HealthMetrics, HealthMonitor, HealthReport, HealthStatus, Remediation};
use crate::app::priority::{Bottleneck, PriorityCalculator, PriorityScore, unblocked_dependents};
use crate::app::reaper_loop::ReaperLoop;
use crate::app::router::{Assignment, Router};
use crate::app::scale::{ScaleLoop, ScaleManager};
use crate::app::worker::{WorkExecutor, WorkerPool};
use crate::config::CoordinatorConfig;
use crate::domain::{
    Agent, AgentId, AgentRegistration, Claim, ClaimId, CoordinatorError, Dependency, Issue,
    IssueId, IssueStatus, NewIssue, OutcomeRecord, OutcomeReport, ReleaseReason,
};
use crate::ports::{Clock, IdGenerator, IssueStore};

/// A claimed issue handed to an agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkGrant {
    pub claim: Claim,
    pub issue: Issue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub outcome: OutcomeRecord,
    /// Dependents that became ready because of this completion.
    pub unblocked: Vec<IssueId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub expired_claims: usize,
    pub dead_agents: Vec<AgentId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorMetrics {
    pub active_workers: usize,
    pub total_workers: usize,
    pub queue_depth: usize,
    pub sessions_completed: u64,
    pub health: HealthStatus,
}

pub struct Coordinator {
    pub(crate) config: CoordinatorConfig,
    pub(crate) issues: Arc<dyn IssueStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) claims: Arc<ClaimsManager>,
    pub(crate) priority: Arc<PriorityCalculator>,
    pub(crate) router: Arc<Router>,
    pub(crate) health: Arc<HealthMonitor>,
    pub(crate) scale: Arc<ScaleManager>,
    pub(crate) pool: Arc<WorkerPool>,
}

impl Coordinator {
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn scale(&self) -> &Arc<ScaleManager> {
        &self.scale
    }

    pub fn claims(&self) -> &Arc<ClaimsManager> {
        &self.claims
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    // --- agents ---------------------------------------------------------

    pub async fn register_agent(
        &self,
        registration: AgentRegistration,
    ) -> Result<Agent, CoordinatorError> {
        self.claims.register_agent(registration).await
    }

    pub async fn unregister_agent(&self, agent_id: AgentId) -> Result<usize, CoordinatorError> {
        self.claims.unregister_agent(agent_id).await
    }

    pub async fn heartbeat(&self, agent_id: AgentId) -> Result<Option<Agent>, CoordinatorError> {
        self.claims.heartbeat(agent_id).await
    }

    // --- backlog --------------------------------------------------------

    pub async fn create_issue(&self, new: NewIssue) -> Result<Issue, CoordinatorError> {
        let issue = new.into_issue(self.ids.issue_id(), self.clock.now());
        self.issues.create_issue(issue.clone()).await?;
        debug!(issue_id = %issue.id, title = %issue.title, "issue created");
        Ok(issue)
    }

    /// Add an edge. Unknown endpoints and cycles are rejected by the store.
    pub async fn add_dependency(&self, dependency: Dependency) -> Result<(), CoordinatorError> {
        Ok(self.issues.add_dependency(dependency).await?)
    }

    pub async fn get_issue(&self, issue_id: IssueId) -> Result<Option<Issue>, CoordinatorError> {
        Ok(self.issues.get_issue(issue_id).await?)
    }

    pub async fn list_issues(&self) -> Result<Vec<Issue>, CoordinatorError> {
        Ok(self.issues.list_issues().await?)
    }

    /// Cancel an issue, releasing its active claim first. `false` when the
    /// issue was already terminal.
    pub async fn cancel_issue(&self, issue_id: IssueId) -> Result<bool, CoordinatorError> {
        let issue = self
            .issues
            .get_issue(issue_id)
            .await?
            .ok_or(CoordinatorError::IssueNotFound(issue_id))?;
        if issue.status.is_terminal() {
            return Ok(false);
        }
        if let Some(claim) = self.claims.active_claim_for_issue(issue_id).await? {
            self.claims
                .end_claim(claim.id, ReleaseReason::Cancelled, IssueStatus::Cancelled)
                .await?;
        }
        self.issues
            .transition_status(issue_id, IssueStatus::Open, IssueStatus::Cancelled, self.clock.now())
            .await?;
        info!(issue_id = %issue_id, "issue cancelled");
        Ok(true)
    }

    // --- work -----------------------------------------------------------

    /// Claim the best ready issue for `agent_id`.
    ///
    /// Retries a bounded number of times when another agent wins the race
    /// for the suggested issue. `None` when the agent is inactive, at
    /// capacity, or nothing suitable is ready.
    pub async fn get_next_work(
        &self,
        agent_id: AgentId,
        capabilities: &BTreeSet<String>,
    ) -> Result<Option<WorkGrant>, CoordinatorError> {
        let agent = self
            .claims
            .get_agent(agent_id)
            .await?
            .ok_or(CoordinatorError::AgentNotFound(agent_id))?;
        if !agent.is_active() {
            return Ok(None);
        }
        let held = self.claims.active_claims_by_agent(agent_id).await?.len();
        if held >= agent.max_concurrent as usize {
            return Ok(None);
        }

        let mut exclude = HashSet::new();
        for attempt in 1..=self.config.dispatch.max_claim_attempts {
            let Some(issue) = self.priority.suggest_next_issue(capabilities, &exclude).await? else {
                return Ok(None);
            };
            match self.claims.claim_issue(agent_id, issue.id).await? {
                ClaimOutcome::Claimed(claim) => {
                    self.router.record_assignment(agent_id).await;
                    let issue = Issue {
                        status: IssueStatus::Claimed,
                        ..issue
                    };
                    return Ok(Some(WorkGrant { claim, issue }));
                }
                ClaimOutcome::AgentAtCapacity => return Ok(None),
                ClaimOutcome::AlreadyClaimed { .. } | ClaimOutcome::NotClaimable => {
                    debug!(agent_id = %agent_id, issue_id = %issue.id, attempt, "lost claim race, retrying");
                    exclude.insert(issue.id);
                }
            }
        }
        debug!(agent_id = %agent_id, "no claim after bounded retries");
        Ok(None)
    }

    /// Release a claim and record its outcome.
    ///
    /// Success closes the issue and reports dependents it unblocked; failure
    /// reopens it. The claim is ended before anything is recorded: if a sweep
    /// or cancel ended it first, nothing is written and `ClaimInactive` is
    /// returned.
    pub async fn complete_work(
        &self,
        claim_id: ClaimId,
        agent_id: AgentId,
        report: OutcomeReport,
    ) -> Result<Completion, CoordinatorError> {
        let claim = self
            .claims
            .get_claim(claim_id)
            .await?
            .ok_or(CoordinatorError::ClaimNotFound(claim_id))?;
        if claim.agent_id != agent_id {
            return Err(CoordinatorError::NotClaimOwner { claim_id, agent_id });
        }
        if !claim.active {
            return Err(CoordinatorError::ClaimInactive(claim_id));
        }
        let issue = self
            .issues
            .get_issue(claim.issue_id)
            .await?
            .ok_or(CoordinatorError::IssueNotFound(claim.issue_id))?;

        let next = if report.kind.is_success() {
            IssueStatus::Closed
        } else {
            IssueStatus::Open
        };
        let Some(claim) = self
            .claims
            .end_claim(claim_id, ReleaseReason::Completed, next)
            .await?
        else {
            return Err(CoordinatorError::ClaimInactive(claim_id));
        };

        let outcome =
            OutcomeRecord::for_claim(self.ids.outcome_id(), &claim, report, self.clock.now());
        self.issues.record_outcome(outcome.clone()).await?;
        self.router
            .record_outcome(agent_id, outcome.kind, &issue)
            .await;

        let unblocked = if outcome.is_success() {
            unblocked_dependents(self.issues.as_ref(), claim.issue_id).await?
        } else {
            Vec::new()
        };
        info!(
            claim_id = %claim_id,
            issue_id = %claim.issue_id,
            agent_id = %agent_id,
            kind = ?outcome.kind,
            duration_ms = outcome.duration_ms,
            unblocked = unblocked.len(),
            "work completed"
        );
        Ok(Completion { outcome, unblocked })
    }

    pub async fn release_claim(
        &self,
        claim_id: ClaimId,
        agent_id: AgentId,
    ) -> Result<bool, CoordinatorError> {
        self.claims.release_claim(claim_id, agent_id).await
    }

    pub async fn get_claims_by_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<Vec<Claim>, CoordinatorError> {
        self.claims.get_claims_by_agent(agent_id).await
    }

    // --- insight --------------------------------------------------------

    pub async fn get_priority_scores(&self) -> Result<Vec<PriorityScore>, CoordinatorError> {
        Ok(self.priority.calculate_scores().await?)
    }

    pub async fn get_ready_issues(&self) -> Result<Vec<Issue>, CoordinatorError> {
        Ok(self.priority.get_ready_issues().await?)
    }

    pub async fn get_bottlenecks(&self, limit: usize) -> Result<Vec<Bottleneck>, CoordinatorError> {
        Ok(self.priority.get_bottlenecks(limit).await?)
    }

    pub async fn find_best_agent(
        &self,
        issue_id: IssueId,
    ) -> Result<Option<Assignment>, CoordinatorError> {
        let issue = self
            .issues
            .get_issue(issue_id)
            .await?
            .ok_or(CoordinatorError::IssueNotFound(issue_id))?;
        Ok(self.router.find_best_agent(&issue).await?)
    }

    pub async fn score_agents(&self, issue_id: IssueId) -> Result<Vec<Assignment>, CoordinatorError> {
        let issue = self
            .issues
            .get_issue(issue_id)
            .await?
            .ok_or(CoordinatorError::IssueNotFound(issue_id))?;
        Ok(self.router.score_agents(&issue).await?)
    }

    /// Greedy routing plan for every ready issue. Advisory; claims nothing.
    pub async fn plan_assignments(&self) -> Result<Vec<Assignment>, CoordinatorError> {
        let ready = self.priority.get_ready_issues().await?;
        Ok(self.router.find_assignments(&ready).await?)
    }

    pub async fn get_health_metrics(&self) -> Result<HealthMetrics, CoordinatorError> {
        Ok(self.health.get_health_metrics().await?)
    }

    pub async fn check_health(&self) -> Result<HealthReport, CoordinatorError> {
        Ok(self.health.check_health().await?)
    }

    pub async fn get_remediations(&self) -> Result<Vec<Remediation>, CoordinatorError> {
        Ok(self.health.generate_remediations().await?)
    }

    pub async fn metrics(&self) -> Result<CoordinatorMetrics, CoordinatorError> {
        let pool = self.pool.metrics().await;
        Ok(CoordinatorMetrics {
            active_workers: pool.working,
            total_workers: pool.total,
            queue_depth: self.priority.queue_depth().await?,
            sessions_completed: pool.sessions_completed,
            health: self.health.check_health().await?.status,
        })
    }

    // --- maintenance ----------------------------------------------------

    pub async fn cleanup_expired_claims(&self) -> Result<usize, CoordinatorError> {
        self.claims.cleanup_expired_claims().await
    }

    pub async fn cleanup_dead_agents(&self) -> Result<Vec<AgentId>, CoordinatorError> {
        self.claims.cleanup_dead_agents().await
    }

    /// Dead agents first (their claims are released with the right reason),
    /// then whatever leases are still expired.
    pub async fn cleanup(&self) -> Result<CleanupReport, CoordinatorError> {
        let dead_agents = self.cleanup_dead_agents().await?;
        let expired_claims = self.cleanup_expired_claims().await?;
        Ok(CleanupReport {
            expired_claims,
            dead_agents,
        })
    }

    /// Spawn the scale, reaper, and dispatch loops.
    pub fn run(self: &Arc<Self>, executor: Arc<dyn WorkExecutor>) -> CoordinatorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scale = ScaleLoop::new(
            Arc::clone(&self.scale),
            self.config.scale.health_check_interval(),
        );
        let reaper = ReaperLoop::new(Arc::clone(self), self.config.claims.heartbeat_interval());
        let dispatch = DispatchLoop::new(
            Arc::clone(self),
            executor,
            std::time::Duration::from_millis(self.config.dispatch.poll_interval_ms),
        );

        let joins = vec![
            tokio::spawn(scale.run(shutdown_rx.clone())),
            tokio::spawn(reaper.run(shutdown_rx.clone())),
            tokio::spawn(dispatch.run(shutdown_rx)),
        ];
        info!("coordinator loops started");
        CoordinatorHandle { shutdown_tx, joins }
    }
}

/// Handle for the background loops.
/// - dropping `shutdown_tx` or calling `request_shutdown` stops them
/// - `shutdown_and_join` waits until every loop has exited
pub struct CoordinatorHandle {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl CoordinatorHandle {
    /// Stop taking new work. In-flight executions are allowed to finish.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
        info!("coordinator loops stopped");
    }
}
