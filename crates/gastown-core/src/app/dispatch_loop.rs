//! DispatchLoop - hands ready issues to idle pool workers and runs them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::app::coordinator::{Coordinator, WorkGrant};
use crate::app::worker::{WorkExecutor, Worker, WorkerError, WorkerState};
use crate::domain::{CoordinatorError, OutcomeReport};

/// DispatchLoop matches idle workers with work on every poll.
///
/// # Flow
/// 1. heartbeat every pool worker (keeps agents alive, renews leases)
/// 2. for each idle worker under its session quota: `get_next_work`
/// 3. `claim_work` on the worker, then execute on a spawned task
/// 4. report the result through `complete_work`; an execution error is
///    reported as a failure and the worker is reset
///
/// Shutdown stops new dispatches; in-flight executions are awaited.
pub struct DispatchLoop {
    coordinator: Arc<Coordinator>,
    executor: Arc<dyn WorkExecutor>,
    poll_interval: Duration,
}

impl DispatchLoop {
    pub fn new(
        coordinator: Arc<Coordinator>,
        executor: Arc<dyn WorkExecutor>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            executor,
            poll_interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut in_flight = JoinSet::new();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }
            while in_flight.try_join_next().is_some() {}

            if let Err(e) = self.dispatch_once(&mut in_flight).await {
                error!(error = %e, kind = ?e.kind(), "dispatch pass failed");
            }
        }

        debug!(in_flight = in_flight.len(), "dispatch loop draining");
        while in_flight.join_next().await.is_some() {}
    }

    /// One dispatch pass. Returns how many workers were given work.
    pub async fn dispatch_once(&self, in_flight: &mut JoinSet<()>) -> Result<usize, CoordinatorError> {
        let c = &self.coordinator;
        let mut dispatched = 0;
        for worker in c.pool().workers().await {
            c.heartbeat(worker.id()).await?;
            if worker.state().await != WorkerState::Idle {
                continue;
            }
            if c.scale().has_exceeded_quota(worker.id()).await {
                continue;
            }
            let Some(grant) = c.get_next_work(worker.id(), worker.capabilities()).await? else {
                continue;
            };
            if let Err(e) = worker.claim_work(grant.clone(), grant.claim.claimed_at).await {
                // lost a race with a restart; hand the claim back
                warn!(worker_id = %worker.id(), error = %e, "worker refused work");
                c.release_claim(grant.claim.id, worker.id()).await?;
                continue;
            }
            in_flight.spawn(run_one(
                Arc::clone(c),
                Arc::clone(&self.executor),
                worker,
                grant,
            ));
            dispatched += 1;
        }
        Ok(dispatched)
    }
}

async fn run_one(
    coordinator: Arc<Coordinator>,
    executor: Arc<dyn WorkExecutor>,
    worker: Arc<Worker>,
    grant: WorkGrant,
) {
    let report = match worker.execute(executor.as_ref()).await {
        Ok(report) => report,
        Err(WorkerError::Revoked(claim_id)) => {
            debug!(worker_id = %worker.id(), claim_id = %claim_id, "result dropped after restart");
            return;
        }
        Err(e) => {
            warn!(worker_id = %worker.id(), issue_id = %grant.issue.id, error = %e, "execution failed");
            worker.reset().await;
            OutcomeReport::failure(e.to_string())
        }
    };
    match coordinator
        .complete_work(grant.claim.id, worker.id(), report)
        .await
    {
        Ok(_) => {}
        // reaped or cancelled while running
        Err(CoordinatorError::ClaimInactive(claim_id)) => {
            debug!(worker_id = %worker.id(), claim_id = %claim_id, "claim ended before completion");
        }
        Err(e) => error!(worker_id = %worker.id(), error = %e, "failed to record completion"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::builder::CoordinatorBuilder;
    use crate::config::CoordinatorConfig;
    use crate::domain::{Claim, Issue, IssueStatus, NewIssue};
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl WorkExecutor for Echo {
        async fn execute(&self, issue: &Issue, _: &Claim) -> Result<OutcomeReport, WorkerError> {
            if issue.title.contains("broken") {
                return Err(WorkerError::Execution("exit code 1".into()));
            }
            Ok(OutcomeReport::success(format!("did {}", issue.title)))
        }
    }

    fn coordinator(workers: usize) -> Arc<Coordinator> {
        let mut config = CoordinatorConfig::default();
        config.scale.min_workers = workers;
        config.scale.max_workers = workers;
        CoordinatorBuilder::in_memory()
            .with_config(config)
            .build()
            .unwrap()
    }

    fn dispatcher(c: &Arc<Coordinator>) -> DispatchLoop {
        DispatchLoop::new(Arc::clone(c), Arc::new(Echo), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn idle_workers_pick_up_ready_work() {
        let c = coordinator(2);
        c.scale().clamp().await.unwrap();
        for title in ["a", "b", "c"] {
            c.create_issue(NewIssue::new(title)).await.unwrap();
        }

        let mut in_flight = JoinSet::new();
        let n = dispatcher(&c).dispatch_once(&mut in_flight).await.unwrap();
        assert_eq!(n, 2);
        while in_flight.join_next().await.is_some() {}

        let closed = c
            .list_issues()
            .await
            .unwrap()
            .into_iter()
            .filter(|i| i.status == IssueStatus::Closed)
            .count();
        assert_eq!(closed, 2);
        assert_eq!(c.get_ready_issues().await.unwrap().len(), 1);
        assert_eq!(c.pool().metrics().await.sessions_completed, 2);
    }

    #[tokio::test]
    async fn execution_error_is_recorded_as_failure_and_worker_recovers() {
        let c = coordinator(1);
        c.scale().clamp().await.unwrap();
        let broken = c.create_issue(NewIssue::new("broken build")).await.unwrap();

        let mut in_flight = JoinSet::new();
        dispatcher(&c).dispatch_once(&mut in_flight).await.unwrap();
        while in_flight.join_next().await.is_some() {}

        let issue = c.get_issue(broken.id).await.unwrap().unwrap();
        assert_eq!(issue.status, IssueStatus::Open);
        let worker = c.pool().workers().await.remove(0);
        assert_eq!(worker.state().await, WorkerState::Idle);
        let remediations = c.get_remediations().await.unwrap();
        assert!(remediations.iter().all(|r| r.agent_id.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn run_drains_backlog_and_stops_on_shutdown() {
        let c = coordinator(2);
        let first = c.create_issue(NewIssue::new("first")).await.unwrap();
        let second = c.create_issue(NewIssue::new("second")).await.unwrap();
        c.add_dependency(crate::domain::Dependency::blocks(second.id, first.id))
            .await
            .unwrap();

        let handle = c.run(Arc::new(Echo));
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if c.get_ready_issues().await.unwrap().is_empty()
                && c.get_issue(second.id).await.unwrap().unwrap().status == IssueStatus::Closed
            {
                break;
            }
        }
        handle.shutdown_and_join().await;

        assert_eq!(c.get_issue(first.id).await.unwrap().unwrap().status, IssueStatus::Closed);
        assert_eq!(c.get_issue(second.id).await.unwrap().unwrap().status, IssueStatus::Closed);
        assert_eq!(c.metrics().await.unwrap().sessions_completed, 2);
    }
}
