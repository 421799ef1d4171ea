//! Simulated agents and a synthetic backlog for driving the coordinator
//! without real workers.

use std::time::Duration;

use async_trait::async_trait;
use gastown_core::Coordinator;
use gastown_core::app::{WorkExecutor, WorkerError};
use gastown_core::domain::{Claim, Dependency, Issue, IssueId, NewIssue, OutcomeReport, Priority};
use rand::Rng;
use rand::seq::SliceRandom;

const PRIORITIES: [Priority; 5] = [
    Priority::Critical,
    Priority::High,
    Priority::Medium,
    Priority::Low,
    Priority::Backlog,
];

/// Sleeps a random time, then reports success or failure at random.
pub struct SimulatedExecutor {
    failure_rate: f64,
    max_work_ms: u64,
}

impl SimulatedExecutor {
    pub fn new(failure_rate: f64, max_work_ms: u64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            max_work_ms: max_work_ms.max(1),
        }
    }
}

#[async_trait]
impl WorkExecutor for SimulatedExecutor {
    async fn execute(&self, issue: &Issue, _claim: &Claim) -> Result<OutcomeReport, WorkerError> {
        // ThreadRng is !Send; draw everything before the first await
        let (work_ms, fails) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(0..self.max_work_ms),
                rng.gen_bool(self.failure_rate),
            )
        };
        tokio::time::sleep(Duration::from_millis(work_ms)).await;
        if fails {
            return Ok(OutcomeReport::failure(format!("{}: tests failed", issue.title)));
        }
        Ok(OutcomeReport::success(format!("{}: done", issue.title)))
    }
}

/// Seed `count` issues with random priorities. Roughly a third get a
/// blocking edge on an earlier issue, so the graph stays acyclic.
pub async fn seed_backlog(coordinator: &Coordinator, count: usize) -> anyhow::Result<Vec<IssueId>> {
    let mut ids: Vec<IssueId> = Vec::with_capacity(count);
    for n in 0..count {
        let (priority, blocker) = {
            let mut rng = rand::thread_rng();
            let priority = *PRIORITIES.choose(&mut rng).unwrap_or(&Priority::Medium);
            let blocker = if rng.gen_bool(0.3) {
                ids.choose(&mut rng).copied()
            } else {
                None
            };
            (priority, blocker)
        };
        let issue = coordinator
            .create_issue(
                NewIssue::new(format!("issue-{n:03}"))
                    .with_priority(priority)
                    .with_label("synthetic"),
            )
            .await?;
        if let Some(blocker) = blocker {
            coordinator
                .add_dependency(Dependency::blocks(issue.id, blocker))
                .await?;
        }
        ids.push(issue.id);
    }
    Ok(ids)
}
