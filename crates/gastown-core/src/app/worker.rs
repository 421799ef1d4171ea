//! Worker and WorkerPool.
//!
//! A worker is the execution-side twin of an agent (same id). State machine:
//!
//! ```text
//! idle -> working -> idle
//! idle -> working -> failed -> idle (reset)
//! idle | working -> retired (terminal)
//! ```
//!
//! The worker lock is never held across executor awaits. Each claimed unit
//! of work gets a generation number; a restart bumps it, so a result that
//! arrives for an older generation is discarded as `WorkerError::Revoked`.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::app::coordinator::WorkGrant;
use crate::domain::{AgentId, Claim, ClaimId, ErrorKind, Issue, IssueId, OutcomeReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Working,
    Failed,
    /// Leaving the pool; never accepts work again.
    Retired,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {worker_id} is {state:?}, not idle")]
    NotIdle {
        worker_id: AgentId,
        state: WorkerState,
    },

    #[error("worker {0} has no claimed work")]
    NoWork(AgentId),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("work on claim {0} was revoked")]
    Revoked(ClaimId),
}

impl WorkerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::NotIdle { .. } | WorkerError::NoWork(_) => ErrorKind::Ownership,
            WorkerError::Execution(_) | WorkerError::Revoked(_) => ErrorKind::Execution,
        }
    }
}

/// Runs one claimed issue.
///
/// `Ok(report)` is a clean finish (the report may still say failure);
/// `Err` means execution itself broke and the worker goes to `failed`.
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    async fn execute(&self, issue: &Issue, claim: &Claim) -> Result<OutcomeReport, WorkerError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSnapshot {
    pub id: AgentId,
    pub name: String,
    pub state: WorkerState,
    pub claim_id: Option<ClaimId>,
    pub issue_id: Option<IssueId>,
    pub started_at: Option<DateTime<Utc>>,
    pub sessions_completed: u64,
    pub last_error: Option<String>,
}

struct WorkerInner {
    state: WorkerState,
    current: Option<WorkGrant>,
    generation: u64,
    started_at: Option<DateTime<Utc>>,
    sessions_completed: u64,
    last_error: Option<String>,
}

pub struct Worker {
    id: AgentId,
    name: String,
    capabilities: BTreeSet<String>,
    inner: Mutex<WorkerInner>,
}

impl Worker {
    pub fn new(id: AgentId, name: impl Into<String>, capabilities: BTreeSet<String>) -> Self {
        Self {
            id,
            name: name.into(),
            capabilities,
            inner: Mutex::new(WorkerInner {
                state: WorkerState::Idle,
                current: None,
                generation: 0,
                started_at: None,
                sessions_completed: 0,
                last_error: None,
            }),
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    pub async fn state(&self) -> WorkerState {
        self.inner.lock().await.state
    }

    pub async fn sessions_completed(&self) -> u64 {
        self.inner.lock().await.sessions_completed
    }

    /// Take on a granted issue. Only an idle worker accepts work.
    pub async fn claim_work(&self, grant: WorkGrant, now: DateTime<Utc>) -> Result<(), WorkerError> {
        let mut inner = self.inner.lock().await;
        if inner.state != WorkerState::Idle {
            return Err(WorkerError::NotIdle {
                worker_id: self.id,
                state: inner.state,
            });
        }
        inner.state = WorkerState::Working;
        inner.current = Some(grant);
        inner.started_at = Some(now);
        inner.generation += 1;
        Ok(())
    }

    /// Run the claimed work through `executor`.
    pub async fn execute(&self, executor: &dyn WorkExecutor) -> Result<OutcomeReport, WorkerError> {
        let (grant, generation) = {
            let inner = self.inner.lock().await;
            match (&inner.current, inner.state) {
                (Some(grant), WorkerState::Working) => (grant.clone(), inner.generation),
                _ => return Err(WorkerError::NoWork(self.id)),
            }
        };

        let result = executor.execute(&grant.issue, &grant.claim).await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            warn!(worker_id = %self.id, claim_id = %grant.claim.id, "discarding result of revoked work");
            return Err(WorkerError::Revoked(grant.claim.id));
        }
        inner.current = None;
        inner.started_at = None;
        inner.sessions_completed += 1;
        match result {
            Ok(report) => {
                inner.state = WorkerState::Idle;
                Ok(report)
            }
            Err(err) => {
                inner.state = WorkerState::Failed;
                inner.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Return a failed worker to idle. A retired worker stays retired.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == WorkerState::Retired {
            return;
        }
        inner.state = WorkerState::Idle;
        inner.current = None;
        inner.started_at = None;
    }

    /// Abandon in-flight work and go idle. Returns the abandoned claim so the
    /// caller can release it; any late result is discarded.
    pub async fn restart(&self) -> Option<Claim> {
        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        inner.state = WorkerState::Idle;
        inner.started_at = None;
        let abandoned = inner.current.take().map(|g| g.claim);
        info!(worker_id = %self.id, claim_id = ?abandoned.as_ref().map(|c| c.id), "worker restarted");
        abandoned
    }

    /// Retire the worker only if it is idle. Checked and set under one lock,
    /// so a concurrent `claim_work` either lands first or is refused.
    pub async fn try_retire(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != WorkerState::Idle {
            return false;
        }
        inner.state = WorkerState::Retired;
        true
    }

    /// Retire unconditionally. In-flight work is abandoned like `restart`
    /// and its claim returned.
    pub async fn retire(&self) -> Option<Claim> {
        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        inner.state = WorkerState::Retired;
        inner.started_at = None;
        inner.current.take().map(|g| g.claim)
    }

    /// Working on the same claim for longer than `timeout`.
    pub async fn is_stalled(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let inner = self.inner.lock().await;
        inner.state == WorkerState::Working
            && inner.started_at.is_some_and(|started| now - started > timeout)
    }

    pub async fn snapshot(&self) -> WorkerSnapshot {
        let inner = self.inner.lock().await;
        WorkerSnapshot {
            id: self.id,
            name: self.name.clone(),
            state: inner.state,
            claim_id: inner.current.as_ref().map(|g| g.claim.id),
            issue_id: inner.current.as_ref().map(|g| g.issue.id),
            started_at: inner.started_at,
            sessions_completed: inner.sessions_completed,
            last_error: inner.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolMetrics {
    pub total: usize,
    pub idle: usize,
    pub working: usize,
    pub failed: usize,
    pub sessions_completed: u64,
}

/// Flat registry of workers, in insertion order.
#[derive(Default)]
pub struct WorkerPool {
    workers: Mutex<Vec<Arc<Worker>>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, worker: Arc<Worker>) {
        self.workers.lock().await.push(worker);
    }

    pub async fn remove(&self, id: AgentId) -> Option<Arc<Worker>> {
        let mut workers = self.workers.lock().await;
        let pos = workers.iter().position(|w| w.id() == id)?;
        Some(workers.remove(pos))
    }

    pub async fn get(&self, id: AgentId) -> Option<Arc<Worker>> {
        self.workers
            .lock()
            .await
            .iter()
            .find(|w| w.id() == id)
            .cloned()
    }

    /// Snapshot of the registry; safe to await on each worker afterwards.
    pub async fn workers(&self) -> Vec<Arc<Worker>> {
        self.workers.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.lock().await.is_empty()
    }

    pub async fn metrics(&self) -> PoolMetrics {
        let mut metrics = PoolMetrics::default();
        for worker in self.workers().await {
            let snap = worker.snapshot().await;
            metrics.total += 1;
            metrics.sessions_completed += snap.sessions_completed;
            match snap.state {
                WorkerState::Idle => metrics.idle += 1,
                WorkerState::Working => metrics.working += 1,
                WorkerState::Failed => metrics.failed += 1,
                WorkerState::Retired => {}
            }
        }
        metrics
    }
}
