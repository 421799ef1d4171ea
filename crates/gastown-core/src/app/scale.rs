//! ScaleManager - keeps the worker pool sized to the ready queue.
//!
//! One `tick` does, in order:
//! 1. restart stalled workers, releasing their claims
//! 2. clamp the pool into [min_workers, max_workers] (ignores cooldown)
//! 3. otherwise scale on `ratio = queue_depth / workers`: above the up
//!    threshold add `ceil(ratio)` workers, below the down threshold remove
//!    one idle worker, both subject to the cooldown
//!
//! Each worker is registered as an agent with the claims manager, so scaled
//! workers are visible to routing and health like any other agent.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::app::claims::ClaimsManager;
use crate::app::priority::PriorityCalculator;
use crate::app::worker::{Worker, WorkerPool};
use crate::config::ScaleConfig;
use crate::domain::{AgentId, AgentRegistration, CoordinatorError, IssueStatus, ReleaseReason};
use crate::ports::Clock;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScaleAction {
    Hold,
    CoolingDown,
    Clamped { from: usize, to: usize },
    ScaledUp { added: usize },
    ScaledDown { removed: AgentId },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleReport {
    pub restarted: Vec<AgentId>,
    pub action: ScaleAction,
    pub workers_before: usize,
    pub workers_after: usize,
    pub queue_depth: usize,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleMetrics {
    pub workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_depth: usize,
    pub target_queue_depth: usize,
    pub ratio: f64,
    pub backpressure: bool,
}

pub struct ScaleManager {
    claims: Arc<ClaimsManager>,
    priority: Arc<PriorityCalculator>,
    pool: Arc<WorkerPool>,
    clock: Arc<dyn Clock>,
    config: ScaleConfig,
    last_scaled: Mutex<Option<DateTime<Utc>>>,
    spawned: AtomicUsize,
}

impl ScaleManager {
    pub fn new(
        claims: Arc<ClaimsManager>,
        priority: Arc<PriorityCalculator>,
        pool: Arc<WorkerPool>,
        clock: Arc<dyn Clock>,
        config: ScaleConfig,
    ) -> Self {
        Self {
            claims,
            priority,
            pool,
            clock,
            config,
            last_scaled: Mutex::new(None),
            spawned: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &ScaleConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub async fn tick(&self) -> Result<ScaleReport, CoordinatorError> {
        let restarted = self.restart_stalled().await?;
        let workers_before = self.pool.len().await;
        let queue_depth = self.priority.queue_depth().await?;
        let ratio = queue_depth as f64 / workers_before.max(1) as f64;

        let action = if let Some(clamped) = self.clamp().await? {
            clamped
        } else if self.cooling_down().await {
            ScaleAction::CoolingDown
        } else if ratio > self.config.scale_up_threshold && workers_before < self.config.max_workers
        {
            let want = ratio.ceil() as usize;
            let added = want.min(self.config.max_workers - workers_before);
            self.add_workers(added).await?;
            self.mark_scaled().await;
            info!(added, queue_depth, ratio, "scaled up");
            ScaleAction::ScaledUp { added }
        } else if ratio < self.config.scale_down_threshold
            && workers_before > self.config.min_workers
        {
            match self.remove_idle_worker().await? {
                Some(removed) => {
                    self.mark_scaled().await;
                    info!(worker_id = %removed, queue_depth, ratio, "scaled down");
                    ScaleAction::ScaledDown { removed }
                }
                None => ScaleAction::Hold,
            }
        } else {
            ScaleAction::Hold
        };

        Ok(ScaleReport {
            restarted,
            action,
            workers_before,
            workers_after: self.pool.len().await,
            queue_depth,
            ratio,
        })
    }

    /// Bring the pool into [min, max]. Used at startup and by every tick.
    pub async fn clamp(&self) -> Result<Option<ScaleAction>, CoordinatorError> {
        let from = self.pool.len().await;
        if from < self.config.min_workers {
            self.add_workers(self.config.min_workers - from).await?;
        } else if from > self.config.max_workers {
            for _ in self.config.max_workers..from {
                let removed = match self.remove_idle_worker().await? {
                    Some(id) => Some(id),
                    None => self.remove_any_worker().await?,
                };
                if removed.is_none() {
                    break;
                }
            }
        } else {
            return Ok(None);
        }
        let to = self.pool.len().await;
        info!(from, to, "worker pool clamped");
        Ok(Some(ScaleAction::Clamped { from, to }))
    }

    pub async fn should_apply_backpressure(&self) -> Result<bool, CoordinatorError> {
        Ok(self.priority.queue_depth().await? > self.config.max_queue_depth)
    }

    /// Lifetime sessions reached the per-worker quota. Unknown workers are
    /// never over quota.
    pub async fn has_exceeded_quota(&self, worker_id: AgentId) -> bool {
        match self.pool.get(worker_id).await {
            Some(worker) => worker.sessions_completed().await >= self.config.max_sessions_per_worker,
            None => false,
        }
    }

    pub async fn metrics(&self) -> Result<ScaleMetrics, CoordinatorError> {
        let workers = self.pool.len().await;
        let queue_depth = self.priority.queue_depth().await?;
        Ok(ScaleMetrics {
            workers,
            min_workers: self.config.min_workers,
            max_workers: self.config.max_workers,
            queue_depth,
            target_queue_depth: self.config.target_queue_depth,
            ratio: queue_depth as f64 / workers.max(1) as f64,
            backpressure: queue_depth > self.config.max_queue_depth,
        })
    }

    async fn restart_stalled(&self) -> Result<Vec<AgentId>, CoordinatorError> {
        let now = self.clock.now();
        let timeout = self.config.stall_timeout();
        let mut restarted = Vec::new();
        for worker in self.pool.workers().await {
            if !worker.is_stalled(now, timeout).await {
                continue;
            }
            if let Some(claim) = worker.retire().await {
                self.claims
                    .end_claim(claim.id, ReleaseReason::Stalled, IssueStatus::Open)
                    .await?;
            }
            warn!(worker_id = %worker.id(), "restarted stalled worker");
            restarted.push(worker.id());
        }
        Ok(restarted)
    }

    async fn add_workers(&self, n: usize) -> Result<(), CoordinatorError> {
        for _ in 0..n {
            let seq = self.spawned.fetch_add(1, Ordering::Relaxed) + 1;
            let name = format!("worker-{seq}");
            let agent = self
                .claims
                .register_agent(
                    AgentRegistration::new(name.clone())
                        .with_capabilities(self.config.worker_capabilities.iter().cloned())
                        .with_max_concurrent(1),
                )
                .await?;
            self.pool
                .add(Arc::new(Worker::new(agent.id, name, agent.capabilities)))
                .await;
        }
        Ok(())
    }

    async fn remove_idle_worker(&self) -> Result<Option<AgentId>, CoordinatorError> {
        for worker in self.pool.workers().await.into_iter().rev() {
            if worker.try_retire().await {
                self.retire(&worker).await?;
                return Ok(Some(worker.id()));
            }
        }
        Ok(None)
    }

    async fn remove_any_worker(&self) -> Result<Option<AgentId>, CoordinatorError> {
        let Some(worker) = self.pool.workers().await.pop() else {
            return Ok(None);
        };
        if let Some(claim) = worker.restart().await {
            self.claims
                .end_claim(claim.id, ReleaseReason::Released, IssueStatus::Open)
                .await?;
        }
        self.retire(&worker).await?;
        Ok(Some(worker.id()))
    }

    async fn retire(&self, worker: &Worker) -> Result<(), CoordinatorError> {
        self.pool.remove(worker.id()).await;
        match self.claims.unregister_agent(worker.id()).await {
            Ok(_) | Err(CoordinatorError::AgentNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn cooling_down(&self) -> bool {
        let last = *self.last_scaled.lock().await;
        last.is_some_and(|at| self.clock.now() - at < self.config.cooldown())
    }

    async fn mark_scaled(&self) {
        *self.last_scaled.lock().await = Some(self.clock.now());
    }
}

/// Runs `ScaleManager::tick` every health-check interval.
pub struct ScaleLoop {
    scale: Arc<ScaleManager>,
    interval: std::time::Duration,
}

impl ScaleLoop {
    pub fn new(scale: Arc<ScaleManager>, interval: std::time::Duration) -> Self {
        Self { scale, interval }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
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
            match self.scale.tick().await {
                Ok(report) => debug!(
                    action = ?report.action,
                    workers = report.workers_after,
                    queue_depth = report.queue_depth,
                    restarted = report.restarted.len(),
                    "scale tick"
                ),
                Err(e) => error!(error = %e, kind = ?e.kind(), "scale tick failed"),
            }
        }
    }
}
