//! Router - four-factor agent selection.
//!
//! Every active agent gets four factors in [0, 1]:
//! - capability: share of the issue's required capabilities the agent has
//!   (agents with none of them are excluded; 1.0 when nothing is required)
//! - workload: `1 - active / max_concurrent`
//! - recency: time since last assignment over the recency window, capped
//! - experience: see `ExperienceLedger::experience`
//!
//! The weighted sum picks the winner. Ties keep agent listing order
//! (registration time, then id).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::app::ledger::ExperienceLedger;
use crate::config::{RouterConfig, millis};
use crate::domain::{Agent, AgentId, AgentStatus, Issue, IssueId, OutcomeKind, StorageError};
use crate::ports::{ClaimStore, Clock};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FactorScores {
    pub capability: f64,
    pub workload: f64,
    pub recency: f64,
    pub experience: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub issue_id: IssueId,
    pub agent_id: AgentId,
    pub agent_name: String,
    pub score: f64,
    pub factors: FactorScores,
}

pub struct Router {
    claims: Arc<dyn ClaimStore>,
    clock: Arc<dyn Clock>,
    config: RouterConfig,
    ledger: Mutex<ExperienceLedger>,
}

impl Router {
    pub fn new(claims: Arc<dyn ClaimStore>, clock: Arc<dyn Clock>, config: RouterConfig) -> Self {
        Self {
            claims,
            clock,
            config,
            ledger: Mutex::new(ExperienceLedger::new()),
        }
    }

    /// Best-scoring active agent for `issue`, if any qualifies.
    pub async fn find_best_agent(&self, issue: &Issue) -> Result<Option<Assignment>, StorageError> {
        Ok(self.score_agents(issue).await?.into_iter().next())
    }

    /// Every qualifying agent with its factor breakdown, best first.
    pub async fn score_agents(&self, issue: &Issue) -> Result<Vec<Assignment>, StorageError> {
        let candidates = self.candidates().await?;
        Ok(self.rank(issue, &candidates, &HashSet::new()).await)
    }

    /// Greedy batch assignment: issues in priority order, each takes the best
    /// agent not yet used in this batch. Not a globally optimal matching.
    pub async fn find_assignments(&self, issues: &[Issue]) -> Result<Vec<Assignment>, StorageError> {
        let candidates = self.candidates().await?;
        let mut ordered: Vec<&Issue> = issues.iter().collect();
        ordered.sort_by(|a, b| {
            b.priority
                .weight()
                .partial_cmp(&a.priority.weight())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut used = HashSet::new();
        let mut assignments = Vec::new();
        for issue in ordered {
            if let Some(best) = self.rank(issue, &candidates, &used).await.into_iter().next() {
                used.insert(best.agent_id);
                assignments.push(best);
            }
        }
        Ok(assignments)
    }

    pub async fn record_assignment(&self, agent_id: AgentId) {
        let now = self.clock.now();
        self.ledger.lock().await.record_assignment(agent_id, now);
    }

    pub async fn record_outcome(&self, agent_id: AgentId, kind: OutcomeKind, issue: &Issue) {
        self.ledger.lock().await.record_outcome(agent_id, kind, issue);
    }

    /// Failures the ledger has seen for `agent_id`.
    pub async fn failures(&self, agent_id: AgentId) -> u32 {
        self.ledger.lock().await.failures(agent_id)
    }

    async fn candidates(&self) -> Result<Vec<(Agent, u32)>, StorageError> {
        let agents = self.claims.list_agents(Some(AgentStatus::Active)).await?;
        let mut active: HashMap<AgentId, u32> = HashMap::new();
        for claim in self.claims.active_claims().await? {
            *active.entry(claim.agent_id).or_default() += 1;
        }
        Ok(agents
            .into_iter()
            .map(|agent| {
                let load = active.get(&agent.id).copied().unwrap_or(0);
                (agent, load)
            })
            .collect())
    }

    async fn rank(
        &self,
        issue: &Issue,
        candidates: &[(Agent, u32)],
        skip: &HashSet<AgentId>,
    ) -> Vec<Assignment> {
        let now = self.clock.now();
        let window = millis(self.config.max_recency_window_ms);
        let w = self.config.weights;
        let ledger = self.ledger.lock().await;

        let mut ranked: Vec<Assignment> = candidates
            .iter()
            .filter(|(agent, _)| !skip.contains(&agent.id))
            .filter_map(|(agent, load)| {
                let capability = capability_factor(issue, agent)?;
                let factors = FactorScores {
                    capability,
                    workload: workload_factor(*load, agent.max_concurrent),
                    recency: recency_factor(ledger.last_assigned(agent.id), now, window),
                    experience: ledger.experience(agent.id, issue, self.config.experience_cap),
                };
                let score = w.capability * factors.capability
                    + w.workload * factors.workload
                    + w.recency * factors.recency
                    + w.experience * factors.experience;
                Some(Assignment {
                    issue_id: issue.id,
                    agent_id: agent.id,
                    agent_name: agent.name.clone(),
                    score,
                    factors,
                })
            })
            .collect();
        drop(ledger);

        // stable: equal scores keep listing order
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if let Some(best) = ranked.first() {
            debug!(issue_id = %issue.id, agent_id = %best.agent_id, score = best.score, candidates = ranked.len(), "routed issue");
        }
        ranked
    }
}

/// `None` excludes the agent.
pub fn capability_factor(issue: &Issue, agent: &Agent) -> Option<f64> {
    if !issue.requires_capabilities() {
        return Some(1.0);
    }
    let matched = issue
        .capabilities
        .intersection(&agent.capabilities)
        .count();
    (matched > 0).then(|| matched as f64 / issue.capabilities.len() as f64)
}

pub fn workload_factor(active: u32, max_concurrent: u32) -> f64 {
    if max_concurrent == 0 {
        return 0.0;
    }
    1.0 - f64::from(active.min(max_concurrent)) / f64::from(max_concurrent)
}

pub fn recency_factor(
    last_assigned: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> f64 {
    let Some(last) = last_assigned else {
        return 1.0;
    };
    let window_ms = window.num_milliseconds();
    if window_ms <= 0 {
        return 1.0;
    }
    let elapsed = (now - last).num_milliseconds().max(0);
    (elapsed as f64 / window_ms as f64).min(1.0)
}
