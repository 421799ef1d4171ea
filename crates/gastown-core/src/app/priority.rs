//! PriorityCalculator - readiness and dependency-aware scoring.
//!
//! An issue is ready when it is open, nobody holds an active claim on it,
//! and every `blocks` dependency has a recorded success. Soft (`related`)
//! edges never gate readiness.
//!
//! score = priority_weight * priority.weight()
//!       + age_weight_per_day * min(age_days, max_age_days)
//!       + unblocks_weight * unblocks
//!
//! where `unblocks` counts open dependents for which this issue is the last
//! unfinished blocker.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::PriorityConfig;
use crate::domain::{Dependency, Issue, IssueId, IssueStatus, Priority, StorageError};
use crate::ports::{ClaimStore, Clock, IssueStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityScore {
    pub issue_id: IssueId,
    pub title: String,
    pub priority: Priority,
    pub score: f64,
    pub priority_component: f64,
    pub age_component: f64,
    pub unblocks_component: f64,
    pub unblocks: usize,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bottleneck {
    pub issue_id: IssueId,
    pub title: String,
    pub status: IssueStatus,
    /// Dependents that become ready once this issue succeeds.
    pub unblocks: usize,
    /// Every `blocks` dependent, ready or not.
    pub direct_dependents: usize,
    pub created_at: DateTime<Utc>,
}

pub struct PriorityCalculator {
    issues: Arc<dyn IssueStore>,
    claims: Arc<dyn ClaimStore>,
    clock: Arc<dyn Clock>,
    config: PriorityConfig,
}

impl PriorityCalculator {
    pub fn new(
        issues: Arc<dyn IssueStore>,
        claims: Arc<dyn ClaimStore>,
        clock: Arc<dyn Clock>,
        config: PriorityConfig,
    ) -> Self {
        Self {
            issues,
            claims,
            clock,
            config,
        }
    }

    /// Scores for every open, unclaimed issue, best first.
    pub async fn calculate_scores(&self) -> Result<Vec<PriorityScore>, StorageError> {
        let backlog = Backlog::load(self.issues.as_ref(), self.claims.as_ref()).await?;
        let now = self.clock.now();
        let mut scores: Vec<PriorityScore> = backlog
            .in_order()
            .filter(|issue| backlog.is_unclaimed_open(issue.id))
            .map(|issue| self.score(&backlog, issue, now))
            .collect();
        scores.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| backlog.created_at(a.issue_id).cmp(&backlog.created_at(b.issue_id)))
                .then_with(|| a.issue_id.cmp(&b.issue_id))
        });
        Ok(scores)
    }

    /// Ready issues in creation order.
    pub async fn get_ready_issues(&self) -> Result<Vec<Issue>, StorageError> {
        let backlog = Backlog::load(self.issues.as_ref(), self.claims.as_ref()).await?;
        Ok(backlog
            .in_order()
            .filter(|issue| backlog.is_ready(issue.id))
            .cloned()
            .collect())
    }

    /// Highest-scoring ready issue the caller can take, skipping `exclude`.
    pub async fn suggest_next_issue(
        &self,
        capabilities: &BTreeSet<String>,
        exclude: &HashSet<IssueId>,
    ) -> Result<Option<Issue>, StorageError> {
        let backlog = Backlog::load(self.issues.as_ref(), self.claims.as_ref()).await?;
        let now = self.clock.now();
        let best = backlog
            .in_order()
            .filter(|issue| !exclude.contains(&issue.id))
            .filter(|issue| backlog.is_ready(issue.id) && issue.accepts(capabilities))
            .map(|issue| (self.score(&backlog, issue, now).score, issue))
            .max_by(|(sa, a), (sb, b)| {
                sa.partial_cmp(sb)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| b.created_at.cmp(&a.created_at))
                    .then_with(|| b.id.cmp(&a.id))
            });
        if let Some((score, issue)) = &best {
            debug!(issue_id = %issue.id, score, "suggested next issue");
        }
        Ok(best.map(|(_, issue)| issue.clone()))
    }

    /// Non-terminal issues holding up the most work, regardless of readiness.
    pub async fn get_bottlenecks(&self, limit: usize) -> Result<Vec<Bottleneck>, StorageError> {
        let backlog = Backlog::load(self.issues.as_ref(), self.claims.as_ref()).await?;
        let mut bottlenecks: Vec<Bottleneck> = backlog
            .in_order()
            .filter(|issue| !issue.status.is_terminal())
            .map(|issue| Bottleneck {
                issue_id: issue.id,
                title: issue.title.clone(),
                status: issue.status,
                unblocks: backlog.unblocks(issue.id),
                direct_dependents: backlog.blocking_dependents(issue.id).count(),
                created_at: issue.created_at,
            })
            .collect();
        bottlenecks.sort_by(|a, b| {
            b.unblocks
                .cmp(&a.unblocks)
                .then(b.direct_dependents.cmp(&a.direct_dependents))
                .then(a.created_at.cmp(&b.created_at))
                .then(a.issue_id.cmp(&b.issue_id))
        });
        bottlenecks.truncate(limit);
        Ok(bottlenecks)
    }

    /// Number of ready issues.
    pub async fn queue_depth(&self) -> Result<usize, StorageError> {
        Ok(self.get_ready_issues().await?.len())
    }

    fn score(&self, backlog: &Backlog, issue: &Issue, now: DateTime<Utc>) -> PriorityScore {
        let c = &self.config;
        let age_days = ((now - issue.created_at).num_milliseconds().max(0) as f64) / 86_400_000.0;
        let unblocks = backlog.unblocks(issue.id);

        let priority_component = c.priority_weight * issue.priority.weight();
        let age_component = c.age_weight_per_day * age_days.min(c.max_age_days);
        let unblocks_component = c.unblocks_weight * unblocks as f64;

        PriorityScore {
            issue_id: issue.id,
            title: issue.title.clone(),
            priority: issue.priority,
            score: priority_component + age_component + unblocks_component,
            priority_component,
            age_component,
            unblocks_component,
            unblocks,
            ready: backlog.is_ready(issue.id),
        }
    }
}

/// Every `blocks` dependency of `id` has a recorded success.
pub(crate) async fn blockers_satisfied(
    store: &dyn IssueStore,
    id: IssueId,
) -> Result<bool, StorageError> {
    for dep in store.dependencies_of(id).await? {
        if dep.is_blocking() && !store.has_succeeded(dep.depends_on_id).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Open dependents of `id` whose blockers have all succeeded.
pub(crate) async fn unblocked_dependents(
    store: &dyn IssueStore,
    id: IssueId,
) -> Result<Vec<IssueId>, StorageError> {
    let mut ready = Vec::new();
    for dep in store.dependents_of(id).await? {
        if !dep.is_blocking() {
            continue;
        }
        let open = store
            .get_issue(dep.issue_id)
            .await?
            .is_some_and(|i| i.status == IssueStatus::Open);
        if open && blockers_satisfied(store, dep.issue_id).await? {
            ready.push(dep.issue_id);
        }
    }
    Ok(ready)
}

/// Point-in-time view of the backlog used for one scoring pass.
struct Backlog {
    order: Vec<IssueId>,
    issues: HashMap<IssueId, Issue>,
    succeeded: HashSet<IssueId>,
    claimed: HashSet<IssueId>,
    dependencies: HashMap<IssueId, Vec<Dependency>>,
    dependents: HashMap<IssueId, Vec<Dependency>>,
}

impl Backlog {
    async fn load(issues: &dyn IssueStore, claims: &dyn ClaimStore) -> Result<Self, StorageError> {
        let listed = issues.list_issues().await?;
        let succeeded = issues
            .list_outcomes()
            .await?
            .into_iter()
            .filter(|o| o.is_success())
            .map(|o| o.issue_id)
            .collect();
        let claimed = claims
            .active_claims()
            .await?
            .into_iter()
            .map(|c| c.issue_id)
            .collect();

        let mut backlog = Backlog {
            order: Vec::with_capacity(listed.len()),
            issues: HashMap::with_capacity(listed.len()),
            succeeded,
            claimed,
            dependencies: HashMap::new(),
            dependents: HashMap::new(),
        };
        for issue in listed {
            backlog
                .dependencies
                .insert(issue.id, issues.dependencies_of(issue.id).await?);
            backlog
                .dependents
                .insert(issue.id, issues.dependents_of(issue.id).await?);
            backlog.order.push(issue.id);
            backlog.issues.insert(issue.id, issue);
        }
        Ok(backlog)
    }

    fn in_order(&self) -> impl Iterator<Item = &Issue> {
        self.order.iter().filter_map(|id| self.issues.get(id))
    }

    fn created_at(&self, id: IssueId) -> Option<DateTime<Utc>> {
        self.issues.get(&id).map(|i| i.created_at)
    }

    fn is_unclaimed_open(&self, id: IssueId) -> bool {
        self.issues
            .get(&id)
            .is_some_and(|i| i.status == IssueStatus::Open)
            && !self.claimed.contains(&id)
    }

    fn blockers_done_except(&self, id: IssueId, except: Option<IssueId>) -> bool {
        self.dependencies
            .get(&id)
            .into_iter()
            .flatten()
            .filter(|d| d.is_blocking() && Some(d.depends_on_id) != except)
            .all(|d| self.succeeded.contains(&d.depends_on_id))
    }

    fn is_ready(&self, id: IssueId) -> bool {
        self.is_unclaimed_open(id) && self.blockers_done_except(id, None)
    }

    fn blocking_dependents(&self, id: IssueId) -> impl Iterator<Item = IssueId> + '_ {
        self.dependents
            .get(&id)
            .into_iter()
            .flatten()
            .filter(|d| d.is_blocking())
            .map(|d| d.issue_id)
    }

    fn unblocks(&self, id: IssueId) -> usize {
        self.blocking_dependents(id)
            .filter(|dependent| {
                self.issues
                    .get(dependent)
                    .is_some_and(|i| i.status == IssueStatus::Open)
                    && self.blockers_done_except(*dependent, Some(id))
            })
            .count()
    }
}
