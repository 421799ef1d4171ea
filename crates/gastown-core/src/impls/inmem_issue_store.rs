//! InMemoryIssueStore - reference issue store for tests and single-process runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Dependency, DependencyGraph, Issue, IssueId, IssueStatus, OutcomeRecord, StorageError,
};
use crate::ports::IssueStore;

#[derive(Default)]
struct IssueState {
    /// Single source of truth for issues.
    issues: HashMap<IssueId, Issue>,

    /// Insertion order, so listings are stable.
    order: Vec<IssueId>,

    graph: DependencyGraph,

    /// Outcomes per issue, oldest first.
    outcomes: HashMap<IssueId, Vec<OutcomeRecord>>,

    /// Every outcome in completion order.
    outcome_log: Vec<OutcomeRecord>,
}

#[derive(Default)]
pub struct InMemoryIssueStore {
    state: Mutex<IssueState>,
}

impl InMemoryIssueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IssueStore for InMemoryIssueStore {
    async fn create_issue(&self, issue: Issue) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if state.issues.contains_key(&issue.id) {
            return Err(StorageError::Constraint(format!(
                "issue {} already exists",
                issue.id
            )));
        }
        state.order.push(issue.id);
        state.issues.insert(issue.id, issue);
        Ok(())
    }

    async fn get_issue(&self, id: IssueId) -> Result<Option<Issue>, StorageError> {
        Ok(self.state.lock().await.issues.get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: IssueId,
        status: IssueStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Issue>, StorageError> {
        let mut state = self.state.lock().await;
        Ok(state.issues.get_mut(&id).map(|issue| {
            issue.status = status;
            issue.updated_at = at;
            issue.clone()
        }))
    }

    async fn transition_status(
        &self,
        id: IssueId,
        expected: IssueStatus,
        next: IssueStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;
        match state.issues.get_mut(&id) {
            Some(issue) if issue.status == expected => {
                issue.status = next;
                issue.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_issues(&self) -> Result<Vec<Issue>, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.issues.get(id).cloned())
            .collect())
    }

    async fn add_dependency(&self, dependency: Dependency) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        for endpoint in [dependency.issue_id, dependency.depends_on_id] {
            if !state.issues.contains_key(&endpoint) {
                return Err(StorageError::Missing(format!("issue {endpoint}")));
            }
        }
        state.graph.add_dependency(dependency).map_err(|cycle| {
            let path: Vec<String> = cycle.path.iter().map(ToString::to_string).collect();
            StorageError::Constraint(format!("dependency cycle: {}", path.join(" -> ")))
        })
    }

    async fn dependencies_of(&self, id: IssueId) -> Result<Vec<Dependency>, StorageError> {
        Ok(self.state.lock().await.graph.dependencies(id))
    }

    async fn dependents_of(&self, id: IssueId) -> Result<Vec<Dependency>, StorageError> {
        Ok(self.state.lock().await.graph.dependents(id))
    }

    async fn record_outcome(&self, outcome: OutcomeRecord) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if !state.issues.contains_key(&outcome.issue_id) {
            return Err(StorageError::Missing(format!("issue {}", outcome.issue_id)));
        }
        let per_issue = state.outcomes.entry(outcome.issue_id).or_default();
        if per_issue.iter().any(|o| o.claim_id == outcome.claim_id) {
            return Err(StorageError::Constraint(format!(
                "outcome for claim {} already recorded",
                outcome.claim_id
            )));
        }
        per_issue.push(outcome.clone());
        state.outcome_log.push(outcome);
        Ok(())
    }

    async fn outcomes_for(&self, id: IssueId) -> Result<Vec<OutcomeRecord>, StorageError> {
        Ok(self
            .state
            .lock()
            .await
            .outcomes
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_outcomes(&self) -> Result<Vec<OutcomeRecord>, StorageError> {
        Ok(self.state.lock().await.outcome_log.clone())
    }
}
