//! IssueStore port - the work-item graph and recorded outcomes.
//!
//! Implementable over SQL, a document store, or memory. Every mutation touches
//! a single issue, edge, or outcome; callers never need a cross-entity
//! transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Dependency, Issue, IssueId, IssueStatus, OutcomeRecord, StorageError,
};

#[async_trait]
pub trait IssueStore: Send + Sync {
    async fn create_issue(&self, issue: Issue) -> Result<(), StorageError>;

    async fn get_issue(&self, id: IssueId) -> Result<Option<Issue>, StorageError>;

    /// Set the status and return the updated issue, or `None` if it does not exist.
    async fn update_status(
        &self,
        id: IssueId,
        status: IssueStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Issue>, StorageError>;

    /// Conditional status write: only applies when the current status is
    /// `expected`. Returns whether the write happened.
    async fn transition_status(
        &self,
        id: IssueId,
        expected: IssueStatus,
        next: IssueStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    async fn list_issues(&self) -> Result<Vec<Issue>, StorageError>;

    /// Add an edge. Implementations must reject unknown endpoints and edges
    /// that would close a cycle (`StorageError::Constraint`).
    async fn add_dependency(&self, dependency: Dependency) -> Result<(), StorageError>;

    /// What `id` waits for.
    async fn dependencies_of(&self, id: IssueId) -> Result<Vec<Dependency>, StorageError>;

    /// Who waits for `id`.
    async fn dependents_of(&self, id: IssueId) -> Result<Vec<Dependency>, StorageError>;

    async fn record_outcome(&self, outcome: OutcomeRecord) -> Result<(), StorageError>;

    /// All outcomes for an issue, oldest first.
    async fn outcomes_for(&self, id: IssueId) -> Result<Vec<OutcomeRecord>, StorageError>;

    /// Every outcome, oldest first.
    async fn list_outcomes(&self) -> Result<Vec<OutcomeRecord>, StorageError>;

    /// Whether `id` has at least one successful outcome.
    async fn has_succeeded(&self, id: IssueId) -> Result<bool, StorageError> {
        Ok(self.outcomes_for(id).await?.iter().any(|o| o.is_success()))
    }
}
