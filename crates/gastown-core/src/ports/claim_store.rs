//! ClaimStore port - agents and claims.
//!
//! `try_claim` is the one place mutual exclusion is enforced. A SQL backend
//! implements it as an insert guarded by a partial unique index on
//! `(issue_id) WHERE active`; the in-memory backend does the check-and-insert
//! under a single lock. Either way, two concurrent callers for the same issue
//! can never both get `ClaimAttempt::Created`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::{
    Agent, AgentId, AgentStatus, Claim, ClaimId, IssueId, ReleaseReason, StorageError,
};

/// Result of the atomic conditional claim write.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimAttempt {
    Created(Claim),
    /// Another active claim already holds the issue.
    IssueTaken { holder: AgentId },
    /// The agent already holds `max_concurrent` active claims.
    AgentAtCapacity,
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Insert or replace the agent record.
    async fn upsert_agent(&self, agent: Agent) -> Result<(), StorageError>;

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, StorageError>;

    /// Agents in registration order (then by id).
    async fn list_agents(&self, status: Option<AgentStatus>) -> Result<Vec<Agent>, StorageError>;

    async fn set_agent_status(
        &self,
        id: AgentId,
        status: AgentStatus,
    ) -> Result<Option<Agent>, StorageError>;

    /// Record a heartbeat and renew the agent's active leases to `at + ttl`.
    async fn touch_agent(
        &self,
        id: AgentId,
        at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Option<Agent>, StorageError>;

    /// Atomically create `claim` iff the issue has no active claim and the
    /// agent is below `max_concurrent`.
    async fn try_claim(&self, claim: Claim, max_concurrent: u32)
    -> Result<ClaimAttempt, StorageError>;

    async fn get_claim(&self, id: ClaimId) -> Result<Option<Claim>, StorageError>;

    /// Deactivate an active claim. Returns the deactivated claim, or `None`
    /// if it was missing or already inactive (so releasing twice is a no-op).
    async fn deactivate_claim(
        &self,
        id: ClaimId,
        at: DateTime<Utc>,
        reason: ReleaseReason,
    ) -> Result<Option<Claim>, StorageError>;

    /// Active and historical claims of one agent, oldest first.
    async fn claims_by_agent(&self, agent_id: AgentId) -> Result<Vec<Claim>, StorageError>;

    async fn claims_by_issue(&self, issue_id: IssueId) -> Result<Vec<Claim>, StorageError>;

    async fn active_claims(&self) -> Result<Vec<Claim>, StorageError>;

    async fn active_claim_for_issue(
        &self,
        issue_id: IssueId,
    ) -> Result<Option<Claim>, StorageError> {
        Ok(self
            .claims_by_issue(issue_id)
            .await?
            .into_iter()
            .find(|c| c.active))
    }
}
