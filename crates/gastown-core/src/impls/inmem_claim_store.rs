//! InMemoryClaimStore - reference claim store.
//!
//! The whole state sits behind one tokio `Mutex`, so `try_claim` checks and
//! inserts inside a single critical section. That is the in-memory
//! equivalent of a unique index on active claims.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Agent, AgentId, AgentStatus, Claim, ClaimId, IssueId, ReleaseReason, StorageError,
};
use crate::ports::{ClaimAttempt, ClaimStore};

#[derive(Default)]
struct ClaimState {
    agents: HashMap<AgentId, Agent>,

    claims: HashMap<ClaimId, Claim>,

    /// issue -> its single active claim
    active_by_issue: HashMap<IssueId, ClaimId>,

    /// Claim ids in creation order, for stable listings.
    claim_order: Vec<ClaimId>,
}

impl ClaimState {
    fn active_count(&self, agent_id: AgentId) -> u32 {
        self.active_by_issue
            .values()
            .filter_map(|id| self.claims.get(id))
            .filter(|c| c.agent_id == agent_id)
            .count() as u32
    }

    fn claims_where(&self, pred: impl Fn(&Claim) -> bool) -> Vec<Claim> {
        self.claim_order
            .iter()
            .filter_map(|id| self.claims.get(id))
            .filter(|&c| pred(c))
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub struct InMemoryClaimStore {
    state: Mutex<ClaimState>,
}

impl InMemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    async fn upsert_agent(&self, agent: Agent) -> Result<(), StorageError> {
        self.state.lock().await.agents.insert(agent.id, agent);
        Ok(())
    }

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, StorageError> {
        Ok(self.state.lock().await.agents.get(&id).cloned())
    }

    async fn list_agents(&self, status: Option<AgentStatus>) -> Result<Vec<Agent>, StorageError> {
        let state = self.state.lock().await;
        let mut agents: Vec<Agent> = state
            .agents
            .values()
            .filter(|a| status.is_none_or(|s| a.status == s))
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)));
        Ok(agents)
    }

    async fn set_agent_status(
        &self,
        id: AgentId,
        status: AgentStatus,
    ) -> Result<Option<Agent>, StorageError> {
        let mut state = self.state.lock().await;
        Ok(state.agents.get_mut(&id).map(|agent| {
            agent.status = status;
            agent.clone()
        }))
    }

    async fn touch_agent(
        &self,
        id: AgentId,
        at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Option<Agent>, StorageError> {
        let mut state = self.state.lock().await;
        let Some(agent) = state.agents.get_mut(&id) else {
            return Ok(None);
        };
        agent.last_heartbeat = at;
        let agent = agent.clone();

        let ClaimState {
            claims,
            active_by_issue,
            ..
        } = &mut *state;
        for claim_id in active_by_issue.values() {
            if let Some(claim) = claims.get_mut(claim_id)
                && claim.agent_id == id
            {
                claim.renew(at, ttl);
            }
        }
        Ok(Some(agent))
    }

    async fn try_claim(
        &self,
        claim: Claim,
        max_concurrent: u32,
    ) -> Result<ClaimAttempt, StorageError> {
        let mut state = self.state.lock().await;

        if let Some(holder) = state
            .active_by_issue
            .get(&claim.issue_id)
            .and_then(|id| state.claims.get(id))
            .map(|c| c.agent_id)
        {
            return Ok(ClaimAttempt::IssueTaken { holder });
        }
        if state.active_count(claim.agent_id) >= max_concurrent {
            return Ok(ClaimAttempt::AgentAtCapacity);
        }

        state.active_by_issue.insert(claim.issue_id, claim.id);
        state.claim_order.push(claim.id);
        state.claims.insert(claim.id, claim.clone());
        Ok(ClaimAttempt::Created(claim))
    }

    async fn get_claim(&self, id: ClaimId) -> Result<Option<Claim>, StorageError> {
        Ok(self.state.lock().await.claims.get(&id).cloned())
    }

    async fn deactivate_claim(
        &self,
        id: ClaimId,
        at: DateTime<Utc>,
        reason: ReleaseReason,
    ) -> Result<Option<Claim>, StorageError> {
        let mut state = self.state.lock().await;
        let Some(claim) = state.claims.get_mut(&id) else {
            return Ok(None);
        };
        if !claim.active {
            return Ok(None);
        }
        claim.deactivate(at, reason);
        let claim = claim.clone();
        if state.active_by_issue.get(&claim.issue_id) == Some(&id) {
            state.active_by_issue.remove(&claim.issue_id);
        }
        Ok(Some(claim))
    }

    async fn claims_by_agent(&self, agent_id: AgentId) -> Result<Vec<Claim>, StorageError> {
        Ok(self
            .state
            .lock()
            .await
            .claims_where(|c| c.agent_id == agent_id))
    }

    async fn claims_by_issue(&self, issue_id: IssueId) -> Result<Vec<Claim>, StorageError> {
        Ok(self
            .state
            .lock()
            .await
            .claims_where(|c| c.issue_id == issue_id))
    }

    async fn active_claims(&self) -> Result<Vec<Claim>, StorageError> {
        Ok(self.state.lock().await.claims_where(|c| c.active))
    }
}
