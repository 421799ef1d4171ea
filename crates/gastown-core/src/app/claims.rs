//! ClaimsManager - agent registry and claim lifecycle.
//!
//! Owns the link between claims and issue status: a created claim moves its
//! issue `open -> claimed`, and every way a claim ends (release, completion,
//! expiry, dead agent, stall restart, cancel) moves it out of `claimed`
//! again. Mutual exclusion itself is the claim store's job (`try_claim`).

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::priority::blockers_satisfied;
use crate::config::ClaimsConfig;
use crate::domain::{
    Agent, AgentId, AgentRegistration, AgentStatus, Claim, ClaimId, CoordinatorError, IssueId,
    IssueStatus, ReleaseReason,
};
use crate::ports::{ClaimAttempt, ClaimStore, Clock, IdGenerator, IssueStore};

/// Result of a claim attempt. Contention is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Claim),
    /// Someone else holds the issue.
    AlreadyClaimed { holder: Option<AgentId> },
    /// The agent already holds `max_concurrent` active claims.
    AgentAtCapacity,
    /// Issue is terminal, blocked, or the agent is inactive.
    NotClaimable,
}

impl ClaimOutcome {
    pub fn claim(&self) -> Option<&Claim> {
        match self {
            ClaimOutcome::Claimed(claim) => Some(claim),
            _ => None,
        }
    }
}

pub struct ClaimsManager {
    issues: Arc<dyn IssueStore>,
    claims: Arc<dyn ClaimStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: ClaimsConfig,
}

impl ClaimsManager {
    pub fn new(
        issues: Arc<dyn IssueStore>,
        claims: Arc<dyn ClaimStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: ClaimsConfig,
    ) -> Self {
        Self {
            issues,
            claims,
            clock,
            ids,
            config,
        }
    }

    pub fn config(&self) -> &ClaimsConfig {
        &self.config
    }

    /// Register a new agent, or refresh and reactivate an existing one when
    /// the registration carries a known id.
    pub async fn register_agent(
        &self,
        registration: AgentRegistration,
    ) -> Result<Agent, CoordinatorError> {
        let now = self.clock.now();
        let existing = match registration.id {
            Some(id) => self.claims.get_agent(id).await?,
            None => None,
        };

        let agent = match existing {
            Some(mut agent) => {
                agent.name = registration.name;
                agent.capabilities = registration.capabilities;
                if let Some(max) = registration.max_concurrent {
                    agent.max_concurrent = max;
                }
                agent.status = AgentStatus::Active;
                agent.last_heartbeat = now;
                agent
            }
            None => Agent {
                id: registration.id.unwrap_or_else(|| self.ids.agent_id()),
                name: registration.name,
                capabilities: registration.capabilities,
                max_concurrent: registration
                    .max_concurrent
                    .unwrap_or(self.config.default_max_concurrent),
                status: AgentStatus::Active,
                last_heartbeat: now,
                registered_at: now,
            },
        };

        self.claims.upsert_agent(agent.clone()).await?;
        info!(agent_id = %agent.id, name = %agent.name, max_concurrent = agent.max_concurrent, "agent registered");
        Ok(agent)
    }

    /// Mark the agent inactive and release every claim it holds.
    /// Returns the number of claims released.
    pub async fn unregister_agent(&self, agent_id: AgentId) -> Result<usize, CoordinatorError> {
        self.claims
            .set_agent_status(agent_id, AgentStatus::Inactive)
            .await?
            .ok_or(CoordinatorError::AgentNotFound(agent_id))?;
        let released = self
            .release_all_for_agent(agent_id, ReleaseReason::AgentGone)
            .await?;
        info!(agent_id = %agent_id, released, "agent unregistered");
        Ok(released)
    }

    /// Record liveness and renew the agent's leases. `None` if unknown.
    pub async fn heartbeat(&self, agent_id: AgentId) -> Result<Option<Agent>, CoordinatorError> {
        let agent = self
            .claims
            .touch_agent(agent_id, self.clock.now(), self.config.claim_ttl())
            .await?;
        if agent.is_none() {
            debug!(agent_id = %agent_id, "heartbeat from unknown agent");
        }
        Ok(agent)
    }

    pub async fn claim_issue(
        &self,
        agent_id: AgentId,
        issue_id: IssueId,
    ) -> Result<ClaimOutcome, CoordinatorError> {
        let agent = self
            .claims
            .get_agent(agent_id)
            .await?
            .ok_or(CoordinatorError::AgentNotFound(agent_id))?;
        if !agent.is_active() {
            return Ok(ClaimOutcome::NotClaimable);
        }

        let issue = self
            .issues
            .get_issue(issue_id)
            .await?
            .ok_or(CoordinatorError::IssueNotFound(issue_id))?;
        match issue.status {
            IssueStatus::Open => {}
            IssueStatus::Claimed => {
                let holder = self
                    .claims
                    .active_claim_for_issue(issue_id)
                    .await?
                    .map(|c| c.agent_id);
                return Ok(ClaimOutcome::AlreadyClaimed { holder });
            }
            IssueStatus::Cancelled | IssueStatus::Closed => return Ok(ClaimOutcome::NotClaimable),
        }
        if !blockers_satisfied(self.issues.as_ref(), issue_id).await? {
            return Ok(ClaimOutcome::NotClaimable);
        }

        let now = self.clock.now();
        let candidate = Claim::new(
            self.ids.claim_id(),
            issue_id,
            agent_id,
            now,
            self.config.claim_ttl(),
        );
        let claim = match self.claims.try_claim(candidate, agent.max_concurrent).await? {
            ClaimAttempt::Created(claim) => claim,
            ClaimAttempt::IssueTaken { holder } => {
                debug!(issue_id = %issue_id, agent_id = %agent_id, holder = %holder, "issue already claimed");
                return Ok(ClaimOutcome::AlreadyClaimed {
                    holder: Some(holder),
                });
            }
            ClaimAttempt::AgentAtCapacity => return Ok(ClaimOutcome::AgentAtCapacity),
        };

        let moved = self
            .issues
            .transition_status(issue_id, IssueStatus::Open, IssueStatus::Claimed, now)
            .await?;
        if !moved {
            // Issue left `open` (cancelled) between the read and the claim.
            self.claims
                .deactivate_claim(claim.id, now, ReleaseReason::Cancelled)
                .await?;
            return Ok(ClaimOutcome::NotClaimable);
        }

        info!(claim_id = %claim.id, issue_id = %issue_id, agent_id = %agent_id, "issue claimed");
        Ok(ClaimOutcome::Claimed(claim))
    }

    /// Release a claim held by `agent_id`. `false` when the claim is missing,
    /// owned by someone else, or already inactive.
    pub async fn release_claim(
        &self,
        claim_id: ClaimId,
        agent_id: AgentId,
    ) -> Result<bool, CoordinatorError> {
        match self.claims.get_claim(claim_id).await? {
            Some(claim) if claim.active && claim.agent_id == agent_id => Ok(self
                .end_claim(claim_id, ReleaseReason::Released, IssueStatus::Open)
                .await?
                .is_some()),
            _ => Ok(false),
        }
    }

    /// Deactivate a claim and move its issue from `claimed` to `next`.
    /// `None` if the claim was already inactive.
    pub(crate) async fn end_claim(
        &self,
        claim_id: ClaimId,
        reason: ReleaseReason,
        next: IssueStatus,
    ) -> Result<Option<Claim>, CoordinatorError> {
        let now = self.clock.now();
        let Some(claim) = self.claims.deactivate_claim(claim_id, now, reason).await? else {
            return Ok(None);
        };
        self.issues
            .transition_status(claim.issue_id, IssueStatus::Claimed, next, now)
            .await?;
        info!(claim_id = %claim.id, issue_id = %claim.issue_id, agent_id = %claim.agent_id, ?reason, "claim ended");
        Ok(Some(claim))
    }

    pub async fn get_claims_by_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<Vec<Claim>, CoordinatorError> {
        Ok(self.claims.claims_by_agent(agent_id).await?)
    }

    pub async fn active_claims_by_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<Vec<Claim>, CoordinatorError> {
        let mut claims = self.claims.claims_by_agent(agent_id).await?;
        claims.retain(|c| c.active);
        Ok(claims)
    }

    pub async fn active_claim_for_issue(
        &self,
        issue_id: IssueId,
    ) -> Result<Option<Claim>, CoordinatorError> {
        Ok(self.claims.active_claim_for_issue(issue_id).await?)
    }

    pub async fn get_claim(&self, claim_id: ClaimId) -> Result<Option<Claim>, CoordinatorError> {
        Ok(self.claims.get_claim(claim_id).await?)
    }

    pub async fn get_agent(&self, agent_id: AgentId) -> Result<Option<Agent>, CoordinatorError> {
        Ok(self.claims.get_agent(agent_id).await?)
    }

    pub async fn list_agents(
        &self,
        status: Option<AgentStatus>,
    ) -> Result<Vec<Agent>, CoordinatorError> {
        Ok(self.claims.list_agents(status).await?)
    }

    pub async fn active_claims(&self) -> Result<Vec<Claim>, CoordinatorError> {
        Ok(self.claims.active_claims().await?)
    }

    /// Release claims whose lease ran out. Returns how many were released.
    pub async fn cleanup_expired_claims(&self) -> Result<usize, CoordinatorError> {
        let now = self.clock.now();
        let mut released = 0;
        for claim in self.claims.active_claims().await? {
            if !claim.is_expired(now) {
                continue;
            }
            if self
                .end_claim(claim.id, ReleaseReason::Expired, IssueStatus::Open)
                .await?
                .is_some()
            {
                warn!(claim_id = %claim.id, issue_id = %claim.issue_id, agent_id = %claim.agent_id, "claim lease expired");
                released += 1;
            }
        }
        Ok(released)
    }

    /// Deactivate agents that stopped heartbeating and release their claims.
    pub async fn cleanup_dead_agents(&self) -> Result<Vec<AgentId>, CoordinatorError> {
        let now = self.clock.now();
        let timeout = self.config.dead_agent_timeout();
        let mut dead = Vec::new();
        for agent in self.claims.list_agents(Some(AgentStatus::Active)).await? {
            if now - agent.last_heartbeat <= timeout {
                continue;
            }
            self.claims
                .set_agent_status(agent.id, AgentStatus::Inactive)
                .await?;
            let released = self
                .release_all_for_agent(agent.id, ReleaseReason::AgentGone)
                .await?;
            warn!(agent_id = %agent.id, last_heartbeat = %agent.last_heartbeat, released, "agent considered dead");
            dead.push(agent.id);
        }
        Ok(dead)
    }

    async fn release_all_for_agent(
        &self,
        agent_id: AgentId,
        reason: ReleaseReason,
    ) -> Result<usize, CoordinatorError> {
        let mut released = 0;
        for claim in self.active_claims_by_agent(agent_id).await? {
            if self
                .end_claim(claim.id, reason, IssueStatus::Open)
                .await?
                .is_some()
            {
                released += 1;
            }
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::Fixture;
    use crate::domain::NewIssue;
    use chrono::Duration;

    #[tokio::test]
    async fn claim_moves_issue_to_claimed_and_release_reopens_it() {
        let fx = Fixture::new();
        let cm = fx.claims_manager();
        let agent = cm.register_agent(AgentRegistration::new("a")).await.unwrap();
        let issue = fx.issue(NewIssue::new("fix")).await;

        let outcome = cm.claim_issue(agent.id, issue.id).await.unwrap();
        let claim = outcome.claim().cloned().unwrap();
        assert_eq!(fx.status(issue.id).await, IssueStatus::Claimed);

        assert!(cm.release_claim(claim.id, agent.id).await.unwrap());
        assert_eq!(fx.status(issue.id).await, IssueStatus::Open);
        assert!(!cm.release_claim(claim.id, agent.id).await.unwrap());
    }

    #[tokio::test]
    async fn claiming_a_claimed_issue_reports_the_holder() {
        let fx = Fixture::new();
        let cm = fx.claims_manager();
        let a = cm.register_agent(AgentRegistration::new("a")).await.unwrap();
        let b = cm.register_agent(AgentRegistration::new("b")).await.unwrap();
        let issue = fx.issue(NewIssue::new("fix")).await;

        cm.claim_issue(a.id, issue.id).await.unwrap();
        let second = cm.claim_issue(b.id, issue.id).await.unwrap();
        assert_eq!(second, ClaimOutcome::AlreadyClaimed { holder: Some(a.id) });
    }

    #[tokio::test]
    async fn release_by_non_owner_is_refused() {
        let fx = Fixture::new();
        let cm = fx.claims_manager();
        let a = cm.register_agent(AgentRegistration::new("a")).await.unwrap();
        let b = cm.register_agent(AgentRegistration::new("b")).await.unwrap();
        let issue = fx.issue(NewIssue::new("fix")).await;
        let claim = cm.claim_issue(a.id, issue.id).await.unwrap().claim().cloned().unwrap();

        assert!(!cm.release_claim(claim.id, b.id).await.unwrap());
        assert_eq!(fx.status(issue.id).await, IssueStatus::Claimed);
    }

    #[tokio::test]
    async fn capacity_limits_concurrent_claims() {
        let fx = Fixture::new();
        let cm = fx.claims_manager();
        let a = cm
            .register_agent(AgentRegistration::new("a").with_max_concurrent(1))
            .await
            .unwrap();
        let first = fx.issue(NewIssue::new("one")).await;
        let second = fx.issue(NewIssue::new("two")).await;

        assert!(cm.claim_issue(a.id, first.id).await.unwrap().claim().is_some());
        assert_eq!(
            cm.claim_issue(a.id, second.id).await.unwrap(),
            ClaimOutcome::AgentAtCapacity
        );
        assert_eq!(fx.status(second.id).await, IssueStatus::Open);
    }

    #[tokio::test]
    async fn blocked_issue_is_not_claimable() {
        let fx = Fixture::new();
        let cm = fx.claims_manager();
        let a = cm.register_agent(AgentRegistration::new("a")).await.unwrap();
        let first = fx.issue(NewIssue::new("first")).await;
        let then = fx.issue(NewIssue::new("then")).await;
        fx.blocks(then.id, first.id).await;

        assert_eq!(
            cm.claim_issue(a.id, then.id).await.unwrap(),
            ClaimOutcome::NotClaimable
        );
    }

    #[tokio::test]
    async fn unknown_agent_is_a_typed_error() {
        let fx = Fixture::new();
        let cm = fx.claims_manager();
        let issue = fx.issue(NewIssue::new("fix")).await;
        let err = cm.claim_issue(AgentId::random(), issue.id).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn reregistering_with_id_refreshes_and_reactivates() {
        let fx = Fixture::new();
        let cm = fx.claims_manager();
        let a = cm
            .register_agent(AgentRegistration::new("a").with_max_concurrent(3))
            .await
            .unwrap();
        cm.unregister_agent(a.id).await.unwrap();

        let again = cm
            .register_agent(
                AgentRegistration::new("a2")
                    .with_id(a.id)
                    .with_capabilities(["rust"]),
            )
            .await
            .unwrap();
        assert_eq!(again.id, a.id);
        assert_eq!(again.name, "a2");
        assert_eq!(again.max_concurrent, 3);
        assert!(again.is_active());
        assert_eq!(again.registered_at, a.registered_at);
    }

    #[tokio::test]
    async fn unregister_releases_every_claim() {
        let fx = Fixture::new();
        let cm = fx.claims_manager();
        let a = cm
            .register_agent(AgentRegistration::new("a").with_max_concurrent(2))
            .await
            .unwrap();
        let one = fx.issue(NewIssue::new("one")).await;
        let two = fx.issue(NewIssue::new("two")).await;
        cm.claim_issue(a.id, one.id).await.unwrap();
        cm.claim_issue(a.id, two.id).await.unwrap();

        assert_eq!(cm.unregister_agent(a.id).await.unwrap(), 2);
        assert_eq!(fx.status(one.id).await, IssueStatus::Open);
        assert_eq!(fx.status(two.id).await, IssueStatus::Open);
        assert!(cm.active_claims().await.unwrap().is_empty());
        assert_eq!(cm.get_claims_by_agent(a.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn expired_claims_are_swept_and_issue_is_claimable_again() {
        let fx = Fixture::new();
        let cm = fx.claims_manager();
        let a = cm.register_agent(AgentRegistration::new("a")).await.unwrap();
        let b = cm.register_agent(AgentRegistration::new("b")).await.unwrap();
        let issue = fx.issue(NewIssue::new("fix")).await;
        cm.claim_issue(a.id, issue.id).await.unwrap();

        fx.clock.advance(Duration::milliseconds(cm.config().claim_ttl_ms as i64 + 1));
        assert_eq!(cm.cleanup_expired_claims().await.unwrap(), 1);
        assert_eq!(cm.cleanup_expired_claims().await.unwrap(), 0);

        assert!(cm.claim_issue(b.id, issue.id).await.unwrap().claim().is_some());
    }

    #[tokio::test]
    async fn heartbeat_keeps_the_lease_alive() {
        let fx = Fixture::new();
        let cm = fx.claims_manager();
        let a = cm.register_agent(AgentRegistration::new("a")).await.unwrap();
        let issue = fx.issue(NewIssue::new("fix")).await;
        cm.claim_issue(a.id, issue.id).await.unwrap();

        let step = Duration::milliseconds(cm.config().heartbeat_interval_ms as i64);
        for _ in 0..5 {
            fx.clock.advance(step);
            assert!(cm.heartbeat(a.id).await.unwrap().is_some());
        }
        assert_eq!(cm.cleanup_expired_claims().await.unwrap(), 0);
        assert!(cm.heartbeat(AgentId::random()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn silent_agents_are_reaped() {
        let fx = Fixture::new();
        let cm = fx.claims_manager();
        let quiet = cm.register_agent(AgentRegistration::new("quiet")).await.unwrap();
        let chatty = cm.register_agent(AgentRegistration::new("chatty")).await.unwrap();
        let issue = fx.issue(NewIssue::new("fix")).await;
        cm.claim_issue(quiet.id, issue.id).await.unwrap();

        fx.clock
            .advance(Duration::milliseconds(cm.config().dead_agent_timeout_ms as i64 + 1));
        cm.heartbeat(chatty.id).await.unwrap();

        assert_eq!(cm.cleanup_dead_agents().await.unwrap(), vec![quiet.id]);
        assert!(!cm.get_agent(quiet.id).await.unwrap().unwrap().is_active());
        assert_eq!(fx.status(issue.id).await, IssueStatus::Open);
    }
}
