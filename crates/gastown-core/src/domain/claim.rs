//! Claim: a time-bounded lease binding one agent to one issue.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AgentId, ClaimId, IssueId};

/// Why a claim stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// The owner gave the issue back.
    Released,
    /// Work finished and an outcome was recorded.
    Completed,
    /// Lease ran out without renewal.
    Expired,
    /// Owner was declared dead or unregistered.
    AgentGone,
    /// Local worker was restarted by the stall detector.
    Stalled,
    /// The issue itself was cancelled.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub issue_id: IssueId,
    pub agent_id: AgentId,
    pub active: bool,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_reason: Option<ReleaseReason>,
}

impl Claim {
    pub fn new(
        id: ClaimId,
        issue_id: IssueId,
        agent_id: AgentId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id,
            issue_id,
            agent_id,
            active: true,
            claimed_at: now,
            expires_at: now + ttl,
            released_at: None,
            release_reason: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at <= now
    }

    pub fn renew(&mut self, now: DateTime<Utc>, ttl: Duration) {
        if self.active {
            self.expires_at = now + ttl;
        }
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>, reason: ReleaseReason) {
        self.active = false;
        self.released_at = Some(now);
        self.release_reason = Some(reason);
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.claimed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_inclusive_and_only_for_active_claims() {
        let now = Utc::now();
        let mut claim = Claim::new(
            ClaimId::random(),
            IssueId::random(),
            AgentId::random(),
            now,
            Duration::milliseconds(1_000),
        );
        assert!(!claim.is_expired(now));
        assert!(claim.is_expired(now + Duration::milliseconds(1_000)));

        claim.deactivate(now, ReleaseReason::Released);
        assert!(!claim.is_expired(now + Duration::seconds(10)));
    }

    #[test]
    fn renew_pushes_expiry_forward() {
        let now = Utc::now();
        let ttl = Duration::seconds(60);
        let mut claim = Claim::new(ClaimId::random(), IssueId::random(), AgentId::random(), now, ttl);
        let later = now + Duration::seconds(45);
        claim.renew(later, ttl);
        assert_eq!(claim.expires_at, later + ttl);
    }
}
