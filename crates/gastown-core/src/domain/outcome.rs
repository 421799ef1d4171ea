//! Outcome model: what happened when a claim was completed.
//!
//! Exactly one `OutcomeRecord` is written per completed claim, and it always
//! carries the claim's own issue/agent pairing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::claim::Claim;
use super::ids::{AgentId, ClaimId, IssueId, OutcomeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Failure,
}

impl OutcomeKind {
    pub fn is_success(self) -> bool {
        self == OutcomeKind::Success
    }
}

/// What an agent reports back when it finishes a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub kind: OutcomeKind,
    #[serde(default)]
    pub summary: String,
}

impl OutcomeReport {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Success,
            summary: summary.into(),
        }
    }

    pub fn failure(summary: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            summary: summary.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub id: OutcomeId,
    pub issue_id: IssueId,
    pub claim_id: ClaimId,
    pub agent_id: AgentId,
    pub kind: OutcomeKind,
    pub summary: String,
    pub completed_at: DateTime<Utc>,

    /// Time between claim and completion.
    pub duration_ms: u64,
}

impl OutcomeRecord {
    /// Build the record from the claim being completed, so the issue/agent
    /// pairing can never be fabricated.
    pub fn for_claim(
        id: OutcomeId,
        claim: &Claim,
        report: OutcomeReport,
        now: DateTime<Utc>,
    ) -> Self {
        let duration_ms = claim.age(now).num_milliseconds().max(0) as u64;
        Self {
            id,
            issue_id: claim.issue_id,
            claim_id: claim.id,
            agent_id: claim.agent_id,
            kind: report.kind,
            summary: report.summary,
            completed_at: now,
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind.is_success()
    }
}
