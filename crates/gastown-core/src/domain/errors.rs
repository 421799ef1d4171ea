//! Errors and their operational classification.
//!
//! A lost claim race is not an error; it comes back as
//! `ClaimOutcome::AlreadyClaimed`.

use thiserror::Error;

use super::ids::{AgentId, ClaimId, IssueId};

/// Operational classification of a failure.
///
/// - NotFound: caller decides whether to retry or abandon
/// - Ownership: caller tried to act on somebody else's claim
/// - Execution: a unit of work failed; per issue, never cascades
/// - Storage: backing store failed; fatal to the calling operation
/// - Configuration: rejected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Ownership,
    Execution,
    Storage,
    Configuration,
}

/// Failure of a storage backend.
///
/// Never swallowed: continuing after a failed write could break the
/// one-active-claim-per-issue guarantee.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("record not found: {0}")]
    Missing(String),
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("issue not found: {0}")]
    IssueNotFound(IssueId),

    #[error("claim not found: {0}")]
    ClaimNotFound(ClaimId),

    #[error("claim {claim_id} is not owned by {agent_id}")]
    NotClaimOwner { claim_id: ClaimId, agent_id: AgentId },

    #[error("claim {0} is no longer active")]
    ClaimInactive(ClaimId),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinatorError::AgentNotFound(_)
            | CoordinatorError::IssueNotFound(_)
            | CoordinatorError::ClaimNotFound(_) => ErrorKind::NotFound,
            CoordinatorError::NotClaimOwner { .. } | CoordinatorError::ClaimInactive(_) => {
                ErrorKind::Ownership
            }
            CoordinatorError::Storage(_) => ErrorKind::Storage,
        }
    }
}
