//! Domain model: ids, issues, agents, claims, outcomes, errors, and the
//! dependency graph.

pub mod agent;
pub mod claim;
pub mod errors;
pub mod graph;
pub mod ids;
pub mod issue;
pub mod outcome;

pub use agent::{Agent, AgentRegistration, AgentStatus};
pub use claim::{Claim, ReleaseReason};
pub use errors::{CoordinatorError, ErrorKind, StorageError};
pub use graph::{CycleError, DependencyGraph};
pub use ids::{AgentId, ClaimId, IssueId, OutcomeId};
pub use issue::{Dependency, DependencyKind, Issue, IssueStatus, NewIssue, Priority};
pub use outcome::{OutcomeKind, OutcomeRecord, OutcomeReport};
