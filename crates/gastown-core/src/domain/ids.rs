//! Domain identifiers (strongly-typed IDs).
//!
//! All identifiers are ULIDs wrapped in a phantom-typed `Id<T>`:
//! - sortable by creation time (the timestamp is the leading 48 bits)
//! - generated without coordination, so separate agent processes can mint them
//! - `IssueId` and `AgentId` are distinct types and cannot be mixed up
//!
//! The textual form is `<prefix><ulid>`, e.g. `issue-01HV...`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for each id family. Supplies the display prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic id type. `T` only exists at compile time.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh id from the process-local ULID source.
    ///
    /// Production code goes through `IdGenerator` so the timestamp follows the
    /// injected clock; this is for tests and ad-hoc tooling.
    pub fn random() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when an id string does not match `<prefix><ulid>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id '{input}': expected '{prefix}<ulid>'")]
pub struct ParseIdError {
    input: String,
    prefix: &'static str,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    /// Accepts both the prefixed form and a bare ULID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|_| ParseIdError {
                input: s.to_string(),
                prefix: T::prefix(),
            })
    }
}

// ========================================
// Markers
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Issue {}

impl IdMarker for Issue {
    fn prefix() -> &'static str {
        "issue-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Agent {}

impl IdMarker for Agent {
    fn prefix() -> &'static str {
        "agent-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Claim {}

impl IdMarker for Claim {
    fn prefix() -> &'static str {
        "claim-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Outcome {}

impl IdMarker for Outcome {
    fn prefix() -> &'static str {
        "outcome-"
    }
}

/// Identifier of an issue (schedulable unit of work).
pub type IssueId = Id<Issue>;

/// Identifier of an agent. Local workers reuse their agent's id.
pub type AgentId = Id<Agent>;

/// Identifier of a claim (one lease of one issue by one agent).
pub type ClaimId = Id<Claim>;

/// Identifier of a recorded outcome.
pub type OutcomeId = Id<Outcome>;
