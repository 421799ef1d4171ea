//! Issue model: the schedulable unit of work and its dependency edges.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::IssueId;

/// Issue lifecycle.
///
/// - Open -> Claimed -> Closed (success)
/// - Open -> Claimed -> Open (failure, lease expiry, release)
/// - Open | Claimed -> Cancelled
///
/// Issues are never deleted; they only change status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Claimed,
    Cancelled,
    Closed,
}

impl IssueStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, IssueStatus::Cancelled | IssueStatus::Closed)
    }
}

/// Explicit priority assigned by the producer.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Backlog,
}

impl Priority {
    /// Normalized weight in [0, 1], Critical highest.
    pub fn weight(self) -> f64 {
        match self {
            Priority::Critical => 1.0,
            Priority::High => 0.75,
            Priority::Medium => 0.5,
            Priority::Low => 0.25,
            Priority::Backlog => 0.0,
        }
    }
}

/// A unit of work in the backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub title: String,
    pub status: IssueStatus,

    /// Capabilities an agent needs to work on this issue. Empty = anyone.
    pub capabilities: BTreeSet<String>,

    /// Free-form labels, used for experience tracking.
    pub labels: BTreeSet<String>,

    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    pub fn requires_capabilities(&self) -> bool {
        !self.capabilities.is_empty()
    }

    /// Whether an agent holding `capabilities` may pick this issue up.
    ///
    /// Issues with no requirements accept anyone; otherwise at least one
    /// required capability must be present.
    pub fn accepts(&self, capabilities: &BTreeSet<String>) -> bool {
        !self.requires_capabilities()
            || self.capabilities.iter().any(|c| capabilities.contains(c))
    }
}

/// Producer-side description of a new issue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewIssue {
    pub title: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl NewIssue {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn into_issue(self, id: IssueId, now: DateTime<Utc>) -> Issue {
        Issue {
            id,
            title: self.title,
            status: IssueStatus::Open,
            capabilities: self.capabilities,
            labels: self.labels,
            priority: self.priority,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Dependency edge semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Hard edge: the dependent is not ready until the dependency succeeded.
    Blocks,
    /// Soft edge: informational, never gates readiness.
    Related,
}

/// `issue_id` depends on `depends_on_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub issue_id: IssueId,
    pub depends_on_id: IssueId,
    pub kind: DependencyKind,
}

impl Dependency {
    pub fn blocks(issue_id: IssueId, depends_on_id: IssueId) -> Self {
        Self {
            issue_id,
            depends_on_id,
            kind: DependencyKind::Blocks,
        }
    }

    pub fn related(issue_id: IssueId, depends_on_id: IssueId) -> Self {
        Self {
            issue_id,
            depends_on_id,
            kind: DependencyKind::Related,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.kind == DependencyKind::Blocks
    }
}
