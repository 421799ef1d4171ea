//! IdGenerator port - id minting abstraction.
//!
//! `UlidGenerator` stamps ids with the injected clock, so ids minted under a
//! `FixedClock` share a deterministic timestamp prefix.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::ids::{AgentId, ClaimId, Id, IdMarker, IssueId, OutcomeId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn issue_id(&self) -> IssueId;
    fn agent_id(&self) -> AgentId;
    fn claim_id(&self) -> ClaimId;
    fn outcome_id(&self) -> OutcomeId;
}

pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn mint<T: IdMarker>(&self) -> Id<T> {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Id::from_ulid(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

impl IdGenerator for UlidGenerator {
    fn issue_id(&self) -> IssueId {
        self.mint()
    }

    fn agent_id(&self) -> AgentId {
        self.mint()
    }

    fn claim_id(&self) -> ClaimId {
        self.mint()
    }

    fn outcome_id(&self) -> OutcomeId {
        self.mint()
    }
}
