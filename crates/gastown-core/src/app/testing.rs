//! Shared wiring for app-layer unit tests.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use crate::app::claims::ClaimsManager;
use crate::config::CoordinatorConfig;
use crate::domain::{
    AgentId, Claim, Dependency, Issue, IssueId, IssueStatus, NewIssue, OutcomeRecord,
    OutcomeReport,
};
use crate::impls::{InMemoryClaimStore, InMemoryIssueStore};
use crate::ports::{Clock, FixedClock, IdGenerator, IssueStore, UlidGenerator};

pub(crate) struct Fixture {
    pub issues: Arc<InMemoryIssueStore>,
    pub claims: Arc<InMemoryClaimStore>,
    pub clock: Arc<FixedClock>,
    pub ids: Arc<UlidGenerator>,
    pub config: CoordinatorConfig,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    pub fn with_config(config: CoordinatorConfig) -> Self {
        let start = Utc
            .with_ymd_and_hms(2025, 1, 6, 9, 0, 0)
            .single()
            .expect("valid start time");
        let clock = Arc::new(FixedClock::new(start));
        Self {
            issues: Arc::new(InMemoryIssueStore::new()),
            claims: Arc::new(InMemoryClaimStore::new()),
            ids: Arc::new(UlidGenerator::new(clock.clone())),
            clock,
            config,
        }
    }

    pub fn claims_manager(&self) -> ClaimsManager {
        ClaimsManager::new(
            self.issues.clone(),
            self.claims.clone(),
            self.clock.clone(),
            self.ids.clone(),
            self.config.claims.clone(),
        )
    }

    /// Creates issues one second apart so creation order is unambiguous.
    pub async fn issue(&self, new: NewIssue) -> Issue {
        self.clock.advance(chrono::Duration::seconds(1));
        let issue = new.into_issue(self.ids.issue_id(), self.clock.now());
        self.issues.create_issue(issue.clone()).await.unwrap();
        issue
    }

    /// `issue` cannot start until `on` succeeded.
    pub async fn blocks(&self, issue: IssueId, on: IssueId) {
        self.issues
            .add_dependency(Dependency::blocks(issue, on))
            .await
            .unwrap();
    }

    pub async fn status(&self, id: IssueId) -> IssueStatus {
        self.issues.get_issue(id).await.unwrap().unwrap().status
    }

    /// Record a success for `id` and close it, as a completed claim would.
    pub async fn succeed(&self, id: IssueId) {
        self.finish(id, OutcomeReport::success("done")).await;
        self.issues
            .update_status(id, IssueStatus::Closed, self.clock.now())
            .await
            .unwrap();
    }

    pub async fn fail(&self, id: IssueId) {
        self.finish(id, OutcomeReport::failure("boom")).await;
    }

    async fn finish(&self, id: IssueId, report: OutcomeReport) {
        let now = self.clock.now();
        let claim = Claim::new(
            self.ids.claim_id(),
            id,
            AgentId::random(),
            now,
            self.config.claims.claim_ttl(),
        );
        let record = OutcomeRecord::for_claim(self.ids.outcome_id(), &claim, report, now);
        self.issues.record_outcome(record).await.unwrap();
    }
}
