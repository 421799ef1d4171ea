//! ExperienceLedger - per-agent assignment and outcome history.
//!
//! Owned by a `Router` instance. Feeds the recency factor (last assignment
//! time) and the experience factor (success tallies per capability and per
//! label, plus the overall success rate).

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::{AgentId, Issue, OutcomeKind};

/// Experience score for an agent with no recorded outcomes.
pub const NEUTRAL_EXPERIENCE: f64 = 0.5;

#[derive(Debug, Default, Clone)]
struct AgentHistory {
    last_assigned: Option<DateTime<Utc>>,
    successes: u32,
    failures: u32,
    by_capability: HashMap<String, u32>,
    by_label: HashMap<String, u32>,
}

#[derive(Debug, Default)]
pub struct ExperienceLedger {
    agents: HashMap<AgentId, AgentHistory>,
}

impl ExperienceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_assignment(&mut self, agent_id: AgentId, at: DateTime<Utc>) {
        self.agents.entry(agent_id).or_default().last_assigned = Some(at);
    }

    /// Tally an outcome. Only successes count toward capability and label
    /// experience; failures only lower the overall rate.
    pub fn record_outcome(&mut self, agent_id: AgentId, kind: OutcomeKind, issue: &Issue) {
        let history = self.agents.entry(agent_id).or_default();
        if !kind.is_success() {
            history.failures += 1;
            return;
        }
        history.successes += 1;
        for cap in &issue.capabilities {
            *history.by_capability.entry(cap.clone()).or_default() += 1;
        }
        for label in &issue.labels {
            *history.by_label.entry(label.clone()).or_default() += 1;
        }
    }

    pub fn last_assigned(&self, agent_id: AgentId) -> Option<DateTime<Utc>> {
        self.agents.get(&agent_id).and_then(|h| h.last_assigned)
    }

    /// Experience of `agent_id` for `issue`, in [0, 1].
    ///
    /// Averages the applicable dimensions: mean capped capability tally (if
    /// the issue requires capabilities), mean capped label tally (if it has
    /// labels), and overall success rate. `cap` successes make a tally full.
    pub fn experience(&self, agent_id: AgentId, issue: &Issue, cap: u32) -> f64 {
        let Some(history) = self.agents.get(&agent_id) else {
            return NEUTRAL_EXPERIENCE;
        };
        let total = history.successes + history.failures;
        if total == 0 {
            return NEUTRAL_EXPERIENCE;
        }

        let cap = cap.max(1) as f64;
        let mut dims = vec![history.successes as f64 / total as f64];
        dims.extend(mean_tally(&history.by_capability, issue.capabilities.iter(), cap));
        dims.extend(mean_tally(&history.by_label, issue.labels.iter(), cap));
        dims.iter().sum::<f64>() / dims.len() as f64
    }

    /// Recorded failures for `agent_id`.
    pub fn failures(&self, agent_id: AgentId) -> u32 {
        self.agents.get(&agent_id).map_or(0, |h| h.failures)
    }
}

fn mean_tally<'a>(
    counts: &HashMap<String, u32>,
    keys: impl Iterator<Item = &'a String>,
    cap: f64,
) -> Option<f64> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for key in keys {
        sum += (counts.get(key).copied().unwrap_or(0) as f64).min(cap) / cap;
        n += 1;
    }
    (n > 0).then(|| sum / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IssueId, NewIssue};

    fn issue(caps: &[&str], labels: &[&str]) -> Issue {
        let mut new = NewIssue::new("t");
        for c in caps {
            new = new.with_capability(*c);
        }
        for l in labels {
            new = new.with_label(*l);
        }
        new.into_issue(IssueId::random(), Utc::now())
    }

    #[test]
    fn unknown_agent_is_neutral() {
        let ledger = ExperienceLedger::new();
        assert_eq!(
            ledger.experience(AgentId::random(), &issue(&["rust"], &[]), 5),
            NEUTRAL_EXPERIENCE
        );
    }

    #[test]
    fn assignment_alone_stays_neutral() {
        let mut ledger = ExperienceLedger::new();
        let a = AgentId::random();
        ledger.record_assignment(a, Utc::now());
        assert!(ledger.last_assigned(a).is_some());
        assert_eq!(ledger.experience(a, &issue(&[], &[]), 5), NEUTRAL_EXPERIENCE);
    }

    #[test]
    fn tallies_saturate_at_cap() {
        let mut ledger = ExperienceLedger::new();
        let a = AgentId::random();
        let rust = issue(&["rust"], &["backend"]);
        for _ in 0..9 {
            ledger.record_outcome(a, OutcomeKind::Success, &rust);
        }
        assert!((ledger.experience(a, &rust, 5) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unrelated_capability_scores_lower() {
        let mut ledger = ExperienceLedger::new();
        let a = AgentId::random();
        ledger.record_outcome(a, OutcomeKind::Success, &issue(&["rust"], &[]));

        let same = ledger.experience(a, &issue(&["rust"], &[]), 5);
        let other = ledger.experience(a, &issue(&["go"], &[]), 5);
        assert!(same > other);
        // success rate 1.0, go tally 0.0
        assert!((other - 0.5).abs() < 1e-9);
    }

    #[test]
    fn failures_lower_the_rate() {
        let mut ledger = ExperienceLedger::new();
        let a = AgentId::random();
        let plain = issue(&[], &[]);
        ledger.record_outcome(a, OutcomeKind::Success, &plain);
        ledger.record_outcome(a, OutcomeKind::Failure, &plain);
        ledger.record_outcome(a, OutcomeKind::Failure, &plain);
        assert!((ledger.experience(a, &plain, 5) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(ledger.failures(a), 2);
    }
}
