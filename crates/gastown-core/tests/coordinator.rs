use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use gastown_core::app::{Coordinator, CoordinatorBuilder, ScaleAction};
use gastown_core::config::CoordinatorConfig;
use gastown_core::domain::{AgentRegistration, Dependency, IssueStatus, NewIssue, OutcomeReport};
use gastown_core::ports::FixedClock;

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 3, 8, 0, 0).unwrap()))
}

fn build(config: CoordinatorConfig, clock: &Arc<FixedClock>) -> Arc<Coordinator> {
    CoordinatorBuilder::in_memory()
        .with_config(config)
        .with_clock(Arc::clone(clock) as _)
        .build()
        .unwrap()
}

fn caps() -> BTreeSet<String> {
    BTreeSet::new()
}

#[tokio::test]
async fn completing_a_blocker_releases_its_dependent() {
    let clock = clock();
    let c = build(CoordinatorConfig::default(), &clock);
    let agent = c.register_agent(AgentRegistration::new("mayor")).await.unwrap();
    let a = c.create_issue(NewIssue::new("schema")).await.unwrap();
    clock.advance(Duration::seconds(1));
    let b = c.create_issue(NewIssue::new("api")).await.unwrap();
    c.add_dependency(Dependency::blocks(b.id, a.id)).await.unwrap();

    let ready: Vec<_> = c.get_ready_issues().await.unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(ready, vec![a.id]);
    let top = c.get_bottlenecks(1).await.unwrap();
    assert_eq!(top[0].issue_id, a.id);
    assert_eq!(top[0].unblocks, 1);

    let grant = c.get_next_work(agent.id, &caps()).await.unwrap().unwrap();
    assert_eq!(grant.issue.id, a.id);
    let done = c
        .complete_work(grant.claim.id, agent.id, OutcomeReport::success("migrated"))
        .await
        .unwrap();
    assert_eq!(done.unblocked, vec![b.id]);

    let next = c.get_next_work(agent.id, &caps()).await.unwrap().unwrap();
    assert_eq!(next.issue.id, b.id);
    assert_eq!(c.get_issue(a.id).await.unwrap().unwrap().status, IssueStatus::Closed);
}

#[tokio::test]
async fn dependent_waits_for_every_blocker() {
    let clock = clock();
    let c = build(CoordinatorConfig::default(), &clock);
    let agent = c
        .register_agent(AgentRegistration::new("crew").with_max_concurrent(2))
        .await
        .unwrap();
    let x = c.create_issue(NewIssue::new("x")).await.unwrap();
    clock.advance(Duration::seconds(1));
    let y = c.create_issue(NewIssue::new("y")).await.unwrap();
    clock.advance(Duration::seconds(1));
    let z = c.create_issue(NewIssue::new("z")).await.unwrap();
    c.add_dependency(Dependency::blocks(z.id, x.id)).await.unwrap();
    c.add_dependency(Dependency::blocks(z.id, y.id)).await.unwrap();

    let first = c.get_next_work(agent.id, &caps()).await.unwrap().unwrap();
    let second = c.get_next_work(agent.id, &caps()).await.unwrap().unwrap();
    let (gx, gy) = if first.issue.id == x.id {
        (first, second)
    } else {
        (second, first)
    };
    assert_eq!((gx.issue.id, gy.issue.id), (x.id, y.id));

    let done_x = c
        .complete_work(gx.claim.id, agent.id, OutcomeReport::success("x"))
        .await
        .unwrap();
    assert!(done_x.unblocked.is_empty());
    assert!(c.get_ready_issues().await.unwrap().is_empty());

    let done_y = c
        .complete_work(gy.claim.id, agent.id, OutcomeReport::success("y"))
        .await
        .unwrap();
    assert_eq!(done_y.unblocked, vec![z.id]);
    let ready: Vec<_> = c.get_ready_issues().await.unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(ready, vec![z.id]);
}

#[tokio::test]
async fn agent_at_capacity_gets_nothing_more() {
    let clock = clock();
    let c = build(CoordinatorConfig::default(), &clock);
    let agent = c
        .register_agent(AgentRegistration::new("polecat").with_max_concurrent(1))
        .await
        .unwrap();
    c.create_issue(NewIssue::new("one")).await.unwrap();
    clock.advance(Duration::seconds(1));
    c.create_issue(NewIssue::new("two")).await.unwrap();

    assert!(c.get_next_work(agent.id, &caps()).await.unwrap().is_some());
    assert!(c.get_next_work(agent.id, &caps()).await.unwrap().is_none());
    assert_eq!(c.get_ready_issues().await.unwrap().len(), 1);
}

#[tokio::test]
async fn silent_agent_loses_its_lease() {
    let clock = clock();
    let mut config = CoordinatorConfig::default();
    config.claims.heartbeat_interval_ms = 500;
    config.claims.claim_ttl_ms = 1000;
    let c = build(config, &clock);
    let quiet = c.register_agent(AgentRegistration::new("quiet")).await.unwrap();
    let other = c.register_agent(AgentRegistration::new("other")).await.unwrap();
    let issue = c.create_issue(NewIssue::new("lease")).await.unwrap();
    c.get_next_work(quiet.id, &caps()).await.unwrap().unwrap();

    clock.advance(Duration::milliseconds(1500));
    c.heartbeat(other.id).await.unwrap();
    let report = c.cleanup().await.unwrap();
    assert!(report.expired_claims >= 1);
    assert_eq!(c.get_issue(issue.id).await.unwrap().unwrap().status, IssueStatus::Open);

    let grant = c.get_next_work(other.id, &caps()).await.unwrap().unwrap();
    assert_eq!(grant.issue.id, issue.id);
}

#[tokio::test]
async fn empty_queue_at_minimum_holds_the_pool() {
    let clock = clock();
    let mut config = CoordinatorConfig::default();
    config.scale.min_workers = 2;
    let c = build(config, &clock);
    c.scale().tick().await.unwrap();
    assert_eq!(c.pool().len().await, 2);

    clock.advance(Duration::minutes(5));
    let report = c.scale().tick().await.unwrap();
    assert_eq!(report.queue_depth, 0);
    assert_eq!(report.action, ScaleAction::Hold);
    assert_eq!(c.pool().len().await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_share_an_issue() {
    let clock = clock();
    let c = build(CoordinatorConfig::default(), &clock);
    let mut agents = Vec::new();
    for n in 0..8 {
        let agent = c
            .register_agent(AgentRegistration::new(format!("agent-{n}")))
            .await
            .unwrap();
        agents.push(agent.id);
    }
    for n in 0..3 {
        c.create_issue(NewIssue::new(format!("issue-{n}"))).await.unwrap();
        clock.advance(Duration::seconds(1));
    }

    let mut tasks = tokio::task::JoinSet::new();
    for agent_id in agents {
        let c = Arc::clone(&c);
        tasks.spawn(async move { c.get_next_work(agent_id, &BTreeSet::new()).await });
    }
    let mut claimed = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if let Some(grant) = joined.unwrap().unwrap() {
            claimed.push(grant.issue.id);
        }
    }

    claimed.sort();
    let total = claimed.len();
    claimed.dedup();
    assert_eq!(claimed.len(), total);
    assert_eq!(total, 3);
}
