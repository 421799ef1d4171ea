//! ReaperLoop - periodic recovery of dead agents and expired leases.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::app::coordinator::Coordinator;

/// ReaperLoop runs `Coordinator::cleanup` on a fixed interval.
///
/// # Flow
/// 1. agents past the dead-agent timeout are deactivated, claims released
/// 2. remaining active claims past `expires_at` are released
/// 3. released issues go back to `open` and become claimable again
pub struct ReaperLoop {
    coordinator: Arc<Coordinator>,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(coordinator: Arc<Coordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    // sender gone counts as shutdown
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }
            match self.coordinator.cleanup().await {
                Ok(report) if report.expired_claims > 0 || !report.dead_agents.is_empty() => {
                    info!(
                        expired_claims = report.expired_claims,
                        dead_agents = report.dead_agents.len(),
                        "reaper recovered work"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, kind = ?e.kind(), "reaper pass failed"),
            }
        }
    }
}
