//! App - the coordination layer.
//!
//! Combines the ports into the coordinator's behavior.
//!
//! # Components
//! - **ClaimsManager**: agent registry, claim lifecycle, lease recovery
//! - **PriorityCalculator**: readiness, scores, bottlenecks
//! - **Router** (+ **ExperienceLedger**): four-factor agent selection
//! - **HealthMonitor**: metrics, violations, remediations
//! - **ScaleManager** / **ScaleLoop**: pool sizing and stall restarts
//! - **Worker** / **WorkerPool**: execution-side state machines
//! - **ReaperLoop** / **DispatchLoop**: background recovery and dispatch
//! - **Coordinator** / **CoordinatorBuilder**: the façade and its wiring

pub mod builder;
pub mod claims;
pub mod coordinator;
pub mod dispatch_loop;
pub mod health;
pub mod ledger;
pub mod priority;
pub mod reaper_loop;
pub mod router;
pub mod scale;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use self::builder::{BuildError, CoordinatorBuilder};
pub use self::claims::{ClaimOutcome, ClaimsManager};
pub use self::coordinator::{
    CleanupReport, Completion, Coordinator, CoordinatorHandle, CoordinatorMetrics, WorkGrant,
};
pub use self::dispatch_loop::DispatchLoop;
pub use self::health::{
    HealthMetrics, HealthMonitor, HealthReport, HealthStatus, Remediation, Severity, Violation,
    ViolationKind,
};
pub use self::ledger::ExperienceLedger;
pub use self::priority::{Bottleneck, PriorityCalculator, PriorityScore};
pub use self::reaper_loop::ReaperLoop;
pub use self::router::{Assignment, FactorScores, Router};
pub use self::scale::{ScaleAction, ScaleLoop, ScaleManager, ScaleMetrics, ScaleReport};
pub use self::worker::{
    PoolMetrics, WorkExecutor, Worker, WorkerError, WorkerPool, WorkerSnapshot, WorkerState,
};
