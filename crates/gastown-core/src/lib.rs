//! gastown-core
//!
//! Coordination core for a fleet of agents working a shared issue backlog.
//!
//! # Modules
//! - **domain**: ids, issues, dependencies, agents, claims, outcomes, errors
//! - **ports**: storage, clock, and id seams (`IssueStore`, `ClaimStore`, `Clock`, `IdGenerator`)
//! - **impls**: in-memory reference stores
//! - **config**: TOML-backed tunables with validation
//! - **app**: claims, priority, routing, health, scaling, workers, and the `Coordinator`

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{Coordinator, CoordinatorBuilder, CoordinatorHandle, WorkExecutor, WorkGrant};
pub use config::CoordinatorConfig;
