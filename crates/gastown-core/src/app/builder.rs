//! CoordinatorBuilder - wiring and start-up validation.
//!
//! Fail fast: a bad config or a missing store is a `BuildError` at build
//! time, never a panic or a silent default halfway through a run.

use std::sync::Arc;

use crate::app::claims::ClaimsManager;
use crate::app::coordinator::Coordinator;
use crate::app::health::HealthMonitor;
use crate::app::priority::PriorityCalculator;
use crate::app::router::Router;
use crate::app::scale::ScaleManager;
use crate::app::worker::WorkerPool;
use crate::config::{ConfigError, CoordinatorConfig};
use crate::domain::ErrorKind;
use crate::impls::{InMemoryClaimStore, InMemoryIssueStore};
use crate::ports::{ClaimStore, Clock, IdGenerator, IssueStore, SystemClock, UlidGenerator};

/// Builds a `Coordinator`.
///
/// # Example
/// ```ignore
/// let coordinator = CoordinatorBuilder::new()
///     .with_issue_store(issues)
///     .with_claim_store(claims)
///     .with_config(CoordinatorConfig::from_file("gastown.toml")?)
///     .build()?;
/// ```
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    issues: Option<Arc<dyn IssueStore>>,
    claims: Option<Arc<dyn ClaimStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no {0} configured; call with_{0}() or use CoordinatorBuilder::in_memory()")]
    MissingStore(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}

impl CoordinatorBuilder {
    /// Empty builder; both stores must be supplied.
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
            issues: None,
            claims: None,
            clock: None,
            ids: None,
        }
    }

    /// Builder preloaded with the in-memory reference stores.
    pub fn in_memory() -> Self {
        Self::new()
            .with_issue_store(Arc::new(InMemoryIssueStore::new()))
            .with_claim_store(Arc::new(InMemoryClaimStore::new()))
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_issue_store(mut self, store: Arc<dyn IssueStore>) -> Self {
        self.issues = Some(store);
        self
    }

    pub fn with_claim_store(mut self, store: Arc<dyn ClaimStore>) -> Self {
        self.claims = Some(store);
        self
    }

    /// Defaults to `SystemClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a `UlidGenerator` on the builder's clock.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Validate the config and wire every component.
    pub fn build(self) -> Result<Arc<Coordinator>, BuildError> {
        self.config.validate()?;
        let issues = self.issues.ok_or(BuildError::MissingStore("issue_store"))?;
        let claim_store = self.claims.ok_or(BuildError::MissingStore("claim_store"))?;
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let config = self.config;

        let claims = Arc::new(ClaimsManager::new(
            Arc::clone(&issues),
            Arc::clone(&claim_store),
            Arc::clone(&clock),
            Arc::clone(&ids),
            config.claims.clone(),
        ));
        let priority = Arc::new(PriorityCalculator::new(
            Arc::clone(&issues),
            Arc::clone(&claim_store),
            Arc::clone(&clock),
            config.priority.clone(),
        ));
        let router = Arc::new(Router::new(
            Arc::clone(&claim_store),
            Arc::clone(&clock),
            config.router.clone(),
        ));
        let pool = Arc::new(WorkerPool::new());
        let health = Arc::new(
            HealthMonitor::new(
                Arc::clone(&issues),
                Arc::clone(&claim_store),
                Arc::clone(&priority),
                Arc::clone(&clock),
                config.health.clone(),
                config.scale.stall_timeout(),
            )
            .with_pool(Arc::clone(&pool)),
        );
        let scale = Arc::new(ScaleManager::new(
            Arc::clone(&claims),
            Arc::clone(&priority),
            Arc::clone(&pool),
            Arc::clone(&clock),
            config.scale.clone(),
        ));

        Ok(Arc::new(Coordinator {
            config,
            issues,
            clock,
            ids,
            claims,
            priority,
            router,
            health,
            scale,
            pool,
        }))
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_builds_with_defaults() {
        assert!(CoordinatorBuilder::in_memory().build().is_ok());
    }

    #[test]
    fn missing_store_is_reported() {
        let err = CoordinatorBuilder::new()
            .with_issue_store(Arc::new(InMemoryIssueStore::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::MissingStore("claim_store")));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn invalid_config_fails_the_build() {
        let mut config = CoordinatorConfig::default();
        config.scale.min_workers = 9;
        config.scale.max_workers = 3;
        let err = CoordinatorBuilder::in_memory()
            .with_config(config)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::Config(ConfigError::Invalid(_))));
    }
}
