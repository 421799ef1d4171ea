//! Coordinator configuration.
//!
//! Every knob has a default and can be tuned on its own. Durations are stored
//! as milliseconds (`*_ms`) so the TOML form stays flat:
//!
//! ```toml
//! [claims]
//! claim_ttl_ms = 60000
//! heartbeat_interval_ms = 30000
//!
//! [scale]
//! min_workers = 2
//! max_workers = 8
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub(crate) fn millis(ms: u64) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub claims: ClaimsConfig,
    pub router: RouterConfig,
    pub priority: PriorityConfig,
    pub scale: ScaleConfig,
    pub health: HealthThresholds,
    pub dispatch: DispatchConfig,
}

impl CoordinatorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Reject combinations the algorithms cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        let c = &self.claims;
        if c.heartbeat_interval_ms == 0 {
            problems.push("claims.heartbeat_interval_ms must be > 0".to_string());
        }
        if c.claim_ttl_ms <= c.heartbeat_interval_ms {
            problems.push(format!(
                "claims.claim_ttl_ms ({}) must exceed heartbeat_interval_ms ({})",
                c.claim_ttl_ms, c.heartbeat_interval_ms
            ));
        }
        if c.dead_agent_timeout_ms <= c.heartbeat_interval_ms {
            problems.push("claims.dead_agent_timeout_ms must exceed heartbeat_interval_ms".into());
        }

        let w = &self.router.weights;
        if [w.capability, w.workload, w.recency, w.experience]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            problems.push("router.weights must be finite and non-negative".into());
        }
        if w.capability + w.workload + w.recency + w.experience <= 0.0 {
            problems.push("router.weights must not all be zero".into());
        }
        if self.router.max_recency_window_ms == 0 {
            problems.push("router.max_recency_window_ms must be > 0".into());
        }

        let s = &self.scale;
        if s.min_workers > s.max_workers {
            problems.push(format!(
                "scale.min_workers ({}) must not exceed max_workers ({})",
                s.min_workers, s.max_workers
            ));
        }
        if s.scale_down_threshold >= s.scale_up_threshold {
            problems.push("scale.scale_down_threshold must be below scale_up_threshold".into());
        }
        if s.health_check_interval_ms == 0 {
            problems.push("scale.health_check_interval_ms must be > 0".into());
        }

        let h = &self.health;
        if !(0.0..=1.0).contains(&h.min_success_rate)
            || !(0.0..=1.0).contains(&h.critical_success_rate)
            || h.critical_success_rate > h.min_success_rate
        {
            problems.push(
                "health: 0 <= critical_success_rate <= min_success_rate <= 1 must hold".into(),
            );
        }

        if self.dispatch.max_claim_attempts == 0 {
            problems.push("dispatch.max_claim_attempts must be > 0".into());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimsConfig {
    /// Lease length; renewed on every heartbeat.
    pub claim_ttl_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// No heartbeat for this long marks the agent dead.
    pub dead_agent_timeout_ms: u64,
    /// Used when a registration does not say.
    pub default_max_concurrent: u32,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        let heartbeat_interval_ms = 30_000;
        Self {
            claim_ttl_ms: 2 * heartbeat_interval_ms,
            heartbeat_interval_ms,
            dead_agent_timeout_ms: 4 * heartbeat_interval_ms,
            default_max_concurrent: 1,
        }
    }
}

impl ClaimsConfig {
    pub fn claim_ttl(&self) -> chrono::Duration {
        millis(self.claim_ttl_ms)
    }

    pub fn dead_agent_timeout(&self) -> chrono::Duration {
        millis(self.dead_agent_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Factor weights. They need not sum to 1; only their ratios matter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterWeights {
    pub capability: f64,
    pub workload: f64,
    pub recency: f64,
    pub experience: f64,
}

impl Default for RouterWeights {
    fn default() -> Self {
        Self {
            capability: 0.4,
            workload: 0.3,
            recency: 0.15,
            experience: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub weights: RouterWeights,
    /// Idle time at which the recency factor saturates at 1.0.
    pub max_recency_window_ms: u64,
    /// Past successes needed for a full experience sub-score.
    pub experience_cap: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            weights: RouterWeights::default(),
            max_recency_window_ms: 60 * 60 * 1000,
            experience_cap: 5,
        }
    }
}

/// Priority score weights.
///
/// Defaults favor fan-out: a single unblocked dependent (0.5) outweighs the
/// largest possible age bonus (0.1 * 3 days = 0.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub priority_weight: f64,
    pub age_weight_per_day: f64,
    pub max_age_days: f64,
    pub unblocks_weight: f64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            priority_weight: 1.0,
            age_weight_per_day: 0.1,
            max_age_days: 3.0,
            unblocks_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Queue depth the pool is sized for; reported in scale metrics.
    pub target_queue_depth: usize,
    /// Above this, callers should stop admitting new work.
    pub max_queue_depth: usize,
    /// queue_depth / workers above this scales up.
    pub scale_up_threshold: f64,
    /// queue_depth / workers below this scales down.
    pub scale_down_threshold: f64,
    pub scale_cooldown_ms: u64,
    pub worker_stall_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    /// Lifetime sessions after which a worker gets no new work.
    pub max_sessions_per_worker: u64,
    /// Capabilities given to workers the scaler creates.
    pub worker_capabilities: Vec<String>,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            min_workers: 4,
            max_workers: 30,
            target_queue_depth: 10,
            max_queue_depth: 100,
            scale_up_threshold: 2.0,
            scale_down_threshold: 0.5,
            scale_cooldown_ms: 60_000,
            worker_stall_timeout_ms: 10 * 60 * 1000,
            health_check_interval_ms: 30_000,
            max_sessions_per_worker: 50,
            worker_capabilities: Vec::new(),
        }
    }
}

impl ScaleConfig {
    pub fn stall_timeout(&self) -> chrono::Duration {
        millis(self.worker_stall_timeout_ms)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        millis(self.scale_cooldown_ms)
    }

    pub fn health_check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.health_check_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Below this the system is degraded.
    pub min_success_rate: f64,
    /// Below this the system is unhealthy.
    pub critical_success_rate: f64,
    /// Success rate is not judged on fewer outcomes than this.
    pub min_outcomes_for_rate: usize,
    pub max_stalled_workers: usize,
    pub max_queue_depth: usize,
    pub max_p95_duration_ms: u64,
    pub throughput_window_ms: u64,
    /// Failures after which an agent is named in remediations.
    pub repeated_failure_threshold: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_success_rate: 0.8,
            critical_success_rate: 0.5,
            min_outcomes_for_rate: 5,
            max_stalled_workers: 2,
            max_queue_depth: 50,
            max_p95_duration_ms: 30 * 60 * 1000,
            throughput_window_ms: 60 * 60 * 1000,
            repeated_failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Bound on claim retries inside one `get_next_work` call.
    pub max_claim_attempts: usize,
    /// How often the dispatch loop looks for idle workers.
    pub poll_interval_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_claim_attempts: 5,
            poll_interval_ms: 1_000,
        }
    }
}
