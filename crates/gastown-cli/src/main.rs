//! gastown - drive the coordinator from the command line.
//!
//! ```bash
//! # run a simulated fleet until Ctrl-C
//! gastown start --issues 200 --failure-rate 0.1
//!
//! # validate a config file and print the effective settings
//! gastown config --config gastown.toml
//!
//! # one-shot health snapshot after a short simulated run
//! gastown health --warmup-ms 2000
//!
//! # coordinator metrics after a short simulated run
//! gastown metrics --warmup-ms 2000
//!
//! # time 25 agents working through 100 issues
//! gastown profile --agents 25 --issues 100
//! ```

mod sim;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gastown_core::domain::IssueStatus;
use gastown_core::{Coordinator, CoordinatorBuilder, CoordinatorConfig};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::sim::{SimulatedExecutor, seed_backlog};

#[derive(Parser)]
#[command(name = "gastown", about = "Coordinate agents over a shared issue backlog", version)]
struct Cli {
    /// TOML config file; defaults apply when omitted
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator over a synthetic backlog
    Start {
        #[command(flatten)]
        sim: SimArgs,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration_secs: Option<u64>,

        #[arg(long)]
        min_workers: Option<usize>,

        #[arg(long)]
        max_workers: Option<usize>,
    },

    /// Validate the config and print the effective values
    Config,

    /// Run a short simulation and print a health report
    Health {
        #[command(flatten)]
        sim: SimArgs,

        #[arg(long, default_value_t = 2000)]
        warmup_ms: u64,
    },

    /// Run a short simulation and print coordinator metrics
    Metrics {
        #[command(flatten)]
        sim: SimArgs,

        #[arg(long, default_value_t = 2000)]
        warmup_ms: u64,
    },

    /// Time a fixed fleet working through a backlog
    Profile {
        /// Simulated agents; the pool is pinned to this size
        #[arg(long, default_value_t = 25)]
        agents: usize,

        /// Synthetic issues to seed
        #[arg(long, default_value_t = 100)]
        issues: usize,

        #[arg(long, default_value_t = 0.1)]
        failure_rate: f64,

        #[arg(long, default_value_t = 200)]
        max_work_ms: u64,

        /// Give up after this long even if the backlog is not drained
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,
    },
}

#[derive(clap::Args)]
struct SimArgs {
    /// Synthetic issues to seed
    #[arg(long, default_value_t = 100)]
    issues: usize,

    /// Chance that a simulated session fails
    #[arg(long, default_value_t = 0.1)]
    failure_rate: f64,

    /// Upper bound on simulated session time
    #[arg(long, default_value_t = 500)]
    max_work_ms: u64,
}

#[derive(Serialize)]
struct Summary<T: Serialize> {
    seeded: usize,
    #[serde(flatten)]
    body: T,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Start {
            sim,
            duration_secs,
            min_workers,
            max_workers,
        } => {
            if let Some(n) = min_workers {
                config.scale.min_workers = n;
            }
            if let Some(n) = max_workers {
                config.scale.max_workers = n;
            }
            let coordinator = CoordinatorBuilder::in_memory().with_config(config).build()?;
            let seeded = seed_backlog(&coordinator, sim.issues).await?.len();
            info!(seeded, "backlog seeded");

            let handle = coordinator.run(executor(&sim));
            match duration_secs {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => tokio::signal::ctrl_c()
                    .await
                    .context("failed to listen for ctrl-c")?,
            }
            info!("shutting down");
            handle.shutdown_and_join().await;

            print_json(&Summary {
                seeded,
                body: coordinator.metrics().await?,
            })?;
        }

        Commands::Config => {
            config.validate()?;
            print_json(&config)?;
        }

        Commands::Health { sim, warmup_ms } => {
            let (coordinator, seeded) = simulate(config, &sim, warmup_ms).await?;
            print_json(&Summary {
                seeded,
                body: health_snapshot(&coordinator).await?,
            })?;
        }

        Commands::Metrics { sim, warmup_ms } => {
            let (coordinator, seeded) = simulate(config, &sim, warmup_ms).await?;
            print_json(&Summary {
                seeded,
                body: coordinator.metrics().await?,
            })?;
        }

        Commands::Profile {
            agents,
            issues,
            failure_rate,
            max_work_ms,
            timeout_secs,
        } => {
            config.scale.min_workers = agents;
            config.scale.max_workers = agents;
            let sim = SimArgs {
                issues,
                failure_rate,
                max_work_ms,
            };
            let report = profile(config, &sim, agents, Duration::from_secs(timeout_secs)).await?;
            print_json(&report)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<CoordinatorConfig> {
    match path {
        Some(path) => CoordinatorConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(CoordinatorConfig::default()),
    }
}

/// Seed a backlog, run the loops for `warmup_ms`, then stop them.
async fn simulate(
    config: CoordinatorConfig,
    sim: &SimArgs,
    warmup_ms: u64,
) -> Result<(Arc<Coordinator>, usize)> {
    let coordinator = CoordinatorBuilder::in_memory().with_config(config).build()?;
    let seeded = seed_backlog(&coordinator, sim.issues).await?.len();
    let handle = coordinator.run(executor(sim));
    tokio::time::sleep(Duration::from_millis(warmup_ms)).await;
    handle.shutdown_and_join().await;
    Ok((coordinator, seeded))
}

#[derive(Serialize)]
struct ProfileReport {
    agents: usize,
    issues: usize,
    closed: usize,
    drained: bool,
    elapsed_ms: u128,
    issues_per_second: f64,
    p95_duration_ms: Option<u64>,
    success_rate: Option<f64>,
    sessions_completed: u64,
}

async fn profile(
    config: CoordinatorConfig,
    sim: &SimArgs,
    agents: usize,
    timeout: Duration,
) -> Result<ProfileReport> {
    let coordinator = CoordinatorBuilder::in_memory().with_config(config).build()?;
    let issues = seed_backlog(&coordinator, sim.issues).await?.len();
    info!(agents, issues, "profiling");

    let started = Instant::now();
    let handle = coordinator.run(executor(sim));
    let mut closed = 0;
    while started.elapsed() < timeout {
        tokio::time::sleep(Duration::from_millis(100)).await;
        closed = closed_count(&coordinator).await?;
        if closed == issues {
            break;
        }
    }
    let elapsed = started.elapsed();
    handle.shutdown_and_join().await;
    let closed = closed.max(closed_count(&coordinator).await?);

    let health = coordinator.get_health_metrics().await?;
    let pool = coordinator.pool().metrics().await;
    Ok(ProfileReport {
        agents,
        issues,
        closed,
        drained: closed == issues,
        elapsed_ms: elapsed.as_millis(),
        issues_per_second: closed as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        p95_duration_ms: health.p95_duration_ms,
        success_rate: health.success_rate,
        sessions_completed: pool.sessions_completed,
    })
}

async fn closed_count(coordinator: &Coordinator) -> Result<usize> {
    Ok(coordinator
        .list_issues()
        .await?
        .iter()
        .filter(|i| i.status == IssueStatus::Closed)
        .count())
}

fn executor(sim: &SimArgs) -> Arc<SimulatedExecutor> {
    Arc::new(SimulatedExecutor::new(sim.failure_rate, sim.max_work_ms))
}

#[derive(Serialize)]
struct HealthSnapshot {
    report: gastown_core::app::HealthReport,
    remediations: Vec<gastown_core::app::Remediation>,
    scale: gastown_core::app::ScaleMetrics,
}

async fn health_snapshot(coordinator: &Coordinator) -> Result<HealthSnapshot> {
    Ok(HealthSnapshot {
        report: coordinator.check_health().await?,
        remediations: coordinator.get_remediations().await?,
        scale: coordinator.scale().metrics().await?,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_and_metrics_parse() {
        let cli = Cli::try_parse_from(["gastown", "profile", "--agents", "3", "--issues", "7"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Profile { agents: 3, issues: 7, .. }
        ));

        let cli = Cli::try_parse_from(["gastown", "metrics", "--warmup-ms", "10"]).unwrap();
        assert!(matches!(cli.command, Commands::Metrics { warmup_ms: 10, .. }));
    }

    fn fast_config(workers: usize) -> CoordinatorConfig {
        let mut config = CoordinatorConfig::default();
        config.scale.min_workers = workers;
        config.scale.max_workers = workers;
        config.dispatch.poll_interval_ms = 10;
        config
    }

    #[tokio::test]
    async fn profile_drains_a_small_backlog() {
        let sim = SimArgs {
            issues: 4,
            failure_rate: 0.0,
            max_work_ms: 5,
        };
        let report = profile(fast_config(2), &sim, 2, Duration::from_secs(20))
            .await
            .unwrap();
        assert!(report.drained);
        assert_eq!(report.closed, 4);
        assert_eq!(report.success_rate, Some(1.0));
        assert!(report.p95_duration_ms.is_some());
        assert!(report.issues_per_second > 0.0);
    }

    #[tokio::test]
    async fn metrics_run_reports_the_pool() {
        let sim = SimArgs {
            issues: 3,
            failure_rate: 0.0,
            max_work_ms: 5,
        };
        let (coordinator, seeded) = simulate(fast_config(2), &sim, 200).await.unwrap();
        assert_eq!(seeded, 3);
        let metrics = coordinator.metrics().await.unwrap();
        assert_eq!(metrics.total_workers, 2);
    }
}
