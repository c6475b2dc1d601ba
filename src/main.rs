//! # pod-init
//!
//! A container-resident PID 1 process supervisor for PHP application
//! containers. It autotunes a PHP-FPM worker pool from the container's
//! cgroup resource limits, supervises the configured process set, and
//! publishes a single readiness verdict for Kubernetes to probe.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                            pod-init                              │
//! ├────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐           │
//! │  │  Resource   │──▶│  Calculator  │──▶│  PHP_FPM_*  │           │
//! │  │   Probe     │   │ (+ Profile)  │   │  env pairs  │           │
//! │  └─────────────┘   └─────────────┘   └─────────────┘           │
//! │                                                                  │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐           │
//! │  │  Supervisor │──▶│ Dependency  │   │   Health    │           │
//! │  │             │   │   Graph     │   │   Checks    │           │
//! │  └──────┬──────┘   └─────────────┘   └──────┬──────┘           │
//! │         │                                    │                  │
//! │         └──────────────────┬─────────────────┘                  │
//! │                            ▼                                    │
//! │                 ┌─────────────────────┐                         │
//! │                 │  Readiness Tracker  │── marker file ──▶ kubelet│
//! │                 └─────────────────────┘                         │
//! │                                                                  │
//! └────────────────────────────────────────────────────────────────┘
//! ```

mod calculator;
mod config;
mod dependency;
mod error;
mod health;
mod process;
mod profile;
mod readiness;
mod resources;
mod supervisor;

pub use calculator::{calculate, PoolConfig};
pub use config::PodInitConfig;
pub use dependency::DependencyGraph;
pub use process::{Process, ProcessRuntimeState, ProcessSpec};
pub use readiness::{ReadinessConfig, ReadinessTracker};
pub use resources::{CgroupProbe, Resources};
pub use supervisor::Supervisor;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// pod-init - container PID 1 process supervisor with PHP-FPM autotuning
#[derive(Parser, Debug)]
#[command(name = "pod-init", version, about)]
struct Args {
    /// Configuration directory (also: POD_INIT_CONFIG_DIR env var)
    #[arg(short, long, env = "POD_INIT_CONFIG_DIR", default_value = "/etc/pod-init")]
    config_dir: PathBuf,

    /// Run in user session mode (not PID 1)
    #[arg(long)]
    user_session: bool,

    /// Enable debug logging (also: POD_INIT_DEBUG env var)
    #[arg(short, long, env = "POD_INIT_DEBUG")]
    debug: bool,

    /// Dry run: validate config, run the autotuner once, print the
    /// resulting pool config and env pairs, then exit without starting
    /// any process or touching the readiness marker.
    #[arg(long)]
    dry_run: bool,

    /// Override the configured autotuner profile
    #[arg(long)]
    profile: Option<String>,

    /// Override the profile's max_memory_usage threshold (0.0-1.0)
    #[arg(long)]
    memory_threshold: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    info!("pod-init v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config_dir).await?;

    if let Some(profile_name) = &args.profile {
        config.tuning.profile = profile_name.clone();
    }
    if let Some(threshold) = args.memory_threshold {
        config.tuning.memory_threshold = Some(threshold);
    }

    let pool_config = run_autotuner(&config.tuning).context("autotuner failed")?;

    if args.dry_run {
        info!("dry run: validating configuration");
        validate_config(&config)?;
        print_pool_config(&pool_config);
        info!("configuration valid");
        return Ok(());
    }

    log_pool_config(&pool_config);

    let dep_graph = dependency::build_graph(&config.processes)?;
    info!("built dependency graph with {} processes", dep_graph.process_count());

    let readiness = Arc::new(readiness::ReadinessTracker::new(config.readiness.clone()));
    readiness.start()?;

    let mut supervisor = Supervisor::new(config, dep_graph, readiness);

    if !args.user_session && std::process::id() == 1 {
        setup_pid1_environment().await?;
    }

    supervisor.start_all().await?;

    supervisor.run().await
}

/// Probe the container's resource limits and run the Calculator against the
/// selected tuning profile.
fn run_autotuner(tuning: &config::TuningConfig) -> Result<PoolConfig> {
    let resources = resources::CgroupProbe::default().detect();
    let profile = profile::get(&tuning.profile)?;
    let threshold = tuning.memory_threshold.unwrap_or(profile.max_memory_usage);

    let pool_config = calculator::calculate(&resources, &profile, threshold)?;
    for warning in &pool_config.warnings {
        tracing::warn!("{}", warning);
    }

    Ok(pool_config)
}

fn log_pool_config(pool_config: &PoolConfig) {
    info!(
        "autotuner: pm={:?} max_children={} start_servers={:?}",
        pool_config.process_manager, pool_config.max_children, pool_config.start_servers
    );
}

fn print_pool_config(pool_config: &PoolConfig) {
    println!("{pool_config:#?}");
    println!("env pairs:");
    for (key, value) in pool_config.to_env_pairs() {
        println!("  {key}={value}");
    }
}

async fn setup_pid1_environment() -> Result<()> {
    info!("running as PID 1, setting up system environment");
    info!("mounting /proc, /sys, /dev");
    info!("setting up console");
    info!("setting hostname");
    Ok(())
}

fn validate_config(config: &PodInitConfig) -> Result<()> {
    for process in &config.processes {
        process.validate()?;
    }

    let graph = dependency::build_graph(&config.processes)?;
    graph.validate()?;

    profile::validate(&config.tuning.profile)?;

    Ok(())
}
