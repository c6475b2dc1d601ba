//! Calculator: resource snapshot + profile -> validated PHP-FPM pool sizing.

use crate::error::{PodInitError, Result};
use crate::profile::{ProcessManagerType, ProfileConfig};
use crate::resources::Resources;

/// Advisory, non-fatal conditions surfaced alongside a successful
/// calculation. Each kind is emitted at most once per calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Warning {
    NotContainerized,
    ConservativeThreshold,
    Oversubscription,
    CpuBound,
    ProfileMinimumRaise,
    ProfileMaximumClamp,
    AbsoluteMinimum,
}

impl Warning {
    fn render(self) -> String {
        match self {
            Warning::NotContainerized => {
                "not running under a detected cgroup; tuning from host totals".to_string()
            }
            Warning::ConservativeThreshold => {
                "memory threshold is below 30%; pool may be undersized".to_string()
            }
            Warning::Oversubscription => {
                "memory threshold exceeds 100%; configured budget exceeds the container limit"
                    .to_string()
            }
            Warning::CpuBound => {
                "worker count limited by CPU quota, not memory budget".to_string()
            }
            Warning::ProfileMinimumRaise => {
                "worker count raised to profile minimum".to_string()
            }
            Warning::ProfileMaximumClamp => {
                "worker count clamped to profile maximum".to_string()
            }
            Warning::AbsoluteMinimum => {
                "forced a single worker despite insufficient headroom".to_string()
            }
        }
    }
}

/// Calculator output: a validated, ready-to-render PHP-FPM pool
/// configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub profile: &'static str,
    pub process_manager: ProcessManagerType,
    pub max_children: u32,
    pub start_servers: u32,
    pub min_spare: Option<u32>,
    pub max_spare: Option<u32>,
    pub max_requests: u32,
    pub memory_total_mb: u64,
    pub memory_allocated_mb: u64,
    pub memory_opcache_mb: u64,
    pub memory_reserved_mb: u64,
    pub cpu_count: u64,
    pub warnings: Vec<String>,
}

impl PoolConfig {
    /// Render as the environment-variable sink the downstream config
    /// templater consumes (§6 of the spec). `static` mode omits the
    /// spare/start keys.
    pub fn to_env_pairs(&self) -> Vec<(&'static str, String)> {
        let pm = match self.process_manager {
            ProcessManagerType::Static => "static",
            ProcessManagerType::Dynamic => "dynamic",
            ProcessManagerType::OnDemand => "ondemand",
        };

        let mut pairs = vec![
            ("PHP_FPM_PM", pm.to_string()),
            ("PHP_FPM_MAX_CHILDREN", self.max_children.to_string()),
            ("PHP_FPM_MAX_REQUESTS", self.max_requests.to_string()),
        ];

        if self.process_manager == ProcessManagerType::Dynamic {
            pairs.push(("PHP_FPM_START_SERVERS", self.start_servers.to_string()));
            if let Some(min_spare) = self.min_spare {
                pairs.push(("PHP_FPM_MIN_SPARE", min_spare.to_string()));
            }
            if let Some(max_spare) = self.max_spare {
                pairs.push(("PHP_FPM_MAX_SPARE", max_spare.to_string()));
            }
        }

        pairs
    }
}

/// Compute a worker pool configuration for `profile` given `resources`.
///
/// `threshold_override` of `0.0` means "use the profile's default memory
/// budget fraction"; any other value overrides it without clamping (an
/// override above `1.0` or below `0.30` only produces a warning).
pub fn calculate(
    resources: &Resources,
    profile: &ProfileConfig,
    threshold_override: f64,
) -> Result<PoolConfig> {
    let mut warnings = Vec::new();

    if !resources.is_containerized {
        warnings.push(Warning::NotContainerized);
    }

    let effective_threshold = if threshold_override == 0.0 {
        profile.max_memory_usage
    } else {
        threshold_override
    };

    if effective_threshold > 1.0 {
        warnings.push(Warning::Oversubscription);
    } else if effective_threshold < 0.30 {
        warnings.push(Warning::ConservativeThreshold);
    }

    let budget_mb = (resources.memory_limit_mb as f64 * effective_threshold) as u64;
    let reserved_pool_mb = profile.reserved_memory_mb + profile.opcache_memory_mb;

    if budget_mb <= reserved_pool_mb {
        return Err(insufficient(
            "reserved memory pool exceeds the effective budget",
            budget_mb,
            reserved_pool_mb,
        ));
    }

    let worker_pool_mb = budget_mb - reserved_pool_mb;
    if worker_pool_mb <= profile.avg_memory_per_worker_mb {
        return Err(insufficient(
            "not enough headroom for even one worker",
            budget_mb,
            reserved_pool_mb,
        ));
    }

    let memory_bound = worker_pool_mb / profile.avg_memory_per_worker_mb;
    let cpu_bound = resources.cpu_limit * 4;

    if memory_bound > cpu_bound {
        warnings.push(Warning::CpuBound);
    }

    let mut max_children = memory_bound.min(cpu_bound) as u32;

    if max_children < profile.min_workers {
        max_children = profile.min_workers;
        warnings.push(Warning::ProfileMinimumRaise);
    }

    if profile.max_workers > 0 && max_children > profile.max_workers {
        max_children = profile.max_workers;
        warnings.push(Warning::ProfileMaximumClamp);
    }

    if max_children == 0 {
        max_children = 1;
        warnings.push(Warning::AbsoluteMinimum);
    }

    let (process_manager, start_servers, min_spare, max_spare) =
        derive_process_manager(profile, max_children);

    let pool = PoolConfig {
        profile: profile.name,
        process_manager,
        max_children,
        start_servers,
        min_spare,
        max_spare,
        max_requests: profile.max_requests_per_child,
        memory_total_mb: resources.memory_limit_mb,
        memory_allocated_mb: max_children as u64 * profile.avg_memory_per_worker_mb,
        memory_opcache_mb: profile.opcache_memory_mb,
        memory_reserved_mb: profile.reserved_memory_mb,
        cpu_count: resources.cpu_limit,
        warnings: warnings.into_iter().map(Warning::render).collect(),
    };

    validate(&pool)?;
    Ok(pool)
}

fn derive_process_manager(
    profile: &ProfileConfig,
    max_children: u32,
) -> (ProcessManagerType, u32, Option<u32>, Option<u32>) {
    match profile.process_manager_type {
        ProcessManagerType::Static => (ProcessManagerType::Static, max_children, None, None),
        ProcessManagerType::Dynamic | ProcessManagerType::OnDemand => {
            let mut min_spare = round_to_u32(max_children as f64 * profile.spare_min_ratio);
            let mut max_spare = round_to_u32(max_children as f64 * profile.spare_max_ratio);
            let mut start_servers = round_to_u32(max_children as f64 * profile.start_servers_ratio);

            if min_spare == 0 {
                min_spare = 1;
            }
            if max_spare < min_spare {
                max_spare = min_spare;
            }
            if max_spare < start_servers {
                max_spare = start_servers;
            }
            if max_spare > max_children {
                max_spare = max_children;
            }
            if start_servers < min_spare {
                start_servers = min_spare;
            }
            if start_servers > max_spare {
                start_servers = max_spare;
            }

            (
                ProcessManagerType::Dynamic,
                start_servers,
                Some(min_spare),
                Some(max_spare),
            )
        }
    }
}

fn round_to_u32(value: f64) -> u32 {
    value.round() as u32
}

fn insufficient(reason: &str, budget_mb: u64, reserved_mb: u64) -> PodInitError {
    PodInitError::InsufficientResources {
        reason: reason.to_string(),
        budget_mb,
        reserved_mb,
    }
}

/// Post-derivation re-check of every `PoolConfig` invariant.
fn validate(pool: &PoolConfig) -> Result<()> {
    if pool.memory_allocated_mb + pool.memory_opcache_mb + pool.memory_reserved_mb
        > pool.memory_total_mb
    {
        return Err(insufficient(
            "allocated + opcache + reserved exceeds total memory",
            pool.memory_total_mb,
            pool.memory_allocated_mb + pool.memory_opcache_mb + pool.memory_reserved_mb,
        ));
    }

    if pool.max_children < 1 {
        return Err(insufficient("max_children below 1", 0, 0));
    }

    match pool.process_manager {
        ProcessManagerType::Static => {
            if pool.start_servers != pool.max_children
                || pool.min_spare.is_some()
                || pool.max_spare.is_some()
            {
                return Err(insufficient("static pool manager invariant violated", 0, 0));
            }
        }
        ProcessManagerType::Dynamic | ProcessManagerType::OnDemand => {
            let min_spare = pool.min_spare.unwrap_or(0);
            let max_spare = pool.max_spare.unwrap_or(0);
            if !(1 <= min_spare
                && min_spare <= pool.start_servers
                && pool.start_servers <= max_spare
                && max_spare <= pool.max_children)
            {
                return Err(insufficient("dynamic pool manager invariant violated", 0, 0));
            }
        }
    }

    Ok(())
}
