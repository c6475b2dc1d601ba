//! Resource Probe: read cgroup v2/v1 and host sources into a normalized
//! [`Resources`] snapshot.
//!
//! Detection is a fixed chain — v2, then v1, then host totals — and never
//! fails; a container with no readable cgroup files still gets a usable
//! snapshot built from host totals.

use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";
const DEFAULT_CGROUP_V1_MEMORY: &str = "/sys/fs/cgroup/memory";
const DEFAULT_CGROUP_V1_CPU: &str = "/sys/fs/cgroup/cpu,cpuacct";
const MEMINFO_PATH: &str = "/proc/meminfo";

/// v1's traditional "no limit" sentinel: a value so close to i64::MAX that
/// any real container will never hit it. Anything at or above this is
/// unlimited, not a real quota.
const V1_UNLIMITED_THRESHOLD: u64 = 1u64 << 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupSource {
    V1,
    V2,
    None,
}

/// Immutable snapshot of the container's resource limits, built once at
/// startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resources {
    /// 0 means unlimited/unknown.
    pub memory_limit_bytes: u64,
    /// Always `memory_limit_bytes / (1024 * 1024)`.
    pub memory_limit_mb: u64,
    /// Positive core count; fractional quotas round up.
    pub cpu_limit: u64,
    pub is_containerized: bool,
    pub cgroup_source: CgroupSource,
}

impl Resources {
    fn new(memory_limit_bytes: u64, cpu_limit: u64, cgroup_source: CgroupSource) -> Self {
        Self {
            memory_limit_bytes,
            memory_limit_mb: memory_limit_bytes / (1024 * 1024),
            cpu_limit: cpu_limit.max(1),
            is_containerized: cgroup_source != CgroupSource::None,
            cgroup_source,
        }
    }
}

/// Detect container resource limits, falling back to host totals.
///
/// Never fails: each probing strategy is independent, and the chain
/// terminates at the first strategy that yields a non-zero memory reading,
/// or falls through to host fallback.
pub fn detect() -> Resources {
    CgroupProbe::default().detect()
}

/// Probes cgroup hierarchies rooted at configurable paths. The default
/// paths are the real filesystem locations; tests construct a `CgroupProbe`
/// pointed at a tempdir so the v2/v1/host chain is exercised without
/// touching `/sys`.
pub struct CgroupProbe {
    v2_root: PathBuf,
    v1_memory_root: PathBuf,
    v1_cpu_root: PathBuf,
    meminfo_path: PathBuf,
}

impl Default for CgroupProbe {
    fn default() -> Self {
        Self {
            v2_root: PathBuf::from(DEFAULT_CGROUP_ROOT),
            v1_memory_root: PathBuf::from(DEFAULT_CGROUP_V1_MEMORY),
            v1_cpu_root: PathBuf::from(DEFAULT_CGROUP_V1_CPU),
            meminfo_path: PathBuf::from(MEMINFO_PATH),
        }
    }
}

impl CgroupProbe {
    pub fn with_roots(
        v2_root: impl Into<PathBuf>,
        v1_memory_root: impl Into<PathBuf>,
        v1_cpu_root: impl Into<PathBuf>,
        meminfo_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            v2_root: v2_root.into(),
            v1_memory_root: v1_memory_root.into(),
            v1_cpu_root: v1_cpu_root.into(),
            meminfo_path: meminfo_path.into(),
        }
    }

    pub fn detect(&self) -> Resources {
        if let Some(resources) = self.detect_v2() {
            return resources;
        }
        if let Some(resources) = self.detect_v1() {
            return resources;
        }
        self.detect_host()
    }

    fn detect_v2(&self) -> Option<Resources> {
        if !self.v2_root.join("cgroup.controllers").exists() {
            return None;
        }

        let memory_limit_bytes = read_file(&self.v2_root.join("memory.max"))
            .and_then(|s| parse_v2_memory(&s))
            .unwrap_or(0);

        let cpu_limit = read_file(&self.v2_root.join("cpu.max"))
            .and_then(|s| parse_v2_cpu_max(&s))
            .unwrap_or_else(host_cpu_count);

        Some(Resources::new(memory_limit_bytes, cpu_limit, CgroupSource::V2))
    }

    fn detect_v1(&self) -> Option<Resources> {
        let limit_path = self.v1_memory_root.join("memory.limit_in_bytes");
        if !limit_path.exists() {
            return None;
        }

        let memory_limit_bytes = read_file(&limit_path)
            .and_then(|s| parse_v1_memory(&s))
            .unwrap_or(0);

        let quota = read_file(&self.v1_cpu_root.join("cpu.cfs_quota_us")).and_then(|s| parse_i64(&s));
        let period = read_file(&self.v1_cpu_root.join("cpu.cfs_period_us")).and_then(|s| parse_i64(&s));
        let cpu_limit = match (quota, period) {
            (Some(q), Some(p)) if q > 0 && p > 0 => div_ceil(q as u64, p as u64),
            _ => host_cpu_count(),
        };

        Some(Resources::new(memory_limit_bytes, cpu_limit, CgroupSource::V1))
    }

    fn detect_host(&self) -> Resources {
        let memory_limit_bytes = read_file(&self.meminfo_path)
            .and_then(|s| parse_meminfo(&s))
            .unwrap_or(0);

        Resources::new(memory_limit_bytes, host_cpu_count(), CgroupSource::None)
    }
}

fn read_file(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok()
}

/// `memory.max` is either a decimal byte count or the literal `max`.
fn parse_v2_memory(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed == "max" {
        return Some(0);
    }
    trimmed.parse::<u64>().ok().filter(|&v| v > 0)
}

/// `cpu.max` is `"$QUOTA $PERIOD"`, quota may be the literal `max`.
fn parse_v2_cpu_max(raw: &str) -> Option<u64> {
    let mut parts = raw.trim().split_whitespace();
    let quota = parts.next()?;
    let period = parts.next()?;

    if quota == "max" {
        return None;
    }

    let quota: i64 = quota.parse().ok()?;
    let period: i64 = period.parse().ok()?;
    if quota <= 0 || period <= 0 {
        return None;
    }

    Some(div_ceil(quota as u64, period as u64))
}

/// v1 memory limits near i64::MAX are the "unlimited" convention.
fn parse_v1_memory(raw: &str) -> Option<u64> {
    let value: u64 = raw.trim().parse().ok()?;
    if value == 0 {
        return None;
    }
    if value >= V1_UNLIMITED_THRESHOLD {
        return Some(0);
    }
    Some(value)
}

fn parse_i64(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

/// `MemTotal:     16384000 kB` — case-sensitive prefix, whitespace-separated.
fn parse_meminfo(raw: &str) -> Option<u64> {
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

fn div_ceil(numerator: u64, denominator: u64) -> u64 {
    (numerator + denominator - 1) / denominator
}

fn host_cpu_count() -> u64 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u64)
        .unwrap_or(1)
}
