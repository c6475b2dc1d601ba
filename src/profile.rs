//! Profile Table: a static catalog of named workload profiles.

use crate::error::{PodInitError, Result};

/// Process-manager mode a profile drives the Calculator toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessManagerType {
    Static,
    Dynamic,
    #[allow(dead_code)]
    OnDemand,
}

/// Static per-profile constants. Only `Calculator` reads these; profiles
/// themselves never change at runtime.
#[derive(Debug, Clone, Copy)]
pub struct ProfileConfig {
    pub name: &'static str,
    pub description: &'static str,
    pub avg_memory_per_worker_mb: u64,
    pub opcache_memory_mb: u64,
    pub reserved_memory_mb: u64,
    pub max_memory_usage: f64,
    pub min_workers: u32,
    pub max_workers: u32,
    pub process_manager_type: ProcessManagerType,
    pub spare_min_ratio: f64,
    pub spare_max_ratio: f64,
    pub start_servers_ratio: f64,
    pub max_requests_per_child: u32,
}

const DEV: ProfileConfig = ProfileConfig {
    name: "dev",
    description: "Single-developer container: fixed tiny pool, fast recycle",
    avg_memory_per_worker_mb: 32,
    opcache_memory_mb: 32,
    reserved_memory_mb: 64,
    max_memory_usage: 0.50,
    min_workers: 2,
    max_workers: 2,
    process_manager_type: ProcessManagerType::Static,
    spare_min_ratio: 0.0,
    spare_max_ratio: 0.0,
    start_servers_ratio: 0.0,
    max_requests_per_child: 0,
};

const LIGHT: ProfileConfig = ProfileConfig {
    name: "light",
    description: "Low-traffic service: conservative dynamic pool",
    avg_memory_per_worker_mb: 24,
    opcache_memory_mb: 64,
    reserved_memory_mb: 128,
    max_memory_usage: 0.70,
    min_workers: 2,
    max_workers: 8,
    process_manager_type: ProcessManagerType::Dynamic,
    spare_min_ratio: 0.25,
    spare_max_ratio: 0.75,
    start_servers_ratio: 0.50,
    max_requests_per_child: 500,
};

const MEDIUM: ProfileConfig = ProfileConfig {
    name: "medium",
    description: "General-purpose web workload",
    avg_memory_per_worker_mb: 32,
    opcache_memory_mb: 128,
    reserved_memory_mb: 256,
    max_memory_usage: 0.75,
    min_workers: 4,
    max_workers: 32,
    process_manager_type: ProcessManagerType::Dynamic,
    spare_min_ratio: 0.25,
    spare_max_ratio: 0.75,
    start_servers_ratio: 0.50,
    max_requests_per_child: 1000,
};

const HEAVY: ProfileConfig = ProfileConfig {
    name: "heavy",
    description: "High-throughput service: larger reserved/opcache budget",
    avg_memory_per_worker_mb: 48,
    opcache_memory_mb: 256,
    reserved_memory_mb: 512,
    max_memory_usage: 0.80,
    min_workers: 8,
    max_workers: 128,
    process_manager_type: ProcessManagerType::Dynamic,
    spare_min_ratio: 0.20,
    spare_max_ratio: 0.60,
    start_servers_ratio: 0.40,
    max_requests_per_child: 2000,
};

const BURSTY: ProfileConfig = ProfileConfig {
    name: "bursty",
    description: "Spiky traffic: wide spare ratios, eager start",
    avg_memory_per_worker_mb: 32,
    opcache_memory_mb: 128,
    reserved_memory_mb: 256,
    max_memory_usage: 0.75,
    min_workers: 4,
    max_workers: 64,
    process_manager_type: ProcessManagerType::Dynamic,
    spare_min_ratio: 0.10,
    spare_max_ratio: 0.90,
    start_servers_ratio: 0.30,
    max_requests_per_child: 1000,
};

const PROFILES: &[ProfileConfig] = &[DEV, LIGHT, MEDIUM, HEAVY, BURSTY];

/// Look up a profile by name. Names are case-sensitive.
pub fn get(name: &str) -> Result<ProfileConfig> {
    PROFILES
        .iter()
        .find(|p| p.name == name)
        .copied()
        .ok_or_else(|| PodInitError::UnknownProfile(name.to_string()))
}

/// Validate that a profile name exists, without returning its config.
pub fn validate(name: &str) -> Result<()> {
    get(name).map(|_| ())
}

/// Names of all built-in profiles, in catalog order.
pub fn names() -> Vec<&'static str> {
    PROFILES.iter().map(|p| p.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_builtins_resolve() {
        for name in ["dev", "light", "medium", "heavy", "bursty"] {
            assert!(get(name).is_ok(), "profile {name} should resolve");
        }
    }

    #[test]
    fn unknown_profile_is_an_error() {
        assert!(get("nonexistent").is_err());
        assert!(validate("nonexistent").is_err());
    }

    #[test]
    fn lookup_is_case_sensitive() {
        assert!(get("Medium").is_err());
        assert!(get("MEDIUM").is_err());
    }

    #[test]
    fn dev_is_static_with_no_recycle() {
        let dev = get("dev").unwrap();
        assert_eq!(dev.process_manager_type, ProcessManagerType::Static);
        assert_eq!(dev.max_requests_per_child, 0);
        assert_eq!(dev.min_workers, dev.max_workers);
    }

    #[test]
    fn dynamic_profiles_have_nonzero_ratios() {
        for name in ["light", "medium", "heavy", "bursty"] {
            let profile = get(name).unwrap();
            assert_eq!(profile.process_manager_type, ProcessManagerType::Dynamic);
            assert!(profile.spare_min_ratio > 0.0);
            assert!(profile.spare_max_ratio > profile.spare_min_ratio);
        }
    }
}
