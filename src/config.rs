//! Configuration loading: a primary `pod-init.toml` plus an optional
//! `processes.d/*.yaml` drop-in directory, mirroring the donor's
//! `init.yaml` + `services/*.yaml` split.

use crate::process::ProcessSpec;
use crate::readiness::ReadinessConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Top-level supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodInitConfig {
    /// System-wide configuration
    #[serde(default)]
    pub system: SystemConfig,

    /// Autotuner profile + threshold selection
    #[serde(default)]
    pub tuning: TuningConfig,

    /// Readiness tracker configuration
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// Processes to supervise
    #[serde(default)]
    pub processes: Vec<ProcessSpec>,
}

/// System-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Hostname to set, if running as PID 1
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Mount /proc on startup (only sensible as PID 1)
    #[serde(default)]
    pub mount_proc: bool,

    /// Mount /sys on startup (only sensible as PID 1)
    #[serde(default)]
    pub mount_sys: bool,

    /// Reap orphaned zombie processes (PID 1 responsibility)
    #[serde(default = "default_true")]
    pub reap_zombies: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            mount_proc: false,
            mount_sys: false,
            reap_zombies: default_true(),
        }
    }
}

/// Autotuner selection: which profile to run the Calculator against, and
/// any override of its `max_memory_usage` threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Overrides the profile's `max_memory_usage` when set.
    #[serde(default)]
    pub memory_threshold: Option<f64>,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            memory_threshold: None,
        }
    }
}

fn default_hostname() -> String {
    "pod-init".into()
}

fn default_true() -> bool {
    true
}

fn default_profile() -> String {
    "medium".into()
}

/// Load configuration from `<config_dir>/pod-init.toml`, then merge in any
/// `<config_dir>/processes.d/*.yaml` drop-ins (appended after the inline
/// `processes` list).
pub async fn load_config(config_dir: &Path) -> Result<PodInitConfig> {
    info!("loading configuration from {}", config_dir.display());

    let primary_path = config_dir.join("pod-init.toml");
    let mut config = if primary_path.exists() {
        let contents = tokio::fs::read_to_string(&primary_path)
            .await
            .with_context(|| format!("failed to read {}", primary_path.display()))?;
        let config: PodInitConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", primary_path.display()))?;
        debug!("loaded primary config from {}", primary_path.display());
        config
    } else {
        PodInitConfig {
            system: SystemConfig::default(),
            tuning: TuningConfig::default(),
            readiness: ReadinessConfig::default(),
            processes: Vec::new(),
        }
    };

    let drop_in_dir = config_dir.join("processes.d");
    if drop_in_dir.exists() {
        let mut entries = tokio::fs::read_dir(&drop_in_dir)
            .await
            .with_context(|| format!("failed to read {}", drop_in_dir.display()))?;

        let mut drop_ins = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "yaml" || e == "yml") {
                drop_ins.push(path);
            }
        }
        drop_ins.sort();

        for path in drop_ins {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;

            let process: ProcessSpec = serde_yaml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;

            debug!("loaded process drop-in: {}", process.name);
            config.processes.push(process);
        }
    }

    for process in &config.processes {
        process
            .validate()
            .with_context(|| format!("invalid process spec: {}", process.name))?;
    }

    info!(
        "configuration loaded: {} processes, profile '{}'",
        config.processes.len(),
        config.tuning.profile
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pod-init-config-test-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn missing_config_dir_yields_defaults() {
        let dir = temp_dir("missing");
        let config = load_config(&dir).await.unwrap();
        assert_eq!(config.tuning.profile, "medium");
        assert!(config.processes.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn primary_toml_is_loaded() {
        let dir = temp_dir("primary");
        let mut f = std::fs::File::create(dir.join("pod-init.toml")).unwrap();
        write!(
            f,
            r#"
[tuning]
profile = "heavy"

[[processes]]
name = "web"
exec = "/usr/sbin/php-fpm"
"#
        )
        .unwrap();

        let config = load_config(&dir).await.unwrap();
        assert_eq!(config.tuning.profile, "heavy");
        assert_eq!(config.processes.len(), 1);
        assert_eq!(config.processes[0].name, "web");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn yaml_drop_ins_are_merged_after_primary() {
        let dir = temp_dir("dropins");
        let mut f = std::fs::File::create(dir.join("pod-init.toml")).unwrap();
        write!(
            f,
            r#"
[[processes]]
name = "web"
exec = "/usr/sbin/php-fpm"
"#
        )
        .unwrap();

        std::fs::create_dir_all(dir.join("processes.d")).unwrap();
        let mut g = std::fs::File::create(dir.join("processes.d/worker.yaml")).unwrap();
        write!(g, "name: worker\nexec: /usr/bin/worker\n").unwrap();

        let config = load_config(&dir).await.unwrap();
        assert_eq!(config.processes.len(), 2);
        assert_eq!(config.processes[1].name, "worker");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn invalid_process_spec_is_rejected() {
        let dir = temp_dir("invalid");
        let mut f = std::fs::File::create(dir.join("pod-init.toml")).unwrap();
        write!(
            f,
            r#"
[[processes]]
name = "web"
exec = "/usr/sbin/php-fpm"
dependencies = ["web"]
"#
        )
        .unwrap();

        assert!(load_config(&dir).await.is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
