//! Readiness Tracker: translate a stream of process state updates into a
//! single container-level ready/not-ready verdict, published as a
//! filesystem marker file an orchestrator probe can check for existence.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::{PodInitError, Result};

/// Per-process lifecycle state, caller-driven — the tracker enforces no
/// temporal ordering on transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Running,
    Healthy,
    Unhealthy,
    Failed,
}

/// Health-probe result, independent of lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// A single tracked process entry, keyed by name in the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedProcess {
    pub name: String,
    pub state: ProcessState,
    pub health: HealthStatus,
}

/// Policy mapping per-process states to the container-wide ready verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessMode {
    /// `Running` or `Healthy` counts as ready; health is ignored.
    AllRunning,
    /// `Healthy`, or `Running` with `health == Healthy`, counts as ready.
    AllHealthy,
}

impl Default for ReadinessMode {
    fn default() -> Self {
        ReadinessMode::AllHealthy
    }
}

/// A process entry is ready under `mode` — see §4.D of the specification.
/// Under `AllHealthy`, a process whose state is `Healthy` is authoritative
/// even if its `health` field independently reads `Unhealthy`: the state
/// machine transition to `Healthy` is what a probe observed most recently,
/// so it wins over a stale health field.
fn process_ready(entry: &TrackedProcess, mode: ReadinessMode) -> bool {
    match mode {
        ReadinessMode::AllRunning => {
            matches!(entry.state, ProcessState::Running | ProcessState::Healthy)
        }
        ReadinessMode::AllHealthy => {
            entry.state == ProcessState::Healthy
                || (entry.state == ProcessState::Running && entry.health == HealthStatus::Healthy)
        }
    }
}

/// Tracker configuration, supplied by the config loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_marker_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub mode: ReadinessMode,
    /// Explicit allow-list of process names; empty means "track all comers".
    #[serde(default)]
    pub processes: Vec<String>,
    /// Literal marker file content; `None` uses the default
    /// `"ready\ntimestamp=<unix>\n"` format.
    #[serde(default)]
    pub content: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_marker_path() -> PathBuf {
    PathBuf::from("/tmp/pod-init-ready")
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            path: default_marker_path(),
            mode: ReadinessMode::default(),
            processes: Vec::new(),
            content: None,
        }
    }
}

struct TrackerState {
    processes: HashMap<String, TrackedProcess>,
    last_published: bool,
}

/// Container readiness tracker.
///
/// Internal storage is a single `RwLock` guarding both the tracked-process
/// map and the last-published verdict together, so edge detection and the
/// marker-file write/remove happen under one write-lock acquisition — the
/// published marker state is always a linearizable reflection of the
/// verdict (§5).
pub struct ReadinessTracker {
    config: ReadinessConfig,
    state: RwLock<TrackerState>,
}

impl ReadinessTracker {
    pub fn new(config: ReadinessConfig) -> Self {
        Self {
            config,
            state: RwLock::new(TrackerState {
                processes: HashMap::new(),
                last_published: false,
            }),
        }
    }

    /// Ensure the marker's parent directory exists and remove any stale
    /// marker left behind from a previous run — the container begins
    /// "not ready". No-op when disabled.
    pub fn start(&self) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        if let Some(parent) = self.config.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| {
                    PodInitError::DirectoryCreationFailed {
                        path: parent.display().to_string(),
                        source,
                    }
                })?;
            }
        }

        let mut state = self.state.write().expect("readiness tracker lock poisoned");
        remove_marker_if_present(&self.config.path);
        state.last_published = false;
        Ok(())
    }

    /// Remove the marker file. Idempotent; absence is not an error.
    pub fn stop(&self) {
        if !self.config.enabled {
            return;
        }
        let mut state = self.state.write().expect("readiness tracker lock poisoned");
        remove_marker_if_present(&self.config.path);
        state.last_published = false;
    }

    /// Replace the tracked set wholesale. Each entry starts as
    /// `{state: Stopped, health: Unknown}`.
    pub fn set_tracked(&self, names: &[String]) {
        let mut state = self.state.write().expect("readiness tracker lock poisoned");
        state.processes = names
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    TrackedProcess {
                        name: name.clone(),
                        state: ProcessState::Stopped,
                        health: HealthStatus::Unknown,
                    },
                )
            })
            .collect();
        self.reevaluate_locked(&mut state);
    }

    /// Upsert a single process's state, subject to the filter rule: already
    /// tracked names are always accepted; new names are accepted only in
    /// track-all mode (`config.processes` empty), otherwise silently
    /// dropped. No-op when disabled.
    pub fn update(&self, name: &str, proc_state: ProcessState, health: HealthStatus) {
        if !self.config.enabled {
            return;
        }

        let mut state = self.state.write().expect("readiness tracker lock poisoned");
        let already_tracked = state.processes.contains_key(name);
        let track_all = self.config.processes.is_empty();

        if !already_tracked && !track_all {
            return;
        }

        state.processes.insert(
            name.to_string(),
            TrackedProcess {
                name: name.to_string(),
                state: proc_state,
                health,
            },
        );
        self.reevaluate_locked(&mut state);
    }

    /// Remove a tracked process.
    pub fn remove(&self, name: &str) {
        let mut state = self.state.write().expect("readiness tracker lock poisoned");
        state.processes.remove(name);
        self.reevaluate_locked(&mut state);
    }

    /// Current ready verdict.
    pub fn is_ready(&self) -> bool {
        self.state.read().expect("readiness tracker lock poisoned").last_published
    }

    /// An independent copy of the tracked process map; mutating it never
    /// affects the tracker.
    pub fn status(&self) -> HashMap<String, TrackedProcess> {
        self.state
            .read()
            .expect("readiness tracker lock poisoned")
            .processes
            .clone()
    }

    /// Empty tracked set is never ready (avoids "ready by vacuity" during
    /// startup); otherwise every entry must satisfy `process_ready`.
    fn compute_verdict(&self, state: &TrackerState) -> bool {
        !state.processes.is_empty()
            && state
                .processes
                .values()
                .all(|entry| process_ready(entry, self.config.mode))
    }

    fn reevaluate_locked(&self, state: &mut TrackerState) {
        let verdict = self.compute_verdict(state);

        if verdict == state.last_published {
            return;
        }

        if !self.config.enabled {
            state.last_published = verdict;
            return;
        }

        if verdict {
            if let Err(source) = write_marker(&self.config.path, self.config.content.as_deref()) {
                let err = PodInitError::FilesystemTransient {
                    path: self.config.path.display().to_string(),
                    source,
                };
                error!("{err}");
            }
        } else {
            remove_marker_if_present(&self.config.path);
        }

        state.last_published = verdict;
    }
}

fn default_marker_content() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("ready\ntimestamp={now}\n")
}

fn write_marker(path: &Path, content: Option<&str>) -> std::io::Result<()> {
    let text = content.map(str::to_string).unwrap_or_else(default_marker_content);
    fs::write(path, text)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
    }

    Ok(())
}

/// Removes the marker if present; missing-file errors are not logged, only
/// genuinely unexpected ones are (§7 `FilesystemTransient`).
fn remove_marker_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            let err = PodInitError::FilesystemTransient {
                path: path.display().to_string(),
                source,
            };
            error!("{err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_marker_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "pod-init-readiness-test-{}-{}-{}",
            name,
            std::process::id(),
            name.len()
        ))
    }

    fn config_for(path: PathBuf, mode: ReadinessMode, processes: Vec<String>) -> ReadinessConfig {
        ReadinessConfig {
            enabled: true,
            path,
            mode,
            processes,
            content: None,
        }
    }

    // P8: empty tracked set is never ready.
    #[test]
    fn p8_empty_tracked_set_is_not_ready() {
        let tracker = ReadinessTracker::new(config_for(
            temp_marker_path("p8"),
            ReadinessMode::AllHealthy,
            vec![],
        ));
        assert!(!tracker.is_ready());
    }

    // P7: all-running mode is satisfied by Running or Healthy.
    #[test]
    fn p7_all_running_satisfied_by_running_or_healthy() {
        let path = temp_marker_path("p7");
        let tracker = ReadinessTracker::new(config_for(
            path.clone(),
            ReadinessMode::AllRunning,
            vec![],
        ));
        tracker.start().unwrap();
        tracker.update("a", ProcessState::Running, HealthStatus::Unknown);
        tracker.update("b", ProcessState::Healthy, HealthStatus::Unhealthy);
        assert!(tracker.is_ready());
        assert!(path.exists());
        let _ = fs::remove_file(&path);
    }

    // P9: status() returns a deep copy.
    #[test]
    fn p9_status_is_a_deep_copy() {
        let tracker = ReadinessTracker::new(config_for(
            temp_marker_path("p9"),
            ReadinessMode::AllHealthy,
            vec![],
        ));
        tracker.update("a", ProcessState::Running, HealthStatus::Healthy);
        let mut snapshot = tracker.status();
        snapshot.insert(
            "b".to_string(),
            TrackedProcess {
                name: "b".to_string(),
                state: ProcessState::Healthy,
                health: HealthStatus::Healthy,
            },
        );
        assert_eq!(tracker.status().len(), 1);
    }

    // S5
    #[test]
    fn s5_all_healthy_marker_lifecycle() {
        let path = temp_marker_path("s5");
        let tracker = ReadinessTracker::new(config_for(
            path.clone(),
            ReadinessMode::AllHealthy,
            vec!["php-fpm".to_string()],
        ));
        tracker.start().unwrap();

        tracker.update("php-fpm", ProcessState::Running, HealthStatus::Unknown);
        assert!(!tracker.is_ready());
        assert!(!path.exists());

        tracker.update("php-fpm", ProcessState::Running, HealthStatus::Healthy);
        assert!(tracker.is_ready());
        assert!(path.exists());

        tracker.update("php-fpm", ProcessState::Unhealthy, HealthStatus::Unhealthy);
        assert!(!tracker.is_ready());
        assert!(!path.exists());

        let _ = fs::remove_file(&path);
    }

    // S6
    #[test]
    fn s6_all_running_remove_transitions() {
        let path = temp_marker_path("s6");
        let tracker = ReadinessTracker::new(config_for(
            path.clone(),
            ReadinessMode::AllRunning,
            vec!["php-fpm".to_string(), "nginx".to_string()],
        ));
        tracker.start().unwrap();

        tracker.update("php-fpm", ProcessState::Running, HealthStatus::Unknown);
        assert!(!tracker.is_ready());

        tracker.update("nginx", ProcessState::Running, HealthStatus::Unknown);
        assert!(tracker.is_ready());

        tracker.remove("nginx");
        assert!(tracker.is_ready());

        tracker.remove("php-fpm");
        assert!(!tracker.is_ready());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn update_on_untracked_name_is_dropped_in_allowlist_mode() {
        let tracker = ReadinessTracker::new(config_for(
            temp_marker_path("allowlist"),
            ReadinessMode::AllHealthy,
            vec!["only-this-one".to_string()],
        ));
        tracker.update("something-else", ProcessState::Healthy, HealthStatus::Healthy);
        assert!(!tracker.status().contains_key("something-else"));
    }

    #[test]
    fn update_on_already_tracked_name_is_always_accepted() {
        let tracker = ReadinessTracker::new(config_for(
            temp_marker_path("already-tracked"),
            ReadinessMode::AllHealthy,
            vec!["only-this-one".to_string()],
        ));
        tracker.set_tracked(&["only-this-one".to_string(), "extra".to_string()]);
        tracker.update("extra", ProcessState::Healthy, HealthStatus::Healthy);
        assert!(tracker.status().contains_key("extra"));
    }

    #[test]
    fn disabled_tracker_never_touches_filesystem() {
        let path = temp_marker_path("disabled");
        let tracker = ReadinessTracker::new(ReadinessConfig {
            enabled: false,
            path: path.clone(),
            mode: ReadinessMode::AllHealthy,
            processes: vec![],
            content: None,
        });
        tracker.start().unwrap();
        tracker.update("x", ProcessState::Healthy, HealthStatus::Healthy);
        assert!(!path.exists());
    }

    #[test]
    fn healthy_state_is_authoritative_over_stale_unhealthy_field() {
        let tracker = ReadinessTracker::new(config_for(
            temp_marker_path("authoritative"),
            ReadinessMode::AllHealthy,
            vec![],
        ));
        tracker.update("svc", ProcessState::Healthy, HealthStatus::Unhealthy);
        assert!(tracker.is_ready());
    }

    #[test]
    fn custom_marker_content_is_written_verbatim() {
        let path = temp_marker_path("custom-content");
        let tracker = ReadinessTracker::new(ReadinessConfig {
            enabled: true,
            path: path.clone(),
            mode: ReadinessMode::AllRunning,
            processes: vec![],
            content: Some("UP\n".to_string()),
        });
        tracker.start().unwrap();
        tracker.update("svc", ProcessState::Running, HealthStatus::Unknown);
        assert_eq!(fs::read(&path).unwrap(), b"UP\n");
        let _ = fs::remove_file(&path);
    }
}
