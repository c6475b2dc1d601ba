//! Process specification and the runtime handle the supervisor drives.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Declarative definition of a supervised child process (from TOML/YAML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Process name (unique identifier, also the readiness-tracker key)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Executable path
    pub exec: String,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Process role
    #[serde(default)]
    pub kind: ProcessKind,

    /// Restart policy
    #[serde(default)]
    pub restart: RestartPolicy,

    /// Maximum restart attempts
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Restart delay in seconds
    #[serde(default = "default_restart_delay")]
    pub restart_delay_sec: u32,

    /// Names of other processes this one depends on
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Environment variables merged on top of the autotuner's PHP_FPM_* pairs
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Working directory
    pub working_dir: Option<PathBuf>,

    /// User to run as
    pub user: Option<String>,

    /// Group to run as
    pub group: Option<String>,

    /// Health check configuration
    #[serde(default)]
    pub health_check: Option<HealthCheckSpec>,

    /// Whether this process's state counts toward the container readiness
    /// verdict. Defaults to true.
    #[serde(default = "default_true")]
    pub readiness_role: bool,
}

impl Default for ProcessSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            exec: String::new(),
            args: Vec::new(),
            kind: ProcessKind::default(),
            restart: RestartPolicy::default(),
            max_restarts: default_max_restarts(),
            restart_delay_sec: default_restart_delay(),
            dependencies: Vec::new(),
            environment: HashMap::new(),
            working_dir: None,
            user: None,
            group: None,
            health_check: None,
            readiness_role: true,
        }
    }
}

fn default_max_restarts() -> u32 {
    5
}

fn default_restart_delay() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl ProcessSpec {
    /// Validate the process specification
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("process name cannot be empty");
        }

        if self.exec.is_empty() {
            bail!("process {} has no executable", self.name);
        }

        if self.dependencies.contains(&self.name) {
            bail!("process {} cannot depend on itself", self.name);
        }

        Ok(())
    }
}

/// Role a process plays in the container.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    /// Front-facing request handler (e.g. PHP-FPM, nginx)
    #[default]
    Web,
    /// Background application worker
    Worker,
    /// Consumer draining a message queue
    QueueConsumer,
    /// Periodic/cron-style scheduler
    Scheduler,
    /// Runs once to completion and is not restarted
    Oneshot,
}

/// Restart policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Never restart
    Never,
    /// Always restart
    #[default]
    Always,
    /// Restart on failure only
    OnFailure,
    /// Restart on abnormal exit
    OnAbnormal,
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// Check kind
    #[serde(rename = "type")]
    pub kind: HealthCheckKind,

    /// Interval between checks
    #[serde(default = "default_health_interval")]
    pub interval_sec: u32,

    /// Timeout for each check
    #[serde(default = "default_health_timeout")]
    pub timeout_sec: u32,

    /// Consecutive failures before marking unhealthy
    #[serde(default = "default_health_retries")]
    pub retries: u32,
}

fn default_health_interval() -> u32 {
    30
}

fn default_health_timeout() -> u32 {
    10
}

fn default_health_retries() -> u32 {
    3
}

/// Health check kinds. `socket` and `ipc` variants are not carried forward —
/// this supervisor has no IPC layer for them to check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckKind {
    /// HTTP GET request
    Http { url: String, expected_status: Option<u16> },
    /// TCP connection
    Tcp { host: String, port: u16 },
    /// Execute command, success means exit code 0
    Command { cmd: String, args: Vec<String> },
}

/// Runtime process state as observed by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRuntimeState {
    /// Not started
    Stopped,
    /// Starting up
    Starting,
    /// Running and passing health checks (or no health check configured)
    Running,
    /// Running but failing health checks
    Unhealthy,
    /// Stopping
    Stopping,
    /// Failed to start, or exited abnormally
    Failed,
    /// Restarting
    Restarting,
}

/// A supervised process instance.
pub struct Process {
    /// Static specification
    pub spec: ProcessSpec,
    /// Current state
    pub state: ProcessRuntimeState,
    /// Child process handle
    child: Option<Child>,
    /// Process ID
    pub pid: Option<u32>,
    /// Start time
    pub started_at: Option<Instant>,
    /// Restart count
    pub restart_count: u32,
    /// Last error, if any
    pub last_error: Option<String>,
}

impl Process {
    /// Create a new process instance from spec
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            state: ProcessRuntimeState::Stopped,
            child: None,
            pid: None,
            started_at: None,
            restart_count: 0,
            last_error: None,
        }
    }

    /// Spawn the process.
    pub async fn start(&mut self) -> Result<()> {
        if self.state == ProcessRuntimeState::Running {
            debug!("process {} already running", self.spec.name);
            return Ok(());
        }

        info!("starting process: {}", self.spec.name);
        self.state = ProcessRuntimeState::Starting;

        let mut cmd = Command::new(&self.spec.exec);
        cmd.args(&self.spec.args);

        for (key, value) in &self.spec.environment {
            cmd.env(key, value);
        }

        if let Some(ref dir) = self.spec.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        match cmd.spawn() {
            Ok(child) => {
                self.pid = child.id();
                self.child = Some(child);
                self.started_at = Some(Instant::now());
                self.state = ProcessRuntimeState::Running;
                info!("process {} started with PID {:?}", self.spec.name, self.pid);
                Ok(())
            }
            Err(e) => {
                self.state = ProcessRuntimeState::Failed;
                self.last_error = Some(e.to_string());
                error!("failed to start process {}: {}", self.spec.name, e);
                Err(e.into())
            }
        }
    }

    /// Stop the process: SIGTERM, wait, then SIGKILL on timeout.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == ProcessRuntimeState::Stopped {
            return Ok(());
        }

        info!("stopping process: {}", self.spec.name);
        self.state = ProcessRuntimeState::Stopping;

        if let Some(ref mut child) = self.child {
            #[cfg(unix)]
            {
                if let Some(pid) = self.pid {
                    let _ = nix::sys::signal::kill(
                        nix::unistd::Pid::from_raw(pid as i32),
                        nix::sys::signal::Signal::SIGTERM,
                    );
                }
            }

            let result = tokio::time::timeout(Duration::from_secs(10), child.wait()).await;

            match result {
                Ok(Ok(status)) => {
                    info!("process {} exited with status: {}", self.spec.name, status);
                }
                Ok(Err(e)) => {
                    warn!("error waiting for process {}: {}", self.spec.name, e);
                }
                Err(_) => {
                    warn!(
                        "process {} did not stop gracefully, sending SIGKILL",
                        self.spec.name
                    );
                    let _ = child.kill().await;
                }
            }
        }

        self.child = None;
        self.pid = None;
        self.state = ProcessRuntimeState::Stopped;

        Ok(())
    }

    /// Stop, wait out the restart delay, then start again.
    pub async fn restart(&mut self) -> Result<()> {
        self.state = ProcessRuntimeState::Restarting;
        self.stop().await?;

        tokio::time::sleep(Duration::from_secs(self.spec.restart_delay_sec as u64)).await;

        self.restart_count += 1;
        self.start().await
    }

    /// Reap without blocking; updates state if the child has exited.
    pub async fn check_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.child {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!("process {} exited with status: {}", self.spec.name, status);
                    self.state = if status.success() {
                        ProcessRuntimeState::Stopped
                    } else {
                        ProcessRuntimeState::Failed
                    };
                    self.child = None;
                    self.pid = None;
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    error!("error checking process {}: {}", self.spec.name, e);
                    false
                }
            }
        } else {
            false
        }
    }

    /// Whether the supervisor should restart this process given its policy
    /// and current state.
    pub fn should_restart(&self) -> bool {
        if self.restart_count >= self.spec.max_restarts {
            return false;
        }

        match self.spec.restart {
            RestartPolicy::Always => true,
            RestartPolicy::OnFailure => self.state == ProcessRuntimeState::Failed,
            RestartPolicy::OnAbnormal => {
                self.state == ProcessRuntimeState::Failed
                    || self.state == ProcessRuntimeState::Unhealthy
            }
            RestartPolicy::Never => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ProcessSpec {
        ProcessSpec {
            name: name.to_string(),
            exec: "/bin/true".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_name_fails_validation() {
        let s = spec("");
        assert!(s.validate().is_err());
    }

    #[test]
    fn empty_exec_fails_validation() {
        let mut s = spec("web");
        s.exec = String::new();
        assert!(s.validate().is_err());
    }

    #[test]
    fn self_dependency_fails_validation() {
        let mut s = spec("web");
        s.dependencies.push("web".to_string());
        assert!(s.validate().is_err());
    }

    #[test]
    fn valid_spec_passes() {
        assert!(spec("web").validate().is_ok());
    }

    #[test]
    fn defaults_are_readiness_role_and_always_restart() {
        let s = spec("web");
        assert!(s.readiness_role);
        assert_eq!(s.restart, RestartPolicy::Always);
        assert_eq!(s.kind, ProcessKind::Web);
    }

    #[test]
    fn should_restart_respects_max_restarts() {
        let mut p = Process::new(spec("web"));
        p.restart_count = p.spec.max_restarts;
        assert!(!p.should_restart());
    }

    #[test]
    fn never_policy_never_restarts() {
        let mut s = spec("oneshot-job");
        s.restart = RestartPolicy::Never;
        let p = Process::new(s);
        assert!(!p.should_restart());
    }

    #[test]
    fn on_failure_policy_only_restarts_on_failed_state() {
        let mut s = spec("worker");
        s.restart = RestartPolicy::OnFailure;
        let mut p = Process::new(s);
        assert!(!p.should_restart());
        p.state = ProcessRuntimeState::Failed;
        assert!(p.should_restart());
    }
}
