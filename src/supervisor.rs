//! Process supervisor: spawns, reaps, and restarts tracked processes in
//! dependency order and feeds every state transition to the readiness
//! tracker.

use crate::config::PodInitConfig;
use crate::dependency::DependencyGraph;
use crate::health;
use crate::process::{Process, ProcessRuntimeState, ProcessSpec};
use crate::readiness::{HealthStatus, ProcessState as ReadinessState, ReadinessTracker};
use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Events emitted by the supervisor, for observability/logging consumers.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    ProcessStarted { name: String, pid: u32 },
    ProcessStopped { name: String },
    ProcessFailed { name: String, error: String },
    ProcessRestarting { name: String, attempt: u32 },
    AllProcessesStarted,
    ShutdownInitiated,
    ShutdownComplete,
}

/// Process supervisor
pub struct Supervisor {
    config: PodInitConfig,
    dep_graph: DependencyGraph,
    processes: DashMap<String, Process>,
    readiness: Arc<ReadinessTracker>,
    events: broadcast::Sender<SupervisorEvent>,
    shutdown: Arc<tokio::sync::Notify>,
}

impl Supervisor {
    pub fn new(config: PodInitConfig, dep_graph: DependencyGraph, readiness: Arc<ReadinessTracker>) -> Self {
        let (events, _) = broadcast::channel(256);

        Self {
            config,
            dep_graph,
            processes: DashMap::new(),
            readiness,
            events,
            shutdown: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Subscribe to supervisor events
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Start all processes in dependency order
    pub async fn start_all(&mut self) -> Result<()> {
        info!("starting all processes");

        let readiness_names: Vec<String> = self
            .config
            .processes
            .iter()
            .filter(|p| p.readiness_role)
            .map(|p| p.name.clone())
            .collect();
        self.readiness.set_tracked(&readiness_names);

        let order = self.dep_graph.topological_order()?;

        for process_name in order {
            let spec = self
                .config
                .processes
                .iter()
                .find(|s| s.name == process_name)
                .cloned();

            if let Some(spec) = spec {
                self.start_process(&spec).await?;
            }
        }

        info!("all processes started");
        let _ = self.events.send(SupervisorEvent::AllProcessesStarted);

        Ok(())
    }

    /// Start a single process, after verifying its dependencies are running
    pub async fn start_process(&mut self, spec: &ProcessSpec) -> Result<()> {
        let name = spec.name.clone();

        for dep in &spec.dependencies {
            let dep_running = self
                .processes
                .get(dep)
                .map(|p| p.state == ProcessRuntimeState::Running)
                .unwrap_or(false);

            if !dep_running {
                error!("cannot start {}: dependency {} is not running", name, dep);
                return Err(anyhow::anyhow!("dependency {} not running", dep));
            }
        }

        let mut process = Process::new(spec.clone());
        process.start().await?;

        if let Some(pid) = process.pid {
            let _ = self.events.send(SupervisorEvent::ProcessStarted {
                name: name.clone(),
                pid,
            });
        }

        self.publish_readiness(spec, process.state, None);
        self.processes.insert(name, process);

        Ok(())
    }

    /// Stop a process
    pub async fn stop_process(&self, name: &str) -> Result<()> {
        if let Some(mut process) = self.processes.get_mut(name) {
            process.stop().await?;
            let _ = self.events.send(SupervisorEvent::ProcessStopped {
                name: name.to_string(),
            });
            self.readiness.remove(name);
        }
        Ok(())
    }

    /// Stop all processes in reverse dependency order
    pub async fn stop_all(&self) -> Result<()> {
        info!("stopping all processes");
        let _ = self.events.send(SupervisorEvent::ShutdownInitiated);

        let order = self.dep_graph.topological_order()?;

        for process_name in order.into_iter().rev() {
            self.stop_process(&process_name).await?;
        }

        let _ = self.events.send(SupervisorEvent::ShutdownComplete);
        info!("all processes stopped");

        Ok(())
    }

    /// Main supervisor loop: reap + restart on a 1s tick, health-check on a
    /// 30s tick, exit on SIGTERM/SIGINT or an internal shutdown request.
    pub async fn run(&mut self) -> Result<()> {
        info!("supervisor entering main loop");

        let mut check_interval = tokio::time::interval(Duration::from_secs(1));
        let mut health_interval = tokio::time::interval(Duration::from_secs(30));

        #[cfg(unix)]
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        #[cfg(unix)]
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

        loop {
            tokio::select! {
                _ = check_interval.tick() => {
                    self.check_processes().await;
                }

                _ = health_interval.tick() => {
                    self.run_health_checks().await;
                }

                _ = sigterm.recv() => {
                    info!("received SIGTERM, initiating shutdown");
                    break;
                }

                _ = sigint.recv() => {
                    info!("received SIGINT, initiating shutdown");
                    break;
                }

                _ = self.shutdown.notified() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        self.stop_all().await?;

        Ok(())
    }

    /// Reap exited children and restart the ones whose policy allows it.
    async fn check_processes(&mut self) {
        let mut to_restart = Vec::new();

        for mut entry in self.processes.iter_mut() {
            let name = entry.key().clone();
            let process = entry.value_mut();

            if !process.check_alive().await {
                self.readiness.update(&name, ReadinessState::Failed, HealthStatus::Unknown);
                if process.should_restart() {
                    to_restart.push(name);
                }
            }
        }

        for name in to_restart {
            if let Some(mut process) = self.processes.get_mut(&name) {
                let attempt = process.restart_count + 1;
                let _ = self.events.send(SupervisorEvent::ProcessRestarting {
                    name: name.clone(),
                    attempt,
                });

                if let Err(e) = process.restart().await {
                    error!("failed to restart process {}: {}", name, e);
                    self.readiness.update(&name, ReadinessState::Failed, HealthStatus::Unknown);
                    let _ = self.events.send(SupervisorEvent::ProcessFailed {
                        name,
                        error: e.to_string(),
                    });
                } else {
                    self.publish_readiness(&process.spec.clone(), process.state, None);
                }
            }
        }
    }

    /// Run configured health checks against running processes and feed
    /// results into the readiness tracker.
    async fn run_health_checks(&self) {
        for entry in self.processes.iter() {
            let process = entry.value();

            if process.state != ProcessRuntimeState::Running {
                continue;
            }

            let Some(ref health_check) = process.spec.health_check else {
                continue;
            };

            debug!("running health check for {}", process.spec.name);
            let result = health::run_health_check(health_check).await;

            let health_status = if result.healthy {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            };

            self.publish_readiness(&process.spec, process.state, Some(health_status));
        }
    }

    /// Translate a process's runtime state (plus an optional fresh health
    /// result) into the readiness tracker's vocabulary and push it.
    ///
    /// A process with no configured health check is considered healthy the
    /// moment it's running — there's nothing else to probe.
    fn publish_readiness(
        &self,
        spec: &ProcessSpec,
        runtime_state: ProcessRuntimeState,
        health_result: Option<HealthStatus>,
    ) {
        if !spec.readiness_role {
            return;
        }

        let (state, health) = match runtime_state {
            ProcessRuntimeState::Running => match health_result {
                Some(HealthStatus::Healthy) => (ReadinessState::Healthy, HealthStatus::Healthy),
                Some(HealthStatus::Unhealthy) => (ReadinessState::Running, HealthStatus::Unhealthy),
                Some(HealthStatus::Unknown) | None if spec.health_check.is_none() => {
                    (ReadinessState::Healthy, HealthStatus::Healthy)
                }
                _ => (ReadinessState::Running, HealthStatus::Unknown),
            },
            ProcessRuntimeState::Unhealthy => (ReadinessState::Unhealthy, HealthStatus::Unhealthy),
            ProcessRuntimeState::Failed => (ReadinessState::Failed, HealthStatus::Unknown),
            ProcessRuntimeState::Stopped | ProcessRuntimeState::Stopping => {
                (ReadinessState::Stopped, HealthStatus::Unknown)
            }
            ProcessRuntimeState::Starting | ProcessRuntimeState::Restarting => {
                (ReadinessState::Running, HealthStatus::Unknown)
            }
        };

        self.readiness.update(&spec.name, state, health);
    }

    /// Request shutdown
    pub fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Get a process's current runtime state
    pub fn get_status(&self, name: &str) -> Option<ProcessRuntimeState> {
        self.processes.get(name).map(|p| p.state)
    }

    /// Get every process's current runtime state
    pub fn get_all_status(&self) -> Vec<(String, ProcessRuntimeState)> {
        self.processes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::ReadinessConfig;

    fn test_spec(name: &str, health_check: Option<crate::process::HealthCheckSpec>) -> ProcessSpec {
        ProcessSpec {
            name: name.to_string(),
            exec: "/bin/true".to_string(),
            health_check,
            ..Default::default()
        }
    }

    fn tracker() -> Arc<ReadinessTracker> {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "pod-init-supervisor-test-{}-{}",
            std::process::id(),
            n
        ));
        Arc::new(ReadinessTracker::new(ReadinessConfig {
            enabled: true,
            path,
            ..Default::default()
        }))
    }

    fn supervisor() -> Supervisor {
        let config = PodInitConfig {
            system: crate::config::SystemConfig::default(),
            tuning: crate::config::TuningConfig::default(),
            readiness: ReadinessConfig::default(),
            processes: Vec::new(),
        };
        Supervisor::new(config, DependencyGraph::new(), tracker())
    }

    #[test]
    fn process_without_health_check_is_published_as_healthy_once_running() {
        let sup = supervisor();
        let spec = test_spec("web", None);
        sup.publish_readiness(&spec, ProcessRuntimeState::Running, None);
        let status = sup.readiness.status();
        let entry = status.get("web").unwrap();
        assert_eq!(entry.state, ReadinessState::Healthy);
        assert_eq!(entry.health, HealthStatus::Healthy);
    }

    #[test]
    fn process_with_failing_health_check_stays_running_not_healthy() {
        let sup = supervisor();
        let spec = test_spec(
            "web",
            Some(crate::process::HealthCheckSpec {
                kind: crate::process::HealthCheckKind::Tcp {
                    host: "127.0.0.1".to_string(),
                    port: 1,
                },
                interval_sec: 30,
                timeout_sec: 5,
                retries: 3,
            }),
        );
        sup.publish_readiness(&spec, ProcessRuntimeState::Running, Some(HealthStatus::Unhealthy));
        let status = sup.readiness.status();
        let entry = status.get("web").unwrap();
        assert_eq!(entry.state, ReadinessState::Running);
        assert_eq!(entry.health, HealthStatus::Unhealthy);
    }

    #[test]
    fn readiness_role_false_is_never_published() {
        let sup = supervisor();
        let mut spec = test_spec("sidecar", None);
        spec.readiness_role = false;
        sup.publish_readiness(&spec, ProcessRuntimeState::Running, None);
        assert!(!sup.readiness.status().contains_key("sidecar"));
    }

    #[test]
    fn failed_process_is_published_as_failed() {
        let sup = supervisor();
        let spec = test_spec("worker", None);
        sup.publish_readiness(&spec, ProcessRuntimeState::Failed, None);
        let status = sup.readiness.status();
        assert_eq!(status.get("worker").unwrap().state, ReadinessState::Failed);
    }
}
