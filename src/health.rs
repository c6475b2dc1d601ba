//! Health check execution against a running process's `HealthCheckSpec`.

use crate::process::{HealthCheckKind, HealthCheckSpec};
use anyhow::Result;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Result of a single health check invocation.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Whether the check passed
    pub healthy: bool,
    /// Optional message, populated on failure
    pub message: Option<String>,
    /// Duration the check took
    pub duration: Duration,
}

/// Run a single health check per its configured kind.
pub async fn run_health_check(spec: &HealthCheckSpec) -> HealthCheckResult {
    let start = std::time::Instant::now();

    let check_timeout = Duration::from_secs(spec.timeout_sec as u64);

    let result = match &spec.kind {
        HealthCheckKind::Http { url, expected_status } => {
            check_http(url, *expected_status, check_timeout).await
        }
        HealthCheckKind::Tcp { host, port } => check_tcp(host, *port, check_timeout).await,
        HealthCheckKind::Command { cmd, args } => check_command(cmd, args, check_timeout).await,
    };

    HealthCheckResult {
        healthy: result.is_ok(),
        message: result.err().map(|e| e.to_string()),
        duration: start.elapsed(),
    }
}

/// HTTP GET; passes if the response status matches `expected_status`
/// (defaulting to any 2xx).
async fn check_http(url: &str, expected_status: Option<u16>, timeout_dur: Duration) -> Result<()> {
    debug!("HTTP health check: {}", url);

    let client = reqwest::Client::builder()
        .timeout(timeout_dur)
        .build()?;

    let response = client.get(url).send().await?;
    let status = response.status();

    let ok = match expected_status {
        Some(expected) => status.as_u16() == expected,
        None => status.is_success(),
    };

    if ok {
        Ok(())
    } else {
        warn!("HTTP health check returned unexpected status: {}", status);
        Err(anyhow::anyhow!("unexpected status: {}", status))
    }
}

/// TCP connection health check
async fn check_tcp(host: &str, port: u16, timeout_dur: Duration) -> Result<()> {
    debug!("TCP health check: {}:{}", host, port);

    let addr = format!("{host}:{port}");
    let result = timeout(timeout_dur, TcpStream::connect(&addr)).await;

    match result {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            warn!("TCP health check failed: {}", e);
            Err(e.into())
        }
        Err(_) => {
            warn!("TCP health check timed out");
            Err(anyhow::anyhow!("connection timed out"))
        }
    }
}

/// Command execution health check; success means exit code 0.
async fn check_command(cmd: &str, args: &[String], timeout_dur: Duration) -> Result<()> {
    debug!("command health check: {} {:?}", cmd, args);

    let result = timeout(timeout_dur, tokio::process::Command::new(cmd).args(args).output()).await;

    match result {
        Ok(Ok(output)) => {
            if output.status.success() {
                Ok(())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(anyhow::anyhow!("command failed: {}", stderr))
            }
        }
        Ok(Err(e)) => {
            warn!("command health check failed: {}", e);
            Err(e.into())
        }
        Err(_) => {
            warn!("command health check timed out");
            Err(anyhow::anyhow!("command timed out"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tcp_check_against_closed_port_fails() {
        let result = check_tcp("127.0.0.1", 1, Duration::from_millis(200)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn command_check_success_exit_passes() {
        let result = check_command("/bin/true", &[], Duration::from_secs(5)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn command_check_failure_exit_fails() {
        let result = check_command("/bin/false", &[], Duration::from_secs(5)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn run_health_check_reports_duration() {
        let spec = HealthCheckSpec {
            kind: HealthCheckKind::Command {
                cmd: "/bin/true".to_string(),
                args: vec![],
            },
            interval_sec: 30,
            timeout_sec: 5,
            retries: 3,
        };
        let result = run_health_check(&spec).await;
        assert!(result.healthy);
    }
}
