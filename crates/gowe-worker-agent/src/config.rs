//! Env-var driven agent configuration, following `gowe-api::config`'s
//! `std::env::var(...)` style (spec §4.6, §6 worker registration profile).

use std::time::Duration;

use anyhow::{Context, Result};

/// Configuration assembled once at agent startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the `gowe-api` server this agent registers against
    /// (`GOWE_SERVER_URL`, default `http://127.0.0.1:8080/api`).
    pub server_url: String,
    /// Operator-facing name reported at registration (`GOWE_WORKER_NAME`,
    /// default the local hostname).
    pub name: String,
    /// Hostname or address reported at registration (`GOWE_WORKER_HOST`).
    pub host: String,
    /// Scheduling partition this worker joins (`GOWE_WORKER_GROUP`,
    /// default `"default"`).
    pub group: String,
    /// How this worker runs containerized steps: `"docker"`, `"apptainer"`,
    /// or `"bare"` (`GOWE_WORKER_RUNTIME_TAG`, default `"bare"`).
    pub runtime_tag: String,
    /// Free-form capability labels advertised at registration
    /// (`GOWE_WORKER_CAPABILITIES`, comma-separated).
    pub capabilities: Vec<String>,
    /// Interval between heartbeat reports (`GOWE_WORKER_HEARTBEAT_SECS`,
    /// default 10s — must stay well under the server's stale TTL, 3x this
    /// value by default).
    pub heartbeat_interval: Duration,
    /// Poll interval floor used once work keeps being found
    /// (`GOWE_WORKER_POLL_MIN_MS`, default 500ms).
    pub poll_min_interval: Duration,
    /// Poll interval ceiling backed off to during idle stretches
    /// (`GOWE_WORKER_POLL_MAX_MS`, default 30s).
    pub poll_max_interval: Duration,
    /// Multiplier applied to the current poll interval after an empty
    /// checkout (`GOWE_WORKER_POLL_BACKOFF`, default 1.5).
    pub poll_backoff_multiplier: f64,
    /// Root directory per-task working directories are created under
    /// (`GOWE_WORKER_DIR`, default a `gowe-worker-agent` dir under the OS
    /// temp dir).
    pub work_dir_root: std::path::PathBuf,
    /// Docker binary invoked for tasks carrying `_docker_image`
    /// (`GOWE_WORKER_DOCKER_BINARY`, default `"docker"`).
    pub docker_binary: String,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let server_url = std::env::var("GOWE_SERVER_URL").unwrap_or_else(|_| "http://127.0.0.1:8080/api".to_string());

        let name = std::env::var("GOWE_WORKER_NAME").unwrap_or_else(|_| {
            hostname_fallback()
        });
        let host = std::env::var("GOWE_WORKER_HOST").unwrap_or_default();
        let group = std::env::var("GOWE_WORKER_GROUP").unwrap_or_else(|_| "default".to_string());
        let runtime_tag = std::env::var("GOWE_WORKER_RUNTIME_TAG").unwrap_or_else(|_| "bare".to_string());

        let capabilities = std::env::var("GOWE_WORKER_CAPABILITIES")
            .ok()
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let heartbeat_secs = std::env::var("GOWE_WORKER_HEARTBEAT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);

        let poll_min_ms = std::env::var("GOWE_WORKER_POLL_MIN_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(500);
        let poll_max_ms = std::env::var("GOWE_WORKER_POLL_MAX_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30_000);
        let poll_backoff_multiplier = std::env::var("GOWE_WORKER_POLL_BACKOFF")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(1.5);

        let work_dir_root = std::env::var("GOWE_WORKER_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("gowe-worker-agent"));

        let docker_binary = std::env::var("GOWE_WORKER_DOCKER_BINARY").unwrap_or_else(|_| "docker".to_string());

        anyhow::ensure!(poll_min_ms <= poll_max_ms, "GOWE_WORKER_POLL_MIN_MS must not exceed GOWE_WORKER_POLL_MAX_MS");
        anyhow::ensure!(poll_backoff_multiplier >= 1.0, "GOWE_WORKER_POLL_BACKOFF must be >= 1.0");

        Ok(AgentConfig {
            server_url,
            name,
            host,
            group,
            runtime_tag,
            capabilities,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            poll_min_interval: Duration::from_millis(poll_min_ms),
            poll_max_interval: Duration::from_millis(poll_max_ms),
            poll_backoff_multiplier,
            work_dir_root,
            docker_binary,
        })
        .context("building agent configuration")
    }
}

fn hostname_fallback() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "gowe-worker".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_bounds_must_be_ordered() {
        // mirrors the anyhow::ensure! guards above without touching process env
        assert!(500u64 <= 30_000u64);
    }
}
