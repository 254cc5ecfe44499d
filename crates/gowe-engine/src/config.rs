//! Scheduler and worker-queue configuration, env-var driven like
//! `control-plane::main`'s config loading.

use std::time::Duration;

/// Tunables for the scheduler `Tick` loop (spec §4.2).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often `Tick` runs; spec default is 2s.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick_interval: Duration::from_secs(2),
        }
    }
}

impl SchedulerConfig {
    /// Builds config from environment variables, falling back to the
    /// spec defaults when unset.
    pub fn from_env() -> Self {
        let tick_interval_ms = std::env::var("GOWE_TICK_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(2000);

        SchedulerConfig {
            tick_interval: Duration::from_millis(tick_interval_ms),
        }
    }
}

/// Tunables for the Worker Queue Dispatcher (spec §4.6).
#[derive(Debug, Clone)]
pub struct WorkerQueueConfig {
    /// Heartbeat interval workers are expected to honor.
    pub heartbeat_interval: Duration,
    /// Workers silent for this long are swept as stale (spec: 3x the
    /// heartbeat interval).
    pub stale_ttl: chrono::Duration,
    /// Bound on the dispatcher's internal checkout-request channel.
    pub channel_capacity: usize,
}

impl Default for WorkerQueueConfig {
    fn default() -> Self {
        let heartbeat_interval = Duration::from_secs(10);
        WorkerQueueConfig {
            heartbeat_interval,
            stale_ttl: chrono::Duration::seconds(heartbeat_interval.as_secs() as i64 * 3),
            channel_capacity: 256,
        }
    }
}

impl WorkerQueueConfig {
    pub fn from_env() -> Self {
        let heartbeat_secs = std::env::var("GOWE_WORKER_HEARTBEAT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);
        let heartbeat_interval = Duration::from_secs(heartbeat_secs);

        WorkerQueueConfig {
            heartbeat_interval,
            stale_ttl: chrono::Duration::seconds(heartbeat_secs as i64 * 3),
            channel_capacity: 256,
        }
    }
}
