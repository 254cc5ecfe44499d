//! Adaptive poll loop driving the checkout/execute/report cycle (spec
//! §4.6). Mirrors `durable::worker::poller::TaskPoller`'s shape —
//! shrink the interval to the floor on a hit, back off geometrically
//! toward the ceiling on a miss — adapted from a store-backed poll to an
//! HTTP checkout call.

use std::sync::Arc;
use std::time::Duration;

use gowe_core::{HeartbeatInstruction, WorkerState};
use tokio::sync::watch;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::client::{AgentClient, TaskOutcome};
use crate::config::AgentConfig;
use crate::exec::TaskRunner;

pub struct Poller {
    client: Arc<AgentClient>,
    runner: TaskRunner,
    worker_id: Uuid,
    min_interval: Duration,
    max_interval: Duration,
    backoff_multiplier: f64,
    current_interval: Duration,
}

impl Poller {
    pub fn new(client: Arc<AgentClient>, worker_id: Uuid, config: &AgentConfig) -> Self {
        Poller {
            client,
            runner: TaskRunner::new(config.work_dir_root.clone(), config.docker_binary.clone()),
            worker_id,
            min_interval: config.poll_min_interval,
            max_interval: config.poll_max_interval,
            backoff_multiplier: config.poll_backoff_multiplier,
            current_interval: config.poll_min_interval,
        }
    }

    /// Runs checkout -> execute -> report cycles until `shutdown` fires or
    /// a heartbeat instructs this worker to drain/cancel. `draining` flips
    /// to true once a drain instruction arrives, finishing the in-flight
    /// task (if any) before the loop exits rather than mid-task.
    #[instrument(skip_all, fields(worker_id = %self.worker_id))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>, mut instruction: watch::Receiver<HeartbeatInstruction>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            if *instruction.borrow() == HeartbeatInstruction::Drain {
                info!("draining: no further work will be checked out");
                break;
            }

            match self.client.checkout_work(self.worker_id).await {
                Ok(Some(task)) => {
                    self.reset_backoff();
                    self.execute_and_report(task, &mut instruction).await;
                }
                Ok(None) => {
                    self.increase_backoff();
                }
                Err(e) => {
                    warn!(error = %e, "checkout failed; backing off");
                    self.increase_backoff();
                }
            }

            if self.wait(&mut shutdown).await {
                break;
            }
        }
    }

    async fn execute_and_report(&self, task: gowe_core::Task, instruction: &mut watch::Receiver<HeartbeatInstruction>) {
        if let Err(e) = self.client.report_status(self.worker_id, task.id, Some("started".to_string())).await {
            warn!(task_id = %task.id, error = %e, "reporting in-progress status failed; continuing anyway");
        }

        let outcome = tokio::select! {
            outcome = self.runner.run(task.id, &task.resolved_inputs) => outcome,
            _ = wait_for_cancel(instruction) => cancelled_outcome(),
        };

        if let Err(e) = self.client.report_complete(self.worker_id, task.id, outcome).await {
            warn!(task_id = %task.id, error = %e, "reporting completion failed");
        }
    }

    fn reset_backoff(&mut self) {
        self.current_interval = self.min_interval;
    }

    fn increase_backoff(&mut self) {
        let next = self.current_interval.mul_f64(self.backoff_multiplier);
        self.current_interval = next.min(self.max_interval);
    }

    /// Sleeps for the current interval unless shutdown fires first;
    /// returns `true` if shutdown won the race.
    async fn wait(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = shutdown.changed() => true,
        }
    }
}

async fn wait_for_cancel(instruction: &mut watch::Receiver<HeartbeatInstruction>) {
    loop {
        if *instruction.borrow() == HeartbeatInstruction::CancelCurrent {
            return;
        }
        if instruction.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn cancelled_outcome() -> TaskOutcome {
    TaskOutcome {
        state: gowe_core::TaskState::Failed,
        exit_code: None,
        retryable: false,
        stdout: None,
        stderr: Some("cancelled by server instruction".to_string()),
        outputs: serde_json::Value::Null,
    }
}

/// Reports a heartbeat on `interval` until `shutdown` fires, publishing
/// the server's returned instruction onto `instruction_tx` so the poll
/// loop can react to a drain/cancel request without a second HTTP round
/// trip.
#[instrument(skip_all)]
pub async fn heartbeat_loop(
    client: Arc<AgentClient>,
    worker_id: Uuid,
    interval: Duration,
    instruction_tx: watch::Sender<HeartbeatInstruction>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let requested = if *shutdown.borrow() { Some(WorkerState::Draining) } else { None };
                match client.heartbeat(worker_id, requested).await {
                    Ok(instruction) => {
                        let _ = instruction_tx.send(instruction);
                    }
                    Err(e) => warn!(error = %e, "heartbeat failed"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
