//! Shared application state: the store, executor registry, expression
//! evaluator, scheduler, and worker-queue dispatcher every handler is
//! built against. Mirrors `control-plane`'s `AppState { db }`, widened to
//! the handful of long-lived collaborators GoWe's handlers need instead of
//! just a connection pool.

use std::sync::Arc;
use std::time::Instant;

use gowe_core::ExecutorType;
use gowe_executors::prelude::{BvbrcExecutor, ContainerExecutor, LocalExecutor, Registry, WorkerExecutor};
use gowe_engine::prelude::{Scheduler, SchedulerConfig, WorkerQueue, WorkerQueueConfig, WorkerQueueHandle};
use gowe_resolver::prelude::{ExpressionEvaluator, NullEvaluator};
use gowe_store::memory::InMemoryStore;
use gowe_store::postgres::PostgresStore;
use gowe_store::store::Store;
use tokio::sync::watch;

use crate::config::ApiConfig;

/// Everything an HTTP handler needs to serve a request, cloned cheaply
/// into each `axum` handler via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registry: Arc<Registry>,
    pub worker_queue: WorkerQueueHandle,
    pub default_executor_type: ExecutorType,
    pub default_max_retries: u32,
    pub started_at: Instant,
}

/// The scheduler and worker-queue background loops, plus the shutdown
/// switch that stops both. Held by `main` for the process lifetime;
/// dropping `shutdown` without sending has no effect — `main` must call
/// `shutdown_all` on graceful shutdown for the spawned tasks to exit.
pub struct Background {
    shutdown: watch::Sender<bool>,
    scheduler_task: tokio::task::JoinHandle<()>,
    worker_queue_task: tokio::task::JoinHandle<()>,
}

impl Background {
    /// Signals both loops to stop and waits for them to finish their
    /// current iteration, mirroring `TaskPoller::stop`'s "close the
    /// channel, then join" shutdown shape.
    pub async fn shutdown_all(self) {
        let _ = self.shutdown.send(true);
        let _ = self.scheduler_task.await;
        let _ = self.worker_queue_task.await;
    }
}

/// Builds the store, registry, and evaluator from `config`, then spawns
/// the scheduler tick loop and worker-queue dispatcher loop as background
/// tasks. Returns the state handlers are built against plus a handle to
/// stop those background tasks.
pub async fn bootstrap(config: &ApiConfig) -> anyhow::Result<(AppState, Background)> {
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pg = PostgresStore::connect(url).await?;
            pg.migrate().await?;
            Arc::new(pg)
        }
        None => {
            tracing::info!("DATABASE_URL unset; running against an in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    let mut registry = Registry::new();
    registry
        .register(ExecutorType::Local, Arc::new(LocalExecutor::new()))
        .register(ExecutorType::Container, Arc::new(ContainerExecutor::new()))
        .register(
            ExecutorType::Bvbrc,
            Arc::new(BvbrcExecutor::new(config.bvbrc_endpoint.clone(), config.bvbrc_token.clone())),
        )
        .register(ExecutorType::Worker, Arc::new(WorkerExecutor::new()));
    let registry = Arc::new(registry);

    // CWL's `valueFrom` expressions use a parameter-reference/JavaScript
    // grammar this engine treats as an external collaborator (spec §1,
    // §4.4); `NullEvaluator` covers the common case of a `valueFrom` that
    // is plain text with no expression syntax, and errors clearly on
    // anything that actually needs evaluation.
    let evaluator: Arc<dyn ExpressionEvaluator> = Arc::new(NullEvaluator);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(store.clone(), registry.clone(), evaluator.clone(), SchedulerConfig::from_env());
    let scheduler_shutdown = shutdown_rx.clone();
    let scheduler_task = tokio::spawn(async move { scheduler.start(scheduler_shutdown).await });

    let worker_queue = WorkerQueue::new(store.clone(), WorkerQueueConfig::from_env());
    let worker_queue_handle = worker_queue.handle();
    let worker_queue_shutdown = shutdown_rx;
    let worker_queue_task = tokio::spawn(async move { worker_queue.run(worker_queue_shutdown).await });

    let state = AppState {
        store,
        registry,
        worker_queue: worker_queue_handle,
        default_executor_type: config.default_executor_type,
        default_max_retries: config.default_max_retries,
        started_at: Instant::now(),
    };

    let background = Background {
        shutdown: shutdown_tx,
        scheduler_task,
        worker_queue_task,
    };

    Ok((state, background))
}
