//! Worker pool orchestrator
//!
//! An explicit supervisor owning the chunk worker handles. The pool is
//! sized between a configured floor and ceiling; a periodic evaluation
//! reads a backlog signal and adds or removes one worker per tick. The
//! backlog source and the worker construction are both pluggable seams,
//! so the scaling logic assumes nothing about the event log behind them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::events::{EventLog, TOPIC_CHUNK_READY};
use crate::storage::ObjectStore;
use crate::worker::ChunkWorker;

/// Pluggable backlog measurement.
#[async_trait]
pub trait BacklogProbe: Send + Sync + 'static {
    /// Count of unprocessed chunk events awaiting the worker group.
    async fn current_backlog(&self) -> anyhow::Result<u64>;
}

/// Backlog probe reading consumer-group lag from the event log.
pub struct EventLogLagProbe {
    log: Arc<dyn EventLog>,
    group: String,
}

impl EventLogLagProbe {
    pub fn new(log: Arc<dyn EventLog>, group: String) -> Self {
        Self { log, group }
    }
}

#[async_trait]
impl BacklogProbe for EventLogLagProbe {
    async fn current_backlog(&self) -> anyhow::Result<u64> {
        Ok(self.log.lag(&self.group, TOPIC_CHUNK_READY).await?)
    }
}

/// A running worker owned by the pool.
pub struct WorkerHandle {
    pub id: usize,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    pub started_at: DateTime<Utc>,
}

/// Pluggable worker construction.
pub trait WorkerFactory: Send + Sync + 'static {
    fn spawn(&self, id: usize) -> WorkerHandle;
}

/// Spawns [`ChunkWorker`]s as tokio tasks.
pub struct ChunkWorkerFactory {
    pool: PgPool,
    store: ObjectStore,
    log: Arc<dyn EventLog>,
    consumer_group: String,
}

impl ChunkWorkerFactory {
    pub fn new(
        pool: PgPool,
        store: ObjectStore,
        log: Arc<dyn EventLog>,
        consumer_group: String,
    ) -> Self {
        Self {
            pool,
            store,
            log,
            consumer_group,
        }
    }
}

impl WorkerFactory for ChunkWorkerFactory {
    fn spawn(&self, id: usize) -> WorkerHandle {
        let worker = ChunkWorker::new(
            id,
            self.pool.clone(),
            self.store.clone(),
            Arc::clone(&self.log),
            self.consumer_group.clone(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(worker.run(shutdown_rx));
        WorkerHandle {
            id,
            shutdown: shutdown_tx,
            join,
            started_at: Utc::now(),
        }
    }
}

/// The scaling action one evaluation decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    Up,
    Down,
    Hold,
}

/// Pure scaling decision: one step toward the watermark, bounded by the
/// floor and ceiling.
pub fn scale_decision(
    backlog: u64,
    pool_size: usize,
    config: &WorkerPoolConfig,
) -> ScaleAction {
    if backlog > config.scale_up_backlog && pool_size < config.max_workers {
        ScaleAction::Up
    } else if backlog < config.scale_down_backlog && pool_size > config.min_workers {
        ScaleAction::Down
    } else {
        ScaleAction::Hold
    }
}

pub struct WorkerPool {
    factory: Arc<dyn WorkerFactory>,
    probe: Arc<dyn BacklogProbe>,
    config: WorkerPoolConfig,
    workers: Vec<WorkerHandle>,
    next_worker_id: usize,
}

impl WorkerPool {
    pub fn new(
        factory: Arc<dyn WorkerFactory>,
        probe: Arc<dyn BacklogProbe>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            factory,
            probe,
            config,
            workers: Vec::new(),
            next_worker_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Bring the pool up to the floor.
    pub fn start(&mut self) {
        while self.workers.len() < self.config.min_workers {
            self.add_worker();
        }
        info!(
            workers = self.workers.len(),
            max_workers = self.config.max_workers,
            "Worker pool ready"
        );
    }

    /// Add one worker, bounded by the ceiling.
    pub fn add_worker(&mut self) -> bool {
        if self.workers.len() >= self.config.max_workers {
            warn!(
                current = self.workers.len(),
                max = self.config.max_workers,
                "Worker ceiling reached"
            );
            return false;
        }

        let id = self.next_worker_id;
        self.next_worker_id += 1;
        self.workers.push(self.factory.spawn(id));

        info!(worker_id = id, total_workers = self.workers.len(), "Worker added");
        true
    }

    /// Remove one worker, bounded by the floor. The worker finishes its
    /// in-flight chunk and leaves the consumer group cleanly, so the event
    /// log reassigns anything unacknowledged.
    pub async fn remove_worker(&mut self) -> bool {
        if self.workers.len() <= self.config.min_workers {
            warn!(
                current = self.workers.len(),
                min = self.config.min_workers,
                "Worker floor reached"
            );
            return false;
        }

        let Some(worker) = self.workers.pop() else {
            return false;
        };

        let _ = worker.shutdown.send(true);
        if let Err(e) = worker.join.await {
            error!(worker_id = worker.id, error = %e, "Worker exited abnormally");
        }

        info!(
            worker_id = worker.id,
            total_workers = self.workers.len(),
            "Worker removed"
        );
        true
    }

    /// One scaling evaluation against the backlog probe.
    pub async fn evaluate(&mut self) {
        let backlog = match self.probe.current_backlog().await {
            Ok(backlog) => backlog,
            Err(e) => {
                warn!(error = %e, "Backlog probe failed, holding pool size");
                return;
            },
        };

        match scale_decision(backlog, self.workers.len(), &self.config) {
            ScaleAction::Up => {
                info!(backlog, workers = self.workers.len(), "Scaling up");
                self.add_worker();
            },
            ScaleAction::Down => {
                info!(backlog, workers = self.workers.len(), "Scaling down");
                self.remove_worker().await;
            },
            ScaleAction::Hold => {},
        }
    }

    /// Supervise until shutdown: start at the floor, then evaluate the
    /// backlog on the configured interval.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.start();

        let mut ticker = interval(Duration::from_secs(self.config.scale_check_interval_secs));
        // The first tick fires immediately; skip it so the pool settles.
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.evaluate().await;
                },
            }
        }

        self.shutdown().await;
    }

    /// Stop every worker, letting each finish its in-flight chunk. All
    /// workers are signalled first and drained concurrently.
    pub async fn shutdown(&mut self) {
        info!(workers = self.workers.len(), "Shutting down worker pool");

        let mut joins = Vec::new();
        for worker in self.workers.drain(..) {
            let _ = worker.shutdown.send(true);
            joins.push(async move {
                if let Err(e) = worker.join.await {
                    error!(worker_id = worker.id, error = %e, "Worker exited abnormally");
                }
            });
        }
        join_all(joins).await;

        info!("Worker pool shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> WorkerPoolConfig {
        WorkerPoolConfig {
            consumer_group: "upsert-workers".to_string(),
            min_workers: 2,
            max_workers: 4,
            scale_check_interval_secs: 30,
            scale_up_backlog: 10_000,
            scale_down_backlog: 1_000,
        }
    }

    struct FixedBacklog(u64);

    #[async_trait]
    impl BacklogProbe for FixedBacklog {
        async fn current_backlog(&self) -> anyhow::Result<u64> {
            Ok(self.0)
        }
    }

    struct FailingBacklog;

    #[async_trait]
    impl BacklogProbe for FailingBacklog {
        async fn current_backlog(&self) -> anyhow::Result<u64> {
            anyhow::bail!("lag source unavailable")
        }
    }

    /// Spawns workers that just wait for their shutdown signal.
    struct IdleWorkerFactory {
        spawned: AtomicUsize,
    }

    impl IdleWorkerFactory {
        fn new() -> Self {
            Self {
                spawned: AtomicUsize::new(0),
            }
        }
    }

    impl WorkerFactory for IdleWorkerFactory {
        fn spawn(&self, id: usize) -> WorkerHandle {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
            let join = tokio::spawn(async move {
                while shutdown_rx.changed().await.is_ok() {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            });
            WorkerHandle {
                id,
                shutdown: shutdown_tx,
                join,
                started_at: Utc::now(),
            }
        }
    }

    #[test]
    fn test_scale_decision_watermarks() {
        let config = test_config();
        assert_eq!(scale_decision(20_000, 2, &config), ScaleAction::Up);
        assert_eq!(scale_decision(500, 3, &config), ScaleAction::Down);
        assert_eq!(scale_decision(5_000, 2, &config), ScaleAction::Hold);
    }

    #[test]
    fn test_scale_decision_respects_bounds() {
        let config = test_config();
        // High backlog but at ceiling: hold.
        assert_eq!(scale_decision(20_000, 4, &config), ScaleAction::Hold);
        // Low backlog but at floor: hold.
        assert_eq!(scale_decision(0, 2, &config), ScaleAction::Hold);
    }

    #[tokio::test]
    async fn test_start_brings_pool_to_floor() {
        let factory = Arc::new(IdleWorkerFactory::new());
        let mut pool = WorkerPool::new(
            Arc::clone(&factory) as Arc<dyn WorkerFactory>,
            Arc::new(FixedBacklog(0)),
            test_config(),
        );

        pool.start();
        assert_eq!(pool.len(), 2);
        assert_eq!(factory.spawned.load(Ordering::SeqCst), 2);

        pool.shutdown().await;
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_evaluate_scales_up_under_backlog() {
        let mut pool = WorkerPool::new(
            Arc::new(IdleWorkerFactory::new()),
            Arc::new(FixedBacklog(50_000)),
            test_config(),
        );

        pool.start();
        pool.evaluate().await;
        assert_eq!(pool.len(), 3);

        // One step per evaluation, capped at the ceiling.
        pool.evaluate().await;
        pool.evaluate().await;
        pool.evaluate().await;
        assert_eq!(pool.len(), 4);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_evaluate_scales_down_when_idle() {
        let mut pool = WorkerPool::new(
            Arc::new(IdleWorkerFactory::new()),
            Arc::new(FixedBacklog(0)),
            test_config(),
        );

        pool.start();
        pool.add_worker();
        assert_eq!(pool.len(), 3);

        pool.evaluate().await;
        assert_eq!(pool.len(), 2);

        // Never below the floor.
        pool.evaluate().await;
        assert_eq!(pool.len(), 2);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_evaluate_holds_when_probe_fails() {
        let mut pool = WorkerPool::new(
            Arc::new(IdleWorkerFactory::new()),
            Arc::new(FailingBacklog),
            test_config(),
        );

        pool.start();
        pool.evaluate().await;
        assert_eq!(pool.len(), 2);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_worker_respects_ceiling() {
        let mut pool = WorkerPool::new(
            Arc::new(IdleWorkerFactory::new()),
            Arc::new(FixedBacklog(0)),
            test_config(),
        );

        pool.start();
        assert!(pool.add_worker());
        assert!(pool.add_worker());
        assert!(!pool.add_worker());
        assert_eq!(pool.len(), 4);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_worker_respects_floor() {
        let mut pool = WorkerPool::new(
            Arc::new(IdleWorkerFactory::new()),
            Arc::new(FixedBacklog(0)),
            test_config(),
        );

        pool.start();
        assert!(!pool.remove_worker().await);
        assert_eq!(pool.len(), 2);

        pool.shutdown().await;
    }
}
