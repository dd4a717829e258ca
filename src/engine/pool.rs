//! Pool supervisor: owns the worker tasks, the guard task and the shutdown signal.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{StaleGuard, Worker};
use crate::config::QueueConfig;
use crate::db::EventStore;
use crate::error::Result;
use crate::handler::EventHandler;
use crate::queue::QueueAccessLayer;

/// Cloneable trigger for a pool's graceful shutdown.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Ask every worker and the guard to stop at their next loop boundary.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// N workers plus one stale guard over a shared queue.
///
/// ```ignore
/// let pool = WorkerPool::new(queue, handler, QueueConfig::default());
/// let stop = pool.shutdown_handle();
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     stop.shutdown();
/// });
/// pool.run().await?;
/// ```
pub struct WorkerPool<S> {
    queue: Arc<QueueAccessLayer<S>>,
    handler: Arc<dyn EventHandler>,
    config: QueueConfig,
    shutdown: ShutdownHandle,
}

impl<S: EventStore + 'static> WorkerPool<S> {
    pub fn new(
        queue: Arc<QueueAccessLayer<S>>,
        handler: Arc<dyn EventHandler>,
        config: QueueConfig,
    ) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            queue,
            handler,
            config,
            shutdown: ShutdownHandle { tx: Arc::new(tx) },
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run until shutdown is signalled and every worker has exited.
    ///
    /// The guard gets `guard_grace` to finish its current tick and is
    /// detached after that.
    pub async fn run(self) -> Result<()> {
        self.config.validate()?;
        info!(
            workers = self.config.workers,
            poll_sleep_ms = self.config.poll_sleep.as_millis() as u64,
            "worker pool starting"
        );

        let guard = StaleGuard::new(
            Arc::clone(&self.queue),
            self.config.guard_interval,
            self.shutdown.tx.subscribe(),
        );
        let guard_task = tokio::spawn(guard.run());

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            let worker = Worker::new(
                id,
                Arc::clone(&self.queue),
                Arc::clone(&self.handler),
                self.config.clone(),
                self.shutdown.tx.subscribe(),
            );
            workers.spawn(worker.run());
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task ended abnormally");
            }
        }

        // Workers exit only on shutdown, but make sure the guard sees it too.
        self.shutdown.shutdown();
        match tokio::time::timeout(self.config.guard_grace, guard_task).await {
            Ok(Ok(())) => debug!("stale guard joined"),
            Ok(Err(e)) => error!(error = %e, "stale guard task ended abnormally"),
            Err(_) => warn!("stale guard still busy, detaching"),
        }

        info!("worker pool stopped");
        Ok(())
    }
}
