//! Prioritized execution of blocking collection work.
//!
//! Database maintenance (ingests, wipes) must never starve behind a burst
//! of resolutions, so the pool keeps two queues and always drains the
//! maintenance one first.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPriority {
    DatabaseMaintenance,
    Resolving,
}

pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    ShutDown,
}

/// Executes blocking tasks off the caller's thread, maintenance first.
pub trait WorkerPool: Send + Sync {
    fn execute(&self, priority: TaskPriority, task: Task) -> Result<(), PoolError>;
}

/// [`WorkerPool`] backed by the tokio blocking thread pool, with a
/// semaphore bounding how many tasks run at once.
pub struct TokioWorkerPool {
    maintenance_tx: mpsc::UnboundedSender<Task>,
    resolving_tx: mpsc::UnboundedSender<Task>,
}

impl TokioWorkerPool {
    pub fn new(concurrency: usize) -> Self {
        let (maintenance_tx, mut maintenance_rx) = mpsc::unbounded_channel::<Task>();
        let (resolving_tx, mut resolving_rx) = mpsc::unbounded_channel::<Task>();
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));

        tokio::spawn(async move {
            loop {
                // Take a permit before dequeuing, so a task picked under a
                // full pool cannot jump ahead of later maintenance work.
                let permit = permits
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("pool semaphore never closes");
                let task = tokio::select! {
                    // Maintenance always wins when both queues have work.
                    biased;
                    task = maintenance_rx.recv() => task,
                    task = resolving_rx.recv() => task,
                };
                let Some(task) = task else {
                    debug!("Worker pool dispatcher stopping");
                    break;
                };
                tokio::task::spawn_blocking(move || {
                    task();
                    drop(permit);
                });
            }
        });

        TokioWorkerPool {
            maintenance_tx,
            resolving_tx,
        }
    }
}

impl WorkerPool for TokioWorkerPool {
    fn execute(&self, priority: TaskPriority, task: Task) -> Result<(), PoolError> {
        let sender = match priority {
            TaskPriority::DatabaseMaintenance => &self.maintenance_tx,
            TaskPriority::Resolving => &self.resolving_tx,
        };
        sender.send(task).map_err(|_| {
            error!("Worker pool dispatcher is gone, dropping task");
            PoolError::ShutDown
        })
    }
}
