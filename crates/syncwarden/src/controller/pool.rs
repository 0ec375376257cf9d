use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::runtime::Handle;

use super::queue::WorkQueue;
use super::ApplicationController;
use crate::error::ControllerError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed set of threads draining the work queue, one reconciliation at a time each.
pub struct ReconcileWorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl ReconcileWorkerPool {
    /// Starts `worker_count` workers running reconciliations on `handle`.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn start(
        controller: Arc<ApplicationController>,
        handle: Handle,
        worker_count: usize,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let queue = controller.queue();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let controller = Arc::clone(&controller);
            let queue = Arc::clone(&queue);
            let handle = handle.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            workers.push(thread::spawn(move || {
                run_worker(worker_id, controller, queue, handle, shutdown_flag);
            }));
        }

        info!("Started {} reconciliation workers", worker_count);
        Self { workers, shutdown }
    }

    pub fn shutdown(&self) {
        info!("Shutting down reconciliation workers...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        info!("All reconciliation workers have stopped");
    }
}

fn run_worker(
    worker_id: usize,
    controller: Arc<ApplicationController>,
    queue: Arc<WorkQueue>,
    handle: Handle,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) || queue.is_shutdown() {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        let Some(key) = queue.get(POLL_INTERVAL) else {
            continue;
        };

        debug!("Worker {} reconciling {}", worker_id, key);
        match handle.block_on(controller.reconcile(&key)) {
            Ok(outcome) => {
                if let Some(id) = &outcome.dispatched {
                    info!("Worker {}: {} is {}, started sync {}", worker_id, key, outcome.sync, id);
                }
            }
            Err(ControllerError::ApplicationNotFound(_)) => {
                debug!("Worker {}: {} no longer exists", worker_id, key);
            }
            Err(e) if e.aborts_pass() => {
                warn!("Worker {}: reconciliation of {} aborted: {}", worker_id, key, e);
            }
            Err(e) => {
                error!("Worker {}: reconciliation of {} failed: {}", worker_id, key, e);
            }
        }
        queue.done(&key);
    }

    debug!("Worker {} stopped", worker_id);
}
