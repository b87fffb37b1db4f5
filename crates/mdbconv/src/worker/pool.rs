use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::error::ConvertError;

/// Work executed for each submitted job id.
pub trait JobHandler: Send + Sync {
    fn handle(&self, job_id: &str);

    /// Called when `handle` panicked; the job must not stay in flight.
    fn abandon(&self, _job_id: &str) {}
}

/// Fixed set of worker threads draining one unbounded FIFO queue of job ids.
///
/// The number of workers is the concurrency bound: a worker holds a job for
/// its entire conversion.
pub struct WorkerPool {
    job_sender: Sender<String>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    worker_count: usize,
}

impl WorkerPool {
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(worker_count: usize, handler: Arc<dyn JobHandler>) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (job_sender, job_receiver) = unbounded::<String>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let active_count = Arc::clone(&active);
            let worker_handler = Arc::clone(&handler);

            let handle = thread::Builder::new()
                .name(format!("mdbconv-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, job_rx, shutdown_flag, active_count, worker_handler);
                });

            match handle {
                Ok(handle) => workers.push(handle),
                Err(e) => error!("Failed to spawn worker {}: {}", worker_id, e),
            }
        }

        info!("Started {} workers", workers.len());

        Self {
            job_sender,
            workers: Mutex::new(workers),
            shutdown,
            active,
            worker_count,
        }
    }

    /// Enqueues a job id. Never blocks.
    pub fn submit(&self, job_id: &str) -> Result<(), ConvertError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(ConvertError::System("worker pool is shut down".to_string()));
        }

        self.job_sender
            .send(job_id.to_string())
            .map_err(|_| ConvertError::System("worker pool channel closed".to_string()))
    }

    /// Job ids waiting for a worker.
    pub fn queued_len(&self) -> usize {
        self.job_sender.len()
    }

    /// Jobs currently held by a worker.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Stops accepting jobs. Workers finish what is already queued.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Joins all workers. Call after [`WorkerPool::shutdown`].
    pub fn wait(&self) {
        let workers = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<String>,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    handler: Arc<dyn JobHandler>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job_id) => {
                debug!("Worker {} processing job {}", worker_id, job_id);
                active.fetch_add(1, Ordering::SeqCst);

                let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&job_id)));
                if outcome.is_err() {
                    error!("Worker {} panicked while processing job {}", worker_id, job_id);
                    handler.abandon(&job_id);
                }

                active.fetch_sub(1, Ordering::SeqCst);
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    debug!("Worker {} received shutdown signal", worker_id);
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
