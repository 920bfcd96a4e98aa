//! Bounded pool of named worker threads.
//!
//! Jobs are closures returning a plain value; results come back over a
//! channel in completion order. The pool shares its [`CancelFlag`] with the
//! jobs so that queued work is skipped once cancellation is requested.
//!
//! ```text
//! submit ──► job queue (Mutex<Receiver>) ──► worker-0 ─┐
//!                                        ──► worker-1 ─┼──► results ──► owner
//!                                        ──► worker-N ─┘
//! ```

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use stackfuse_common::cancel::CancelFlag;
use stackfuse_common::error::{FocusError, FocusResult};

type Job<T> = Box<dyn FnOnce() -> T + Send + 'static>;

/// Half of the available hardware parallelism, at least one.
pub fn default_pool_size() -> usize {
    thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

/// Fixed-size thread pool owned by a single alignment run.
pub struct WorkerPool<T> {
    jobs: Option<Sender<Job<T>>>,
    results: Receiver<T>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancelFlag,
}

impl<T> WorkerPool<T>
where
    T: Send + 'static,
{
    /// Spawn `size` workers (at least one) named `stackfuse-align-{id}`.
    pub fn new(size: usize, cancel: CancelFlag) -> FocusResult<Self> {
        let (job_tx, job_rx) = mpsc::channel::<Job<T>>();
        let (result_tx, result_rx) = mpsc::channel::<T>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut workers = Vec::with_capacity(size.max(1));
        for id in 0..size.max(1) {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            let handle = thread::Builder::new()
                .name(format!("stackfuse-align-{id}"))
                .spawn(move || worker_loop(id, job_rx, result_tx, cancel))?;
            workers.push(handle);
        }

        tracing::debug!(workers = workers.len(), "Worker pool started");
        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            workers,
            cancel,
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job.
    ///
    /// Refused once the pool is closed or cancellation was requested.
    pub fn submit<F>(&mut self, job: F) -> FocusResult<()>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.cancel.check()?;
        let sender = self
            .jobs
            .as_ref()
            .ok_or_else(|| FocusError::alignment("worker pool is closed"))?;
        sender
            .send(Box::new(job))
            .map_err(|_| FocusError::alignment("worker pool has shut down"))?;
        Ok(())
    }

    /// Stop accepting jobs. Workers exit once the queue is drained.
    pub fn close(&mut self) {
        self.jobs.take();
    }

    /// Wait up to `timeout` for the next finished job.
    ///
    /// `Disconnected` means every worker has exited and all results have been
    /// received.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.results.recv_timeout(timeout)
    }

    /// Close the pool, wait for every worker, and return results not yet
    /// received.
    pub fn join(mut self) -> Vec<T> {
        self.close();
        self.join_workers();
        self.results.try_iter().collect()
    }

    fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                tracing::error!(worker = %name, "Worker thread panicked");
            }
        }
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.jobs.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop<T>(
    id: usize,
    jobs: Arc<Mutex<Receiver<Job<T>>>>,
    results: Sender<T>,
    cancel: CancelFlag,
) {
    loop {
        let next = match jobs.lock() {
            Ok(queue) => queue.recv(),
            Err(_) => break,
        };
        let Ok(job) = next else {
            break;
        };
        if cancel.is_cancelled() {
            tracing::trace!(worker = id, "Skipping queued job after cancellation");
            continue;
        }
        if results.send(job()).is_err() {
            break;
        }
    }
    tracing::trace!(worker = id, "Worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_every_job_once() {
        let mut pool = WorkerPool::new(3, CancelFlag::new()).unwrap();
        for i in 0..20usize {
            pool.submit(move || i * i).unwrap();
        }
        let mut results = pool.join();
        results.sort_unstable();
        assert_eq!(results, (0..20).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn zero_size_still_gets_a_worker() {
        let pool: WorkerPool<()> = WorkerPool::new(0, CancelFlag::new()).unwrap();
        assert_eq!(pool.size(), 1);
        assert!(default_pool_size() >= 1);
    }

    #[test]
    fn closed_pool_refuses_jobs_and_disconnects() {
        let mut pool = WorkerPool::new(2, CancelFlag::new()).unwrap();
        pool.submit(|| 1).unwrap();
        pool.close();
        assert!(pool.submit(|| 2).is_err());

        assert_eq!(pool.recv_timeout(Duration::from_secs(5)), Ok(1));
        assert_eq!(
            pool.recv_timeout(Duration::from_secs(5)),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn cancellation_skips_queued_jobs() {
        let cancel = CancelFlag::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Arc::new(Mutex::new(gate_rx));

        let mut pool = WorkerPool::new(1, cancel.clone()).unwrap();
        for _ in 0..5 {
            let ran = Arc::clone(&ran);
            let gate_rx = Arc::clone(&gate_rx);
            pool.submit(move || {
                if let Ok(gate) = gate_rx.lock() {
                    let _ = gate.recv();
                }
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        cancel.cancel();
        assert!(matches!(pool.submit(|| ()), Err(FocusError::Cancelled)));
        drop(gate_tx);

        let finished = pool.join();
        // Only the job already running when the flag was set completes.
        assert!(ran.load(Ordering::SeqCst) <= 1);
        assert_eq!(finished.len(), ran.load(Ordering::SeqCst));
    }
}
