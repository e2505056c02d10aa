//! Bounded concurrency for file transfer workers
//!
//! This crate decides, per dispatched job, whether the job runs on its own
//! tokio task (a "worker") or inline on the calling context. A `Limiter`
//! holds a fixed number of slots; a job only becomes a worker if a slot can
//! be reserved, and the slot is released when the worker finishes regardless
//! of outcome. When no slot is free the job is awaited in place, so the
//! number of concurrently running workers can never exceed the configured
//! bound.
//!
//! The slot reservation is a single atomic step (`try_acquire_owned` on a
//! semaphore), there is no read-the-count-then-spawn window in which two
//! callers could both observe a free slot.
//!
//! ```rust,no_run
//! use limiter::Limiter;
//!
//! # async fn example() {
//! let limiter = Limiter::new(4);
//! let handle = limiter.submit(async { 42 }).await;
//! let value = handle.join().await.unwrap();
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Result of a [`Limiter::submit`] call.
///
/// Callers never branch on how the job ran; `join` yields the job output
/// whether it was executed on a worker task or already completed inline.
#[derive(Debug)]
pub enum Handle<T> {
    /// Job is running (or ran) on its own worker task.
    Task(tokio::task::JoinHandle<T>),
    /// Job already ran to completion on the calling context.
    Done(T),
}

impl<T> Handle<T> {
    /// Wait for the job and return its output.
    ///
    /// # Errors
    ///
    /// Returns a [`tokio::task::JoinError`] if the worker task panicked.
    pub async fn join(self) -> Result<T, tokio::task::JoinError> {
        match self {
            Handle::Task(handle) => handle.await,
            Handle::Done(value) => Ok(value),
        }
    }

    /// Whether the job was dispatched to a worker task.
    #[must_use]
    pub fn is_spawned(&self) -> bool {
        matches!(self, Handle::Task(_))
    }
}

#[derive(Debug)]
struct Workers {
    active: AtomicUsize,
    peak: AtomicUsize,
}

struct WorkerGuard {
    workers: Arc<Workers>,
}

impl WorkerGuard {
    fn new(workers: Arc<Workers>) -> Self {
        let active = workers.active.fetch_add(1, Ordering::SeqCst) + 1;
        workers.peak.fetch_max(active, Ordering::SeqCst);
        Self { workers }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.workers.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded dispatcher for transfer jobs, one instance per run.
#[derive(Debug)]
pub struct Limiter {
    slots: Arc<tokio::sync::Semaphore>,
    workers: Arc<Workers>,
    max_workers: usize,
}

impl Limiter {
    /// Create a limiter allowing up to `max_workers` concurrent workers.
    ///
    /// `max_workers <= 1` yields zero slots, i.e. every job submitted runs
    /// inline on the calling context.
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        let slots = if max_workers > 1 { max_workers } else { 0 };
        Self {
            slots: Arc::new(tokio::sync::Semaphore::new(slots)),
            workers: Arc::new(Workers {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
            max_workers,
        }
    }

    /// Dispatch a job, spawning it on a worker task if a slot is free and
    /// awaiting it on the calling context otherwise.
    pub async fn submit<F>(&self, job: F) -> Handle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match self.slots.clone().try_acquire_owned() {
            Ok(permit) => {
                let workers = self.workers.clone();
                Handle::Task(tokio::task::spawn(async move {
                    let _slot = permit;
                    let _worker = WorkerGuard::new(workers);
                    job.await
                }))
            }
            Err(_) => {
                tracing::trace!("no free slot, running transfer inline");
                Handle::Done(job.await)
            }
        }
    }

    /// Number of workers currently running.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.workers.active.load(Ordering::SeqCst)
    }

    /// Highest number of workers observed running at once.
    #[must_use]
    pub fn peak_workers(&self) -> usize {
        self.workers.peak.load(Ordering::SeqCst)
    }

    /// Configured worker bound.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}
