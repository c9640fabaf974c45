//! Priority-queued job system.
//!
//! Jobs are boxed closures pushed onto one of three queues (high, medium,
//! low). Workers block on a single condition variable until a job arrives or
//! the pool shuts down, and always drain higher priorities first.
//!
//! Submitting a job returns a [`JobHandle`]; callers poll it with
//! [`JobHandle::is_ready`] or block with [`JobHandle::wait`] /
//! [`wait_all`]. There is no cancellation: a queued job always runs.
//!
//! The [`JobSystem`] trait is the seam the physics code depends on, so tests
//! can swap the [`ThreadPool`] for an [`InlineExecutor`].

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// A unit of work accepted by a [`JobSystem`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Scheduling priority. Higher priorities are always dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum JobPriority {
    Low,
    #[default]
    Medium,
    High,
}

/// Failure to obtain a job's result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The job panicked; carries the panic message when it was a string.
    #[error("job panicked: {0}")]
    Panicked(String),
    /// The job was dropped without running (the executor went away).
    #[error("job was dropped before it produced a result")]
    Disconnected,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic payload>".to_owned())
}

/// Executes boxed jobs. Object safe so it can be shared as `Arc<dyn JobSystem>`.
pub trait JobSystem: Send + Sync {
    /// Queue a job for execution.
    fn execute(&self, priority: JobPriority, job: Job);

    /// Number of jobs that can make progress at the same time.
    fn worker_count(&self) -> usize;
}

/// Typed submission on top of [`JobSystem::execute`].
pub trait JobSystemExt: JobSystem {
    /// Submit a closure and get a handle to its result.
    fn submit<T, F>(&self, priority: JobPriority, f: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        self.execute(
            priority,
            Box::new(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(f));
                // The receiver may already be gone if the caller dropped the handle.
                let _ = tx.send(result);
            }),
        );
        JobHandle { rx }
    }
}

impl<J: JobSystem + ?Sized> JobSystemExt for J {}

/// Handle to the eventual result of a submitted job.
#[must_use = "dropping a JobHandle discards the job's result"]
pub struct JobHandle<T> {
    rx: Receiver<thread::Result<T>>,
}

impl<T> JobHandle<T> {
    /// Returns true once the job has finished (successfully or not).
    pub fn is_ready(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Block until the job finishes and return its result.
    pub fn wait(self) -> Result<T, JobError> {
        match self.rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
            Err(_) => Err(JobError::Disconnected),
        }
    }
}

/// Block until every handle finishes, preserving submission order.
///
/// All handles are awaited even when an earlier one failed, so no job is
/// still running when this returns. The first error is reported.
pub fn wait_all<T>(handles: Vec<JobHandle<T>>) -> Result<Vec<T>, JobError> {
    let mut values = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for handle in handles {
        match handle.wait() {
            Ok(value) => values.push(value),
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(values),
    }
}

#[derive(Default)]
struct Queues {
    high: VecDeque<Job>,
    medium: VecDeque<Job>,
    low: VecDeque<Job>,
    shutdown: bool,
}

impl Queues {
    fn push(&mut self, priority: JobPriority, job: Job) {
        match priority {
            JobPriority::High => self.high.push_back(job),
            JobPriority::Medium => self.medium.push_back(job),
            JobPriority::Low => self.low.push_back(job),
        }
    }

    fn pop(&mut self) -> Option<Job> {
        self.high
            .pop_front()
            .or_else(|| self.medium.pop_front())
            .or_else(|| self.low.pop_front())
    }

    fn is_empty(&self) -> bool {
        self.high.is_empty() && self.medium.is_empty() && self.low.is_empty()
    }
}

struct Shared {
    queues: Mutex<Queues>,
    available: Condvar,
}

/// Fixed-size pool of worker threads.
///
/// Dropping the pool lets the workers finish every queued job, then joins them.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn a pool with `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues::default()),
            available: Condvar::new(),
        });

        let workers = (0..threads)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("kinesis-worker-{index}"))
                    .spawn(move || worker_loop(&shared))
                    .unwrap_or_else(|err| panic!("failed to spawn job worker {index}: {err}"))
            })
            .collect();

        tracing::debug!(threads, "thread pool started");
        Self { shared, workers }
    }

    /// Spawn one worker per available hardware thread.
    pub fn with_available_parallelism() -> Self {
        let threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(threads)
    }

    /// Number of jobs waiting in the queues.
    pub fn pending(&self) -> usize {
        let queues = self.shared.queues.lock();
        queues.high.len() + queues.medium.len() + queues.low.len()
    }
}

impl JobSystem for ThreadPool {
    fn execute(&self, priority: JobPriority, job: Job) {
        self.shared.queues.lock().push(priority, job);
        self.shared.available.notify_one();
    }

    fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.queues.lock().shutdown = true;
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("job worker exited by panic");
            }
        }
        tracing::debug!("thread pool shut down");
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut queues = shared.queues.lock();
            while queues.is_empty() && !queues.shutdown {
                shared.available.wait(&mut queues);
            }
            match queues.pop() {
                Some(job) => job,
                // Shutdown requested and nothing left to drain.
                None => return,
            }
        };
        // Raw jobs from `execute` carry no result channel; keep the worker alive.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            tracing::error!(
                panic = %panic_message(payload.as_ref()),
                "job panicked on worker thread"
            );
        }
    }
}

/// Runs every job synchronously on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl JobSystem for InlineExecutor {
    fn execute(&self, _priority: JobPriority, job: Job) {
        job();
    }

    fn worker_count(&self) -> usize {
        1
    }
}
