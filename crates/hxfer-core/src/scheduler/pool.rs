//! Bounded worker pool fed from a priority queue.
//!
//! A tokio runtime is started on the first job. Its dispatcher waits for one of
//! `max_workers` slots, then pops the best-ranked job and runs it with
//! `spawn_blocking`, so a job submitted later with a better rank overtakes
//! anything still queued. Idle blocking threads exit after `keep_alive`. After
//! `shutdown` no new jobs are accepted; queued jobs still run so their
//! completion hooks fire, then the dispatcher exits.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::{Notify, Semaphore};

use super::queue::PriorityQueue;

/// Hard ceiling on pool size.
pub const MAX_WORKERS: usize = 8;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_workers: usize,
    pub keep_alive: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_workers: default_workers(),
            keep_alive: Duration::from_secs(1),
        }
    }
}

/// `min(2 × cores, 3)`: transfers are I/O bound.
pub fn default_workers() -> usize {
    let cores = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores * 2).min(3)
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    ShutDown,
    #[error("failed to start worker runtime: {0}")]
    Spawn(#[source] io::Error),
}

struct Pending {
    jobs: PriorityQueue<Job>,
    shutdown: bool,
}

enum Next {
    Run(Job),
    Wait,
    Done,
}

struct Shared {
    pending: Mutex<Pending>,
    wake: Notify,
    slots: Arc<Semaphore>,
    running: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next(&self) -> Next {
        let mut pending = self.lock();
        match pending.jobs.pop() {
            Some(job) => Next::Run(job),
            None if pending.shutdown => Next::Done,
            None => Next::Wait,
        }
    }
}

pub(crate) struct WorkerPool {
    shared: Arc<Shared>,
    runtime: Mutex<Option<Runtime>>,
    max_workers: usize,
    keep_alive: Duration,
}

impl WorkerPool {
    pub(crate) fn new(options: PoolOptions) -> Self {
        let max_workers = options.max_workers.clamp(1, MAX_WORKERS);
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(Pending {
                    jobs: PriorityQueue::default(),
                    shutdown: false,
                }),
                wake: Notify::new(),
                slots: Arc::new(Semaphore::new(max_workers)),
                running: AtomicUsize::new(0),
            }),
            runtime: Mutex::new(None),
            max_workers,
            keep_alive: options.keep_alive,
        }
    }

    /// Queue `job` at `rank` (lower runs first).
    pub(crate) fn execute(&self, rank: i128, job: Job) -> Result<(), PoolError> {
        let mut pending = self.shared.lock();
        if pending.shutdown {
            return Err(PoolError::ShutDown);
        }
        self.ensure_started().map_err(PoolError::Spawn)?;
        pending.jobs.push(rank, job);
        drop(pending);
        self.shared.wake.notify_one();
        Ok(())
    }

    fn ensure_started(&self) -> io::Result<()> {
        let mut runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        if runtime.is_some() {
            return Ok(());
        }
        let next_id = AtomicUsize::new(0);
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(self.max_workers)
            .thread_keep_alive(self.keep_alive)
            .thread_name_fn(move || {
                format!("hxfer-worker-{}", next_id.fetch_add(1, Ordering::Relaxed))
            })
            .build()?;
        rt.spawn(dispatch(Arc::clone(&self.shared)));
        tracing::debug!(max_workers = self.max_workers, "worker runtime started");
        *runtime = Some(rt);
        Ok(())
    }

    /// Stop accepting jobs. Queued jobs still run. Does not wait.
    pub(crate) fn shutdown(&self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_one();
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shared.lock().shutdown
    }

    pub(crate) fn max_workers(&self) -> usize {
        self.max_workers
    }

    #[cfg(test)]
    fn running(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.shared.lock().jobs.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        let runtime = self
            .runtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(rt) = runtime {
            rt.shutdown_background();
        }
    }
}

async fn dispatch(shared: Arc<Shared>) {
    loop {
        let Ok(slot) = Arc::clone(&shared.slots).acquire_owned().await else {
            break;
        };
        let job = loop {
            match shared.next() {
                Next::Run(job) => break Some(job),
                Next::Done => break None,
                Next::Wait => shared.wake.notified().await,
            }
        };
        let Some(job) = job else { break };
        let worker = Arc::clone(&shared);
        tokio::task::spawn_blocking(move || {
            worker.running.fetch_add(1, Ordering::SeqCst);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                tracing::error!(panic = panic_message(&*payload), "transfer job panicked");
            }
            worker.running.fetch_sub(1, Ordering::SeqCst);
            drop(slot);
        });
    }
    tracing::debug!("worker dispatcher exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic>"
    }
}
