//! Transfer scheduler.
//!
//! Owns a bounded worker pool and the de-duplication map. At most one task per
//! key is in flight; submitting a key that is already in flight re-attaches the
//! new listener to the running task instead of starting a second transfer.
//! The map lock is held only for lookups, inserts and removals, never while a
//! transfer runs.

mod pool;
mod queue;

pub use pool::{default_workers, PoolError, PoolOptions, MAX_WORKERS};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::outcome::OutcomeSink;
use crate::task::{TaskKey, Transfer, TransferTask};

use pool::WorkerPool;

/// What `submit` did with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The task was queued for execution.
    Queued,
    /// A task with the same key was in flight; the listener was moved onto it
    /// and the submitted task was dropped.
    Attached,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("scheduler is shut down")]
    ShutDown,
    #[error("failed to start a worker: {0}")]
    Spawn(#[source] std::io::Error),
}

impl From<PoolError> for SubmitError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::ShutDown => SubmitError::ShutDown,
            PoolError::Spawn(io) => SubmitError::Spawn(io),
        }
    }
}

type TaskMap<K, T> = HashMap<K, Arc<TransferTask<K, T>>>;

/// Priority scheduler for one kind of transfer.
pub struct TransferScheduler<K: TaskKey, T: Transfer<K>> {
    tasks: Arc<Mutex<TaskMap<K, T>>>,
    pool: WorkerPool,
    sink: Arc<dyn OutcomeSink>,
}

fn lock_map<K: TaskKey, T: Transfer<K>>(tasks: &Mutex<TaskMap<K, T>>) -> MutexGuard<'_, TaskMap<K, T>> {
    tasks.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K: TaskKey, T: Transfer<K>> TransferScheduler<K, T> {
    /// Scheduler with the default pool size.
    pub fn new(sink: Arc<dyn OutcomeSink>) -> Self {
        Self::with_options(PoolOptions::default(), sink)
    }

    pub fn with_options(options: PoolOptions, sink: Arc<dyn OutcomeSink>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            pool: WorkerPool::new(options),
            sink,
        }
    }

    /// Queue `task` with `listener`, or attach `listener` to the in-flight task
    /// with the same key. Returns immediately.
    pub fn submit(
        &self,
        task: TransferTask<K, T>,
        listener: Arc<T::Listener>,
    ) -> Result<Submission, SubmitError> {
        if self.pool.is_shut_down() {
            return Err(SubmitError::ShutDown);
        }
        let task = {
            let mut tasks = lock_map(&self.tasks);
            if let Some(existing) = tasks.get(task.key()) {
                existing.set_listener(listener);
                tracing::debug!(key = ?task.key(), "attached listener to in-flight task");
                return Ok(Submission::Attached);
            }
            let task = Arc::new(task);
            task.set_listener(listener);
            task.set_completion_hook(self.removal_hook(&task));
            tasks.insert(task.key().clone(), Arc::clone(&task));
            task
        };

        let rank = task.rank();
        let job_task = Arc::clone(&task);
        let sink = Arc::clone(&self.sink);
        let job = Box::new(move || {
            let _complete = CompleteOnDrop(&job_task);
            let outcome = job_task.run(&*sink);
            tracing::debug!(key = ?job_task.key(), ?outcome, "task finished");
        });
        if let Err(e) = self.pool.execute(rank, job) {
            self.remove_if_same(&task);
            tracing::warn!(key = ?task.key(), error = %e, "task rejected by worker pool");
            return Err(e.into());
        }
        tracing::debug!(key = ?task.key(), priority = task.priority(), "task queued");
        Ok(Submission::Queued)
    }

    /// Hook that drops the map entry for `task`, unless the key now belongs to a
    /// newer task submitted after this one was cancelled.
    fn removal_hook(&self, task: &Arc<TransferTask<K, T>>) -> Box<dyn FnOnce() + Send> {
        let tasks = Arc::downgrade(&self.tasks);
        let me = Arc::downgrade(task);
        Box::new(move || remove_entry(&tasks, &me))
    }

    fn remove_if_same(&self, task: &Arc<TransferTask<K, T>>) {
        let mut tasks = lock_map(&self.tasks);
        if tasks.get(task.key()).is_some_and(|t| Arc::ptr_eq(t, task)) {
            tasks.remove(task.key());
        }
    }

    /// Cancel the task with `key` and drop it from the map. Returns false, doing
    /// nothing, when no such task is in flight.
    pub fn cancel(&self, key: &K) -> bool {
        let removed = lock_map(&self.tasks).remove(key);
        match removed {
            Some(task) => {
                task.cancel();
                tracing::debug!(?key, "task cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight and queued task and empty the map. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = lock_map(&self.tasks).drain().map(|(_, t)| t).collect();
        for task in &drained {
            task.cancel();
        }
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "all tasks cancelled");
        }
        drained.len()
    }

    /// Stop accepting work and cancel everything outstanding. Does not wait for
    /// running transfers to notice.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        let n = self.cancel_all();
        tracing::info!(cancelled = n, "scheduler shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.pool.is_shut_down()
    }

    /// Number of tasks in the de-duplication map (queued or running).
    pub fn in_flight(&self) -> usize {
        lock_map(&self.tasks).len()
    }

    pub fn contains(&self, key: &K) -> bool {
        lock_map(&self.tasks).contains_key(key)
    }

    pub fn max_workers(&self) -> usize {
        self.pool.max_workers()
    }
}

impl<K: TaskKey, T: Transfer<K>> fmt::Debug for TransferScheduler<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferScheduler")
            .field("in_flight", &self.in_flight())
            .field("max_workers", &self.pool.max_workers())
            .field("shut_down", &self.pool.is_shut_down())
            .finish()
    }
}

fn remove_entry<K: TaskKey, T: Transfer<K>>(
    tasks: &Weak<Mutex<TaskMap<K, T>>>,
    me: &Weak<TransferTask<K, T>>,
) {
    let (Some(tasks), Some(me)) = (tasks.upgrade(), me.upgrade()) else {
        return;
    };
    let mut map = lock_map(&tasks);
    if map.get(me.key()).is_some_and(|t| Arc::ptr_eq(t, &me)) {
        map.remove(me.key());
    }
}

/// Fires the task's completion hook when the job ends, including by panic.
struct CompleteOnDrop<'a, K: TaskKey, T: Transfer<K>>(&'a TransferTask<K, T>);

impl<K: TaskKey, T: Transfer<K>> Drop for CompleteOnDrop<'_, K, T> {
    fn drop(&mut self) {
        self.0.complete();
    }
}
