//! Transfer tasks: identity, priority, cancellation and observable state.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::control::CancelToken;
use crate::outcome::OutcomeSink;

/// Caller-supplied task identity used for de-duplication.
pub trait TaskKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> TaskKey for T where T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Queue order for a task's priority value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Lowest priority value runs first.
    #[default]
    Asc,
    /// Highest priority value runs first.
    Desc,
}

impl SortOrder {
    /// Queue rank; lower ranks are dequeued first.
    pub fn rank(self, priority: i64) -> i128 {
        match self {
            SortOrder::Asc => i128::from(priority),
            SortOrder::Desc => -i128::from(priority),
        }
    }
}

/// Position of a task in its transfer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Created = 0,
    Started = 1,
    Connected = 2,
    Transferring = 3,
    Completed = 4,
    Cancelled = 5,
    Failed = 6,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Created,
            1 => TaskState::Started,
            2 => TaskState::Connected,
            3 => TaskState::Transferring,
            4 => TaskState::Completed,
            5 => TaskState::Cancelled,
            _ => TaskState::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed
        )
    }
}

/// Terminal result of running a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Cancelled,
    Failed,
}

impl From<TaskOutcome> for TaskState {
    fn from(outcome: TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Completed => TaskState::Completed,
            TaskOutcome::Cancelled => TaskState::Cancelled,
            TaskOutcome::Failed => TaskState::Failed,
        }
    }
}

#[derive(Debug, Default)]
struct TaskStatus {
    cancel: CancelToken,
    state: AtomicU8,
}

/// Read-only view of a task, usable after the task has been submitted.
#[derive(Debug, Clone)]
pub struct TaskHandle<K> {
    key: K,
    status: Arc<TaskStatus>,
}

impl<K: TaskKey> TaskHandle<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.status.state.load(Ordering::Acquire))
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.cancel.is_cancelled()
    }
}

/// Everything a running transfer sees of its task.
pub struct TaskContext<K, L: ?Sized> {
    key: K,
    status: Arc<TaskStatus>,
    listener: RwLock<Option<Arc<L>>>,
}

impl<K: TaskKey, L: ?Sized> TaskContext<K, L> {
    pub(crate) fn new(key: K) -> Self {
        Self {
            key,
            status: Arc::new(TaskStatus::default()),
            listener: RwLock::new(None),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.status.cancel
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.status.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: TaskState) {
        self.status.state.store(state as u8, Ordering::Release);
    }

    /// Listener attached right now. It may be swapped between two callbacks.
    pub fn listener(&self) -> Option<Arc<L>> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_listener(&self, listener: Arc<L>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    /// Invoke `f` on the current listener, if any. The lock is not held during the call.
    pub fn notify(&self, f: impl FnOnce(&L)) {
        if let Some(listener) = self.listener() {
            f(&listener);
        }
    }
}

/// One direction of an HTTP exchange. Implemented by `Download` and `Upload`.
pub trait Transfer<K: TaskKey>: Send + Sync + 'static {
    type Listener: ?Sized + Send + Sync + 'static;

    /// Drive the exchange to a terminal outcome. Errors are reported to the
    /// listener and `sink` here and never returned.
    fn execute(&self, ctx: &Arc<TaskContext<K, Self::Listener>>, sink: &dyn OutcomeSink) -> TaskOutcome;
}

type CompletionHook = Box<dyn FnOnce() + Send>;

/// A unit of work with identity, priority and listener.
pub struct TransferTask<K: TaskKey, T: Transfer<K>> {
    priority: i64,
    order: SortOrder,
    transfer: T,
    ctx: Arc<TaskContext<K, T::Listener>>,
    hook: Mutex<Option<CompletionHook>>,
}

impl<K: TaskKey, T: Transfer<K>> TransferTask<K, T> {
    pub fn new(key: K, transfer: T) -> Self {
        Self {
            priority: 0,
            order: SortOrder::Asc,
            transfer,
            ctx: Arc::new(TaskContext::new(key)),
            hook: Mutex::new(None),
        }
    }

    pub fn with_priority(mut self, priority: i64, order: SortOrder) -> Self {
        self.priority = priority;
        self.order = order;
        self
    }

    pub fn key(&self) -> &K {
        self.ctx.key()
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn sort_order(&self) -> SortOrder {
        self.order
    }

    pub fn rank(&self) -> i128 {
        self.order.rank(self.priority)
    }

    /// Orders tasks by rank; `Less` runs first. Equal tasks keep submission order in the queue.
    pub fn cmp_priority(&self, other: &Self) -> CmpOrdering {
        self.rank().cmp(&other.rank())
    }

    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    pub fn handle(&self) -> TaskHandle<K> {
        TaskHandle {
            key: self.ctx.key.clone(),
            status: Arc::clone(&self.ctx.status),
        }
    }

    pub fn state(&self) -> TaskState {
        self.ctx.state()
    }

    pub fn cancel(&self) {
        self.ctx.status.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }

    pub(crate) fn set_listener(&self, listener: Arc<T::Listener>) {
        self.ctx.set_listener(listener);
    }

    pub(crate) fn set_completion_hook(&self, hook: CompletionHook) {
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    /// Run the state machine. A task cancelled before it starts goes straight to
    /// `Cancelled` without touching the network or its listener.
    pub(crate) fn run(&self, sink: &dyn OutcomeSink) -> TaskOutcome {
        if self.ctx.is_cancelled() {
            self.ctx.set_state(TaskState::Cancelled);
            tracing::debug!(key = ?self.key(), "task cancelled before start");
            return TaskOutcome::Cancelled;
        }
        self.ctx.set_state(TaskState::Started);
        let outcome = self.transfer.execute(&self.ctx, sink);
        self.ctx.set_state(outcome.into());
        outcome
    }

    /// Fire the completion hook. Later calls do nothing.
    pub(crate) fn complete(&self) {
        let hook = self.hook.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl<K: TaskKey, T: Transfer<K> + fmt::Debug> fmt::Debug for TransferTask<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferTask")
            .field("key", self.key())
            .field("priority", &self.priority)
            .field("order", &self.order)
            .field("state", &self.state())
            .field("transfer", &self.transfer)
            .finish()
    }
}
