use crate::clock::{Clock, MonotonicClock};
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::observer::{Observer, StatusTag, TracingObserver};
use crate::task::{Task, TaskId, TaskKind};
use serde::Serialize;
use slotmap::{SecondaryMap, SlotMap};
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Counters kept per queue for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub passes: u64,
    pub steps: u64,
    pub completed: u64,
    pub interrupts: u64,
}

/// Insertion-ordered set of tasks.
///
/// Since the scheduler is single-threaded, the queue is a cheap `Rc` handle
/// over `RefCell` storage; clones refer to the same queue. Task records live
/// in a slot map so removed tasks cannot be reached through stale ids.
#[derive(Clone)]
pub struct TaskQueue {
    pub(crate) inner: Rc<QueueInner>,
}

/// Non-owning queue handle, used by engine hooks.
#[derive(Clone)]
pub struct WeakQueue(Weak<QueueInner>);

impl WeakQueue {
    pub fn upgrade(&self) -> Option<TaskQueue> {
        self.0.upgrade().map(|inner| TaskQueue { inner })
    }
}

pub(crate) struct QueueInner {
    tasks: RefCell<SlotMap<TaskId, Rc<Task>>>,
    order: RefCell<Vec<TaskId>>,
    pub(crate) current: Cell<Option<TaskId>>,
    pub(crate) stop: Cell<bool>,
    pub(crate) stats: Cell<SchedulerStats>,
    config: SchedulerConfig,
    clock: Rc<dyn Clock>,
    observer: Rc<dyn Observer>,
}

pub struct QueueBuilder {
    config: SchedulerConfig,
    clock: Option<Rc<dyn Clock>>,
    observer: Option<Rc<dyn Observer>>,
}

impl QueueBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn observer(mut self, observer: Rc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> TaskQueue {
        let clock = self
            .clock
            .unwrap_or_else(|| Rc::new(MonotonicClock::new()));
        let observer = self.observer.unwrap_or_else(|| Rc::new(TracingObserver));
        TaskQueue::new(self.config, clock, observer)
    }
}

impl TaskQueue {
    pub fn new(config: SchedulerConfig, clock: Rc<dyn Clock>, observer: Rc<dyn Observer>) -> Self {
        Self {
            inner: Rc::new(QueueInner {
                tasks: RefCell::new(SlotMap::with_key()),
                order: RefCell::new(Vec::new()),
                current: Cell::new(None),
                stop: Cell::new(false),
                stats: Cell::new(SchedulerStats::default()),
                config,
                clock,
                observer,
            }),
        }
    }

    /// Queue with the default configuration, the monotonic clock and the
    /// tracing observer.
    pub fn new_default() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> QueueBuilder {
        QueueBuilder {
            config: SchedulerConfig::default(),
            clock: None,
            observer: None,
        }
    }

    pub(crate) fn push_task(&self, task: Task) -> TaskId {
        let kind = task.kind();
        let id = self.inner.tasks.borrow_mut().insert(Rc::new(task));
        self.inner.order.borrow_mut().push(id);
        tracing::trace!(?id, ?kind, "task pushed");
        id
    }

    /// Unlinks a task. The record is dropped once the caller's step (if any)
    /// has released it.
    pub fn remove(&self, id: TaskId) -> Result<(), SchedulerError> {
        let removed = self
            .inner
            .tasks
            .borrow_mut()
            .remove(id)
            .ok_or(SchedulerError::UnknownTask(id))?;
        self.inner.order.borrow_mut().retain(|&queued| queued != id);
        tracing::trace!(?id, kind = ?removed.kind(), "task removed");
        // Dropped after both borrows end: user closures may touch the queue.
        drop(removed);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.inner.order.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.order.borrow().is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.inner.tasks.borrow().contains_key(id)
    }

    /// Task ids in queue order.
    pub fn ids(&self) -> Vec<TaskId> {
        self.inner.order.borrow().clone()
    }

    pub fn kind_of(&self, id: TaskId) -> Option<TaskKind> {
        self.inner.tasks.borrow().get(id).map(|task| task.kind())
    }

    /// The task whose step is executing right now. Only set while the loop is
    /// inside a step call; never cache it across calls.
    pub fn current(&self) -> Option<TaskId> {
        self.inner.current.get()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.stats.get()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    /// Sends a status message to the observer channel. Best effort.
    pub fn notify(&self, tag: StatusTag, message: &str) {
        self.inner.observer.command(tag, message);
    }

    pub fn downgrade(&self) -> WeakQueue {
        WeakQueue(Rc::downgrade(&self.inner))
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<Rc<Task>> {
        self.inner.tasks.borrow().get(id).cloned()
    }

    pub(crate) fn first(&self) -> Option<TaskId> {
        self.inner.order.borrow().first().copied()
    }

    pub(crate) fn next_after(&self, id: TaskId) -> Option<TaskId> {
        let order = self.inner.order.borrow();
        let position = order.iter().position(|&queued| queued == id)?;
        order.get(position + 1).copied()
    }

    /// Queue order copied without a heap allocation for small queues.
    pub(crate) fn id_snapshot(&self) -> SmallVec<[TaskId; 16]> {
        self.inner.order.borrow().iter().copied().collect()
    }

    /// First queued task not yet stepped in the current pass.
    pub(crate) fn first_unvisited(&self, visited: &SecondaryMap<TaskId, ()>) -> Option<TaskId> {
        self.inner
            .order
            .borrow()
            .iter()
            .copied()
            .find(|&queued| !visited.contains_key(queued))
    }

    pub(crate) fn is_cancel_armed(&self, id: TaskId) -> bool {
        self.get(id).is_some_and(|task| task.is_cancel_armed())
    }

    /// True when every queued task is a quiescence watcher.
    pub(crate) fn only_watchers_remain(&self) -> bool {
        self.inner
            .tasks
            .borrow()
            .values()
            .all(|task| task.kind() == TaskKind::Watcher)
    }

    pub(crate) fn update_stats(&self, update: impl FnOnce(&mut SchedulerStats)) {
        let mut stats = self.inner.stats.get();
        update(&mut stats);
        self.inner.stats.set(stats);
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new_default()
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("tasks", &self.ids())
            .field("current", &self.current())
            .field("stats", &self.stats())
            .finish()
    }
}
