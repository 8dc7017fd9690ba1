//! Interrupt-all and the quiescence barrier.
//!
//! [`TaskQueue::interrupt_all`] arms cancellation on every queued task and then
//! appends a watcher. The watcher polls the queue once per pass and runs its
//! callback exactly once, on the first pass where nothing but watchers is
//! left. The loop is never blocked while waiting.

use crate::error::SchedulerError;
use crate::queue::TaskQueue;
use crate::task::{Step, Task, TaskId};
use std::cell::RefCell;

pub type QuiescentFn = Box<dyn FnOnce(&TaskQueue)>;

pub struct QuiescenceWatcher {
    on_quiescent: RefCell<Option<QuiescentFn>>,
}

impl QuiescenceWatcher {
    pub(crate) fn new(on_quiescent: QuiescentFn) -> Self {
        Self {
            on_quiescent: RefCell::new(Some(on_quiescent)),
        }
    }

    pub(crate) fn step(&self, queue: &TaskQueue) -> Step {
        tracing::debug!("Interrupting ({} tasks remaining)...", queue.count());
        if !queue.only_watchers_remain() {
            return Step::Continue;
        }
        let callback = self.on_quiescent.borrow_mut().take();
        if let Some(callback) = callback {
            tracing::info!("queue quiescent");
            callback(queue);
        }
        Step::Done
    }
}

impl TaskQueue {
    /// Arms cancellation on every queued task, then pushes a watcher that calls
    /// `on_quiescent` once all other tasks have left the queue.
    ///
    /// Nothing is stopped synchronously: idle tasks and timers finish on their
    /// next step, scripted tasks at the engine's next hook interval.
    pub fn interrupt_all<F>(&self, on_quiescent: F) -> TaskId
    where
        F: FnOnce(&TaskQueue) + 'static,
    {
        let mut delivered = 0u64;
        for id in self.id_snapshot() {
            let Some(task) = self.get(id) else {
                continue;
            };
            if task.interrupt(self) {
                delivered += 1;
            }
        }
        self.update_stats(|stats| stats.interrupts += delivered);
        tracing::info!(delivered, "interrupt requested for all tasks");

        self.push_task(Task::Watcher(QuiescenceWatcher::new(Box::new(on_quiescent))))
    }

    /// Arms cancellation on a single task.
    pub fn interrupt(&self, id: TaskId) -> Result<(), SchedulerError> {
        let task = self.get(id).ok_or(SchedulerError::UnknownTask(id))?;
        if task.interrupt(self) {
            self.update_stats(|stats| stats.interrupts += 1);
            tracing::debug!(?id, "interrupt delivered");
        }
        Ok(())
    }
}
