use crate::config::RepeatPolicy;
use crate::queue::TaskQueue;
use crate::task::{Step, Task, TaskId};
use std::cell::{Cell, RefCell};

pub type TimerFn = Box<dyn FnMut(&TaskQueue)>;

/// Fires a callback once the clock reaches an absolute deadline.
pub struct TimerTask {
    alive: Cell<bool>,
    deadline: Cell<u64>,
    repeat: Option<u64>,
    fire: RefCell<TimerFn>,
}

impl TimerTask {
    pub(crate) fn new(deadline: u64, repeat: Option<u64>, fire: TimerFn) -> Self {
        Self {
            alive: Cell::new(true),
            deadline: Cell::new(deadline),
            repeat,
            fire: RefCell::new(fire),
        }
    }

    pub(crate) fn step(&self, queue: &TaskQueue) -> Step {
        if !self.alive.get() {
            return Step::Done;
        }
        if queue.now_ms() < self.deadline.get() {
            return Step::Continue;
        }

        (self.fire.borrow_mut())(queue);

        // The callback may have interrupted its own timer.
        let Some(interval) = self.repeat.filter(|_| self.alive.get()) else {
            return Step::Done;
        };
        let next = match queue.config().repeat_policy {
            RepeatPolicy::FromDeadline => self.deadline.get().saturating_add(interval),
            RepeatPolicy::FromNow => queue.now_ms().saturating_add(interval),
        };
        self.deadline.set(next);
        Step::Continue
    }

    pub(crate) fn interrupt(&self) {
        self.alive.set(false);
    }
}

impl TaskQueue {
    /// Schedules `fire` to run `delay_ms` from now, then every `repeat_ms` if
    /// given.
    pub fn start_timer<F>(&self, delay_ms: u64, repeat_ms: Option<u64>, fire: F) -> TaskId
    where
        F: FnMut(&TaskQueue) + 'static,
    {
        let deadline = self.now_ms().saturating_add(delay_ms);
        tracing::trace!(deadline, ?repeat_ms, "timer scheduled");
        self.push_task(Task::Timer(TimerTask::new(
            deadline,
            repeat_ms,
            Box::new(fire),
        )))
    }
}
