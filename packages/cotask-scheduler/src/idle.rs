use crate::queue::TaskQueue;
use crate::task::{Step, Task, TaskId};
use std::cell::{Cell, RefCell};

pub type IdleFn = Box<dyn FnMut(&TaskQueue) -> Step>;

/// Runs a user step function every pass until it returns [`Step::Done`] or
/// the task is interrupted.
pub struct IdleTask {
    alive: Cell<bool>,
    user_step: RefCell<IdleFn>,
}

impl IdleTask {
    pub(crate) fn new(user_step: IdleFn) -> Self {
        Self {
            alive: Cell::new(true),
            user_step: RefCell::new(user_step),
        }
    }

    pub(crate) fn step(&self, queue: &TaskQueue) -> Step {
        if !self.alive.get() {
            return Step::Done;
        }
        (self.user_step.borrow_mut())(queue)
    }

    /// Takes effect on the next pass.
    pub(crate) fn interrupt(&self) {
        self.alive.set(false);
    }
}

impl TaskQueue {
    pub fn start_idle<F>(&self, user_step: F) -> TaskId
    where
        F: FnMut(&TaskQueue) -> Step + 'static,
    {
        self.push_task(Task::Idle(IdleTask::new(Box::new(user_step))))
    }
}
