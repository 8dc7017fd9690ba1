use crate::idle::IdleTask;
use crate::interrupt::QuiescenceWatcher;
use crate::queue::TaskQueue;
use crate::script::ScriptTask;
use crate::timer::TimerTask;
use serde::Serialize;
use slotmap::new_key_type;

new_key_type! {
    /// Generation-checked handle to a task held by a [`TaskQueue`].
    ///
    /// Once the task is removed the handle never resolves again, even if its
    /// slot is reused by a later push.
    pub struct TaskId;
}

/// Verdict returned by one step of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep the task queued; it is stepped again next pass.
    Continue,
    /// Unlink and destroy the task.
    Done,
}

impl Step {
    pub fn is_done(self) -> bool {
        self == Step::Done
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskKind {
    Idle,
    Timer,
    Script,
    Watcher,
}

/// Closed set of task variants dispatched by the scheduler loop.
///
/// Tasks are stored behind `Rc` and only ever touched through `&self`, so a
/// step may push, remove or interrupt other tasks (itself included) without
/// invalidating the loop's own handle.
pub(crate) enum Task {
    Idle(IdleTask),
    Timer(TimerTask),
    Script(ScriptTask),
    Watcher(QuiescenceWatcher),
}

impl Task {
    pub(crate) fn kind(&self) -> TaskKind {
        match self {
            Task::Idle(_) => TaskKind::Idle,
            Task::Timer(_) => TaskKind::Timer,
            Task::Script(_) => TaskKind::Script,
            Task::Watcher(_) => TaskKind::Watcher,
        }
    }

    pub(crate) fn step(&self, queue: &TaskQueue, id: TaskId) -> Step {
        match self {
            Task::Idle(idle) => idle.step(queue),
            Task::Timer(timer) => timer.step(queue),
            Task::Script(script) => script.step(queue, id),
            Task::Watcher(watcher) => watcher.step(queue),
        }
    }

    /// Arms cancellation. Returns `false` for kinds without an interrupt
    /// function.
    pub(crate) fn interrupt(&self, queue: &TaskQueue) -> bool {
        match self {
            Task::Idle(idle) => idle.interrupt(),
            Task::Timer(timer) => timer.interrupt(),
            Task::Script(script) => script.interrupt(queue),
            Task::Watcher(_) => return false,
        }
        true
    }

    pub(crate) fn is_cancel_armed(&self) -> bool {
        match self {
            Task::Script(script) => script.is_armed(),
            _ => false,
        }
    }
}
