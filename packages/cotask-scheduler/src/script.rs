//! Scripted-execution tasks.
//!
//! A scripted task makes exactly one protected call into a [`ScriptEngine`]
//! and is always removed afterwards. Interrupting it installs a debug hook;
//! when the hook fires inside the running script it unwinds with a
//! [`Cancelled`] payload, which only the step that owns the call catches.

use crate::engine::{
    CallError, DebugHook, ErrorContext, HookInfo, LoadError, RegistryKey, ScriptEngine,
};
use crate::observer::StatusTag;
use crate::queue::TaskQueue;
use crate::task::{Step, Task, TaskId};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

/// Unwind payload carrying a cancellation from a debug hook back to the
/// scripted step that is executing. Engines that catch unwinds themselves
/// must re-raise it untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled {
    pub task: TaskId,
}

pub struct ScriptTask {
    engine: Rc<dyn ScriptEngine>,
    key: RegistryKey,
    unref_on_exit: bool,
    armed: Cell<bool>,
    ran: Cell<bool>,
}

impl ScriptTask {
    pub(crate) fn new(
        engine: Rc<dyn ScriptEngine>,
        key: RegistryKey,
        unref_on_exit: bool,
    ) -> Self {
        Self {
            engine,
            key,
            unref_on_exit,
            armed: Cell::new(false),
            ran: Cell::new(false),
        }
    }

    pub(crate) fn step(&self, queue: &TaskQueue, id: TaskId) -> Step {
        self.ran.set(true);
        let engine = &*self.engine;
        let base = engine.top();

        if self.armed.get() {
            // Interrupted before the call started; another script may have
            // cleared the engine's hook since.
            self.install_hook(queue);
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            engine.call_protected(self.key, &traceback)
        }));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => match payload.downcast::<Cancelled>() {
                Ok(cancelled) if cancelled.task == id => {
                    tracing::debug!(?id, "script cancelled");
                    Ok(())
                }
                Ok(cancelled) => panic::resume_unwind(cancelled),
                Err(payload) => panic::resume_unwind(payload),
            },
        };

        if let Err(err) = result {
            report_call_error(queue, &err);
        }

        engine.set_top(base);
        if self.armed.get() {
            engine.clear_hook();
        }
        if self.unref_on_exit {
            engine.unreference(self.key);
        }
        Step::Done
    }

    pub(crate) fn interrupt(&self, queue: &TaskQueue) {
        self.armed.set(true);
        self.install_hook(queue);
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed.get()
    }

    fn install_hook(&self, queue: &TaskQueue) {
        let weak = queue.downgrade();
        let hook: DebugHook = Rc::new(move |info: &HookInfo| {
            let Some(queue) = weak.upgrade() else {
                return;
            };
            let Some(task) = queue.current() else {
                return;
            };
            if queue.is_cancel_armed(task) {
                tracing::trace!(?task, depth = info.depth, "cancellation hook fired");
                panic::resume_unwind(Box::new(Cancelled { task }));
            }
        });
        self.engine.set_hook(hook, queue.config().hook_interval.max(1));
    }
}

impl Drop for ScriptTask {
    /// Releases what the step would have released when the task is removed
    /// before it ever ran.
    fn drop(&mut self) {
        if self.ran.get() {
            return;
        }
        if self.armed.get() {
            self.engine.clear_hook();
        }
        if self.unref_on_exit {
            self.engine.unreference(self.key);
        }
    }
}

/// Message handler installed beneath every scripted call: the error message
/// followed by the raising call stack, innermost frame first.
pub fn traceback(context: &ErrorContext<'_>) -> String {
    let mut message = String::from(context.message);
    if context.frames.is_empty() {
        return message;
    }
    message.push_str("\nstack traceback:");
    for frame in context.frames.iter().rev() {
        message.push_str("\n\t");
        message.push_str(&frame.to_string());
    }
    message
}

fn report_call_error(queue: &TaskQueue, err: &CallError) {
    tracing::warn!(code = err.code(), "script failed: {err}");
    let notice = match err {
        CallError::Memory => "ERROR: Not enough memory to execute code.".to_string(),
        CallError::Runtime { message } => format!("ERROR: Thrown from code: {message}"),
        CallError::Other { code } => format!("ERROR: Could not run code: {code}"),
    };
    queue.notify(StatusTag::Notice, &notice);
}

fn report_load_error(queue: &TaskQueue, err: &LoadError) {
    tracing::warn!(code = err.code(), "script rejected: {err}");
    let notice = match err {
        LoadError::Memory(message) => format!("ERROR: Not enough memory to load code: {message}"),
        LoadError::Syntax(message) => format!("ERROR: Syntax error: {message}"),
        LoadError::Other { code, message } => {
            format!("ERROR: Could not load code (error #{code}): {message}")
        }
    };
    queue.notify(StatusTag::Notice, &notice);
}

impl TaskQueue {
    /// Schedules one protected call of the callable registered under `key`.
    pub fn start_script(
        &self,
        engine: Rc<dyn ScriptEngine>,
        key: RegistryKey,
        unref_on_exit: bool,
    ) -> TaskId {
        self.push_task(Task::Script(ScriptTask::new(engine, key, unref_on_exit)))
    }

    /// Compiles `source` and schedules it. The buffer is consumed whatever
    /// the outcome; on failure the error is reported and nothing is queued.
    pub fn parse_and_start<B>(
        &self,
        engine: Rc<dyn ScriptEngine>,
        source: B,
    ) -> Result<TaskId, LoadError>
    where
        B: AsRef<[u8]>,
    {
        let loaded = engine.load(source.as_ref(), &self.config().chunk_name);
        drop(source);

        if let Err(err) = loaded {
            report_load_error(self, &err);
            return Err(err);
        }
        let Some(key) = engine.reference() else {
            let err = LoadError::Other {
                code: -1,
                message: "engine produced no callable".to_string(),
            };
            report_load_error(self, &err);
            return Err(err);
        };

        self.notify(StatusTag::Notice, "Running script...");
        self.notify(StatusTag::State, "1");
        Ok(self.start_script(engine, key, true))
    }
}
