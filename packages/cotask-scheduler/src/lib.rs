//! Cooperative, single-threaded task scheduler for event-driven devices.
//!
//! A [`TaskQueue`] owns an insertion-ordered set of tasks. Each pass of the
//! loop steps every live task once; a task answers [`Step::Continue`] to stay
//! queued or [`Step::Done`] to be removed. Four task kinds exist:
//!
//! - idle tasks, stepped every pass until they finish or are interrupted,
//! - timers, fired once a deadline has passed and optionally repeated,
//! - scripted tasks, one protected call into a [`ScriptEngine`] that can be
//!   cancelled from a debug hook while the script is still running,
//! - quiescence watchers, pushed by [`TaskQueue::interrupt_all`].
//!
//! ```
//! use cotask_scheduler::{Step, TaskQueue};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let queue = TaskQueue::new_default();
//! let fired = Rc::new(Cell::new(0));
//! let probe = fired.clone();
//! queue.start_timer(0, None, move |_| probe.set(probe.get() + 1));
//! queue.start_idle(|_| Step::Done);
//! queue.run_once();
//! assert_eq!(fired.get(), 1);
//! assert!(queue.is_empty());
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod idle;
pub mod interrupt;
pub mod observer;
pub mod queue;
pub mod scheduler;
pub mod script;
pub mod task;
pub mod timer;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{RepeatPolicy, SchedulerConfig};
pub use engine::{
    CallError, DebugHook, ErrorContext, FrameInfo, HookInfo, LoadError, MessageHandler,
    RegistryKey, ScriptEngine,
};
pub use error::SchedulerError;
pub use observer::{Observer, RecordingObserver, StatusTag, TracingObserver};
pub use queue::{QueueBuilder, SchedulerStats, TaskQueue, WeakQueue};
pub use scheduler::RunOutcome;
pub use script::{Cancelled, traceback};
pub use task::{Step, TaskId, TaskKind};
