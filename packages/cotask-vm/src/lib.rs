//! A small stack-machine scripting engine.
//!
//! Source is line oriented. Top-level instructions form the main chunk,
//! `fn <name>` ... `end` defines a function and `<label>:` marks a jump
//! target inside the enclosing body. `#` starts a comment.
//!
//! ```text
//! fn spin
//! top:
//!   host tick
//!   jump top
//! end
//!
//! push 3
//! call spin
//! ```
//!
//! [`Vm`] implements [`cotask_scheduler::ScriptEngine`], so compiled chunks
//! can run as scripted tasks and be cancelled from the debug hook.

pub mod compile;
pub mod program;
pub mod vm;

pub use compile::compile;
pub use program::{Function, Op, Program};
pub use vm::{HostFn, Value, Vm, VmConfig};
