//! Capabilities the scheduler needs from an embeddable scripting runtime.
//!
//! Any engine that can compile a buffer into a callable, keep values alive in
//! a persistent registry, run a protected call with a message handler and fire
//! a debug hook every N instructions can back scripted tasks.

use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Opaque key into an engine's persistent value registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryKey(usize);

impl RegistryKey {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("not enough memory: {0}")]
    Memory(String),

    #[error("load failed with status {code}: {message}")]
    Other { code: i32, message: String },
}

impl LoadError {
    /// Status code in the engine's numbering.
    pub fn code(&self) -> i32 {
        match self {
            LoadError::Syntax(_) => 3,
            LoadError::Memory(_) => 4,
            LoadError::Other { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            LoadError::Syntax(message)
            | LoadError::Memory(message)
            | LoadError::Other { message, .. } => message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Raised by the script. `message` is whatever the message handler
    /// returned.
    #[error("runtime error: {message}")]
    Runtime { message: String },

    #[error("not enough memory")]
    Memory,

    #[error("call failed with status {code}")]
    Other { code: i32 },
}

impl CallError {
    pub fn code(&self) -> i32 {
        match self {
            CallError::Runtime { .. } => 2,
            CallError::Memory => 4,
            CallError::Other { code } => *code,
        }
    }
}

/// Passed to a debug hook each time it fires.
#[derive(Debug, Clone, Copy)]
pub struct HookInfo {
    /// Instructions executed by the engine so far.
    pub instructions: u64,
    /// Active call depth, 1 for the outermost function.
    pub depth: usize,
}

pub type DebugHook = Rc<dyn Fn(&HookInfo)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub chunk: String,
    pub function: String,
    pub line: usize,
}

impl fmt::Display for FrameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.function.is_empty() {
            write!(f, "{}:{}: in main chunk", self.chunk, self.line)
        } else {
            write!(f, "{}:{}: in function '{}'", self.chunk, self.line, self.function)
        }
    }
}

/// What an engine hands its message handler when a script raises. `frames`
/// is ordered outermost first and still reflects the raising call stack.
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    pub message: &'a str,
    pub frames: &'a [FrameInfo],
}

pub type MessageHandler<'a> = &'a dyn Fn(&ErrorContext<'_>) -> String;

/// An embeddable scripting runtime, shared as `Rc<dyn ScriptEngine>`.
///
/// Methods take `&self`: a debug hook must be installable while a protected
/// call is running, so engines keep their state behind interior mutability
/// and release every borrow before invoking hooks or host code.
///
/// Hooks may unwind out of [`call_protected`](Self::call_protected) with a
/// panic payload the engine does not recognise. Engines must let it pass
/// and must stay usable afterwards once [`set_top`](Self::set_top) has
/// restored the stack.
pub trait ScriptEngine {
    /// Compiles `source` and pushes the resulting callable on the engine
    /// stack.
    fn load(&self, source: &[u8], chunk_name: &str) -> Result<(), LoadError>;

    /// Pops the top of the stack into the registry. `None` when the stack is
    /// empty.
    fn reference(&self) -> Option<RegistryKey>;

    fn unreference(&self, key: RegistryKey);

    /// Calls the registered callable with no arguments and no results.
    /// `handler` runs at the raise point to build the error message.
    fn call_protected(
        &self,
        key: RegistryKey,
        handler: MessageHandler<'_>,
    ) -> Result<(), CallError>;

    /// Installs `hook`, fired every `every` executed instructions. Replaces
    /// any previous hook.
    fn set_hook(&self, hook: DebugHook, every: u32);

    fn clear_hook(&self);

    fn top(&self) -> usize;

    fn set_top(&self, top: usize);
}
