use crate::compile::compile;
use crate::program::{Op, Program};
use cotask_scheduler::{
    CallError, DebugHook, ErrorContext, FrameInfo, HookInfo, LoadError, MessageHandler,
    RegistryKey, ScriptEngine,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use slab::Slab;
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Bytes `alloc` may reserve during one call. Also the largest chunk
    /// source `load` accepts; loaded source is not charged against it.
    pub memory_limit: usize,
    pub max_call_depth: usize,
    /// Values the stack may hold before a push reports out of memory.
    pub max_stack: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            memory_limit: 64 * 1024,
            max_call_depth: 200,
            max_stack: 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Function(Rc<Program>),
}

/// Host function callable from scripts with `host <name>`. It works on the
/// VM stack directly; an `Err` is raised as a runtime error.
pub type HostFn = Rc<dyn Fn(&Vm) -> Result<(), String>>;

struct State {
    stack: Vec<Value>,
    registry: Slab<Value>,
    allocated: usize,
}

struct Frame {
    function: usize,
    pc: usize,
}

/// Resets the allocation mark when a protected call ends, whether it
/// returns or is unwound from a hook.
struct AllocationScope<'a> {
    state: &'a RefCell<State>,
    mark: usize,
}

impl<'a> AllocationScope<'a> {
    fn enter(state: &'a RefCell<State>) -> Self {
        let mark = state.borrow().allocated;
        Self { state, mark }
    }
}

impl Drop for AllocationScope<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.allocated = self.mark;
        }
    }
}

/// Stack-machine engine. All state sits behind cells so hooks and host
/// functions can call back into the VM while a script is running; no borrow
/// is held across either.
pub struct Vm {
    config: VmConfig,
    state: RefCell<State>,
    hook: RefCell<Option<(DebugHook, u32)>>,
    countdown: Cell<u32>,
    instructions: Cell<u64>,
    hosts: RefCell<FxHashMap<String, HostFn>>,
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        Self {
            config,
            state: RefCell::new(State {
                stack: Vec::new(),
                registry: Slab::new(),
                allocated: 0,
            }),
            hook: RefCell::new(None),
            countdown: Cell::new(0),
            instructions: Cell::new(0),
            hosts: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn register_host<F>(&self, name: &str, host: F)
    where
        F: Fn(&Vm) -> Result<(), String> + 'static,
    {
        self.hosts.borrow_mut().insert(name.to_string(), Rc::new(host));
    }

    /// Instructions executed since the VM was created.
    pub fn instructions(&self) -> u64 {
        self.instructions.get()
    }

    /// Live registry entries.
    pub fn registry_len(&self) -> usize {
        self.state.borrow().registry.len()
    }

    pub fn allocated(&self) -> usize {
        self.state.borrow().allocated
    }

    pub fn has_hook(&self) -> bool {
        self.hook.borrow().is_some()
    }

    pub fn push_int(&self, value: i64) -> Result<(), String> {
        self.push(Value::Int(value)).map_err(|_| "stack overflow".to_string())
    }

    /// Pops the top value if it is an integer.
    pub fn pop_int(&self) -> Option<i64> {
        let mut state = self.state.borrow_mut();
        match state.stack.last() {
            Some(Value::Int(value)) => {
                let value = *value;
                state.stack.pop();
                Some(value)
            }
            _ => None,
        }
    }

    fn push(&self, value: Value) -> Result<(), CallError> {
        let mut state = self.state.borrow_mut();
        if state.stack.len() >= self.config.max_stack {
            return Err(CallError::Memory);
        }
        state.stack.push(value);
        Ok(())
    }

    fn pop(&self) -> Option<Value> {
        self.state.borrow_mut().stack.pop()
    }

    fn count_instruction(&self, depth: usize) {
        let executed = self.instructions.get() + 1;
        self.instructions.set(executed);

        let hook = match &*self.hook.borrow() {
            Some((hook, every)) => {
                let left = self.countdown.get().saturating_sub(1);
                if left == 0 {
                    self.countdown.set(*every);
                    Some(hook.clone())
                } else {
                    self.countdown.set(left);
                    None
                }
            }
            None => None,
        };
        if let Some(hook) = hook {
            hook(&HookInfo {
                instructions: executed,
                depth,
            });
        }
    }

    fn runtime_error(
        &self,
        program: &Program,
        frames: &[Frame],
        message: &str,
        handler: MessageHandler<'_>,
    ) -> CallError {
        let trace: Vec<FrameInfo> = frames
            .iter()
            .map(|frame| {
                let function = &program.functions[frame.function];
                FrameInfo {
                    chunk: program.chunk.clone(),
                    function: function.name.clone(),
                    line: function
                        .lines
                        .get(frame.pc.saturating_sub(1))
                        .copied()
                        .unwrap_or_default(),
                }
            })
            .collect();
        CallError::Runtime {
            message: handler(&ErrorContext {
                message,
                frames: &trace,
            }),
        }
    }

    fn execute(&self, program: &Program, handler: MessageHandler<'_>) -> Result<(), CallError> {
        let mut frames: SmallVec<[Frame; 8]> = SmallVec::new();
        frames.push(Frame { function: 0, pc: 0 });

        while let Some(frame) = frames.last_mut() {
            let function = &program.functions[frame.function];
            let Some(op) = function.code.get(frame.pc) else {
                frames.pop();
                continue;
            };
            frame.pc += 1;
            self.count_instruction(frames.len());

            match op {
                Op::Push(value) => self.push(Value::Int(*value))?,
                Op::Pop => {
                    if self.pop().is_none() {
                        return Err(self.runtime_error(program, &frames, "stack underflow", handler));
                    }
                }
                Op::Dup => {
                    let top = self.state.borrow().stack.last().cloned();
                    let Some(top) = top else {
                        return Err(self.runtime_error(program, &frames, "stack underflow", handler));
                    };
                    self.push(top)?;
                }
                Op::Add | Op::Sub => {
                    let (Some(rhs), Some(lhs)) = (self.pop(), self.pop()) else {
                        return Err(self.runtime_error(program, &frames, "stack underflow", handler));
                    };
                    let (Value::Int(lhs), Value::Int(rhs)) = (lhs, rhs) else {
                        return Err(self.runtime_error(
                            program,
                            &frames,
                            "attempt to perform arithmetic on a function value",
                            handler,
                        ));
                    };
                    let result = if matches!(op, Op::Add) {
                        lhs.wrapping_add(rhs)
                    } else {
                        lhs.wrapping_sub(rhs)
                    };
                    self.push(Value::Int(result))?;
                }
                Op::Jump(target) => {
                    if let Some(frame) = frames.last_mut() {
                        frame.pc = *target;
                    }
                }
                Op::JumpZero(target) => {
                    let Some(value) = self.pop() else {
                        return Err(self.runtime_error(program, &frames, "stack underflow", handler));
                    };
                    if matches!(value, Value::Int(0)) {
                        if let Some(frame) = frames.last_mut() {
                            frame.pc = *target;
                        }
                    }
                }
                Op::Call(callee) => {
                    if frames.len() >= self.config.max_call_depth {
                        return Err(self.runtime_error(program, &frames, "stack overflow", handler));
                    }
                    frames.push(Frame {
                        function: *callee,
                        pc: 0,
                    });
                }
                Op::Ret => {
                    frames.pop();
                }
                Op::Raise(message) => {
                    return Err(self.runtime_error(program, &frames, message, handler));
                }
                Op::Host(name) => {
                    let host = self.hosts.borrow().get(name.as_str()).cloned();
                    let Some(host) = host else {
                        let message = format!("unknown host function '{name}'");
                        return Err(self.runtime_error(program, &frames, &message, handler));
                    };
                    if let Err(err) = host(self) {
                        let message = format!("{name}: {err}");
                        return Err(self.runtime_error(program, &frames, &message, handler));
                    }
                }
                Op::Alloc(bytes) => {
                    let mut state = self.state.borrow_mut();
                    let total = state.allocated.saturating_add(*bytes);
                    if total > self.config.memory_limit {
                        return Err(CallError::Memory);
                    }
                    state.allocated = total;
                }
            }
        }
        Ok(())
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl ScriptEngine for Vm {
    fn load(&self, source: &[u8], chunk_name: &str) -> Result<(), LoadError> {
        if source.len() > self.config.memory_limit {
            return Err(LoadError::Memory(format!(
                "chunk '{chunk_name}' needs {} bytes, limit is {}",
                source.len(),
                self.config.memory_limit
            )));
        }
        let text = std::str::from_utf8(source)
            .map_err(|err| LoadError::Syntax(format!("{chunk_name}: {err}")))?;
        let program = compile(text, chunk_name)?;
        self.push(Value::Function(Rc::new(program)))
            .map_err(|_| LoadError::Memory("stack overflow".to_string()))?;
        tracing::debug!(chunk = chunk_name, bytes = source.len(), "chunk loaded");
        Ok(())
    }

    fn reference(&self) -> Option<RegistryKey> {
        let mut state = self.state.borrow_mut();
        let value = state.stack.pop()?;
        Some(RegistryKey::new(state.registry.insert(value)))
    }

    fn unreference(&self, key: RegistryKey) {
        let mut state = self.state.borrow_mut();
        if state.registry.contains(key.index()) {
            state.registry.remove(key.index());
        }
    }

    fn call_protected(
        &self,
        key: RegistryKey,
        handler: MessageHandler<'_>,
    ) -> Result<(), CallError> {
        let callee = self.state.borrow().registry.get(key.index()).cloned();
        let Some(Value::Function(program)) = callee else {
            return Err(CallError::Runtime {
                message: handler(&ErrorContext {
                    message: "attempt to call a non-function value",
                    frames: &[],
                }),
            });
        };

        let _allocations = AllocationScope::enter(&self.state);
        let base = self.top();
        tracing::trace!(chunk = %program.chunk, "protected call");
        let result = self.execute(&program, handler);
        self.set_top(base);
        result
    }

    fn set_hook(&self, hook: DebugHook, every: u32) {
        let every = every.max(1);
        self.countdown.set(every);
        *self.hook.borrow_mut() = Some((hook, every));
    }

    fn clear_hook(&self) {
        *self.hook.borrow_mut() = None;
    }

    fn top(&self) -> usize {
        self.state.borrow().stack.len()
    }

    fn set_top(&self, top: usize) {
        self.state.borrow_mut().stack.truncate(top);
    }
}
