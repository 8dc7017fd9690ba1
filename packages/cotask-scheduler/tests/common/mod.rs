#![allow(dead_code)]

use cotask_scheduler::{
    CallError, DebugHook, ErrorContext, FrameInfo, HookInfo, LoadError, ManualClock,
    MessageHandler, RecordingObserver, RegistryKey, ScriptEngine, SchedulerConfig, TaskQueue,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub struct Harness {
    pub queue: TaskQueue,
    pub clock: Rc<ManualClock>,
    pub observer: Rc<RecordingObserver>,
}

pub fn harness() -> Harness {
    harness_with(SchedulerConfig::default())
}

pub fn harness_with(config: SchedulerConfig) -> Harness {
    let clock = Rc::new(ManualClock::new(0));
    let observer = Rc::new(RecordingObserver::new());
    let queue = TaskQueue::builder()
        .config(config)
        .clock(clock.clone())
        .observer(observer.clone())
        .build();
    Harness {
        queue,
        clock,
        observer,
    }
}

/// What a mock chunk does when called.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Steps(u64),
    Forever,
    /// Recurses this many levels, then spins forever.
    Nested(usize),
    Raise(String),
    OutOfMemory,
    Status(i32),
}

fn parse_body(source: &str) -> Result<Body, LoadError> {
    let mut words = source.trim().splitn(2, ' ');
    let op = words.next().unwrap_or_default();
    let arg = words.next().unwrap_or_default();
    match op {
        "steps" => arg
            .parse()
            .map(Body::Steps)
            .map_err(|_| LoadError::Syntax(format!("bad step count '{arg}'"))),
        "forever" => Ok(Body::Forever),
        "nested" => arg
            .parse()
            .map(Body::Nested)
            .map_err(|_| LoadError::Syntax(format!("bad depth '{arg}'"))),
        "raise" => Ok(Body::Raise(arg.to_string())),
        "oom" => Ok(Body::OutOfMemory),
        "status" => arg
            .parse()
            .map(Body::Status)
            .map_err(|_| LoadError::Syntax(format!("bad status '{arg}'"))),
        "huge" => Err(LoadError::Memory("chunk too large".to_string())),
        "weird" => Err(LoadError::Other {
            code: 7,
            message: "unsupported chunk".to_string(),
        }),
        other => Err(LoadError::Syntax(format!("unexpected '{other}'"))),
    }
}

type Trigger = (u64, Box<dyn Fn()>);

/// Engine double that "executes" instructions by counting them.
#[derive(Default)]
pub struct MockEngine {
    stack: RefCell<Vec<Body>>,
    registry: RefCell<Vec<Option<Body>>>,
    hook: RefCell<Option<(DebugHook, u32)>>,
    countdown: Cell<u32>,
    executed: Cell<u64>,
    trigger: RefCell<Option<Trigger>>,
}

impl MockEngine {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn executed(&self) -> u64 {
        self.executed.get()
    }

    pub fn live_refs(&self) -> usize {
        self.registry.borrow().iter().flatten().count()
    }

    pub fn has_hook(&self) -> bool {
        self.hook.borrow().is_some()
    }

    /// Runs `action` right before instruction number `at` executes.
    pub fn at_instruction(&self, at: u64, action: impl Fn() + 'static) {
        *self.trigger.borrow_mut() = Some((at, Box::new(action)));
    }

    pub fn register(&self, source: &str) -> RegistryKey {
        self.load(source.as_bytes(), "mock").expect("mock source");
        self.reference().expect("loaded chunk")
    }

    fn tick(&self, depth: usize) {
        let executed = self.executed.get() + 1;
        self.executed.set(executed);

        let trigger = {
            let mut slot = self.trigger.borrow_mut();
            if matches!(&*slot, Some((at, _)) if *at == executed) {
                slot.take()
            } else {
                None
            }
        };
        if let Some((_, action)) = trigger {
            action();
        }

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

    fn run(&self, body: &Body, depth: usize, handler: MessageHandler<'_>) -> Result<(), CallError> {
        match body {
            Body::Steps(count) => {
                for _ in 0..*count {
                    self.tick(depth);
                }
                Ok(())
            }
            Body::Forever => loop {
                self.tick(depth);
            },
            Body::Nested(0) => self.run(&Body::Forever, depth, handler),
            Body::Nested(levels) => {
                self.tick(depth);
                self.run(&Body::Nested(levels - 1), depth + 1, handler)
            }
            Body::Raise(message) => {
                self.tick(depth);
                let frames: Vec<FrameInfo> = (1..=depth)
                    .map(|level| FrameInfo {
                        chunk: "mock".to_string(),
                        function: if level == 1 {
                            String::new()
                        } else {
                            format!("level{level}")
                        },
                        line: level,
                    })
                    .collect();
                Err(CallError::Runtime {
                    message: handler(&ErrorContext {
                        message,
                        frames: &frames,
                    }),
                })
            }
            Body::OutOfMemory => Err(CallError::Memory),
            Body::Status(code) => Err(CallError::Other { code: *code }),
        }
    }
}

impl ScriptEngine for MockEngine {
    fn load(&self, source: &[u8], _chunk_name: &str) -> Result<(), LoadError> {
        let text = std::str::from_utf8(source)
            .map_err(|err| LoadError::Syntax(err.to_string()))?;
        let body = parse_body(text)?;
        self.stack.borrow_mut().push(body);
        Ok(())
    }

    fn reference(&self) -> Option<RegistryKey> {
        let body = self.stack.borrow_mut().pop()?;
        let mut registry = self.registry.borrow_mut();
        registry.push(Some(body));
        Some(RegistryKey::new(registry.len() - 1))
    }

    fn unreference(&self, key: RegistryKey) {
        if let Some(slot) = self.registry.borrow_mut().get_mut(key.index()) {
            *slot = None;
        }
    }

    fn call_protected(
        &self,
        key: RegistryKey,
        handler: MessageHandler<'_>,
    ) -> Result<(), CallError> {
        let body = self.registry.borrow().get(key.index()).cloned().flatten();
        let Some(body) = body else {
            return Err(CallError::Other { code: -1 });
        };
        // The callee sits on the stack for the duration of the call.
        self.stack.borrow_mut().push(body.clone());
        let result = self.run(&body, 1, handler);
        self.stack.borrow_mut().pop();
        result
    }

    fn set_hook(&self, hook: DebugHook, every: u32) {
        self.countdown.set(every);
        *self.hook.borrow_mut() = Some((hook, every));
    }

    fn clear_hook(&self) {
        *self.hook.borrow_mut() = None;
    }

    fn top(&self) -> usize {
        self.stack.borrow().len()
    }

    fn set_top(&self, top: usize) {
        self.stack.borrow_mut().truncate(top);
    }
}
