mod common;

use common::{MockEngine, harness, harness_with};
use cotask_scheduler::{LoadError, SchedulerConfig, ScriptEngine, StatusTag, Step};
use std::cell::Cell;
use std::rc::Rc;

#[test]
fn test_script_runs_once_and_releases_reference() {
    let h = harness();
    let engine = MockEngine::new();
    let key = engine.register("steps 25");

    h.queue.start_script(engine.clone(), key, true);
    h.queue.run_once();

    assert_eq!(engine.executed(), 25);
    assert_eq!(engine.live_refs(), 0);
    assert_eq!(engine.top(), 0);
    assert!(h.observer.messages().is_empty());
}

#[test]
fn test_script_keeps_reference_without_unref() {
    let h = harness();
    let engine = MockEngine::new();
    let key = engine.register("steps 1");

    h.queue.start_script(engine.clone(), key, false);
    h.queue.start_script(engine.clone(), key, false);
    h.queue.run_once();

    assert_eq!(engine.executed(), 2);
    assert_eq!(engine.live_refs(), 1);
}

#[test]
fn test_runtime_error_is_reported_with_traceback() {
    let h = harness();
    let engine = MockEngine::new();
    let key = engine.register("raise boom");
    h.queue.start_script(engine.clone(), key, true);

    let survivor = Rc::new(Cell::new(0));
    {
        let survivor = survivor.clone();
        h.queue.start_idle(move |_| {
            survivor.set(survivor.get() + 1);
            Step::Done
        });
    }
    h.queue.run_once();

    let notices = h.observer.tagged(StatusTag::Notice);
    assert_eq!(notices.len(), 1);
    assert!(notices[0].starts_with("ERROR: Thrown from code: boom\nstack traceback:"));
    assert!(notices[0].contains("mock:1: in main chunk"));
    assert_eq!(survivor.get(), 1);
    assert_eq!(engine.live_refs(), 0);
}

#[test]
fn test_memory_and_unknown_statuses_are_reported() {
    let h = harness();
    let engine = MockEngine::new();
    let oom = engine.register("oom");
    let odd = engine.register("status 9");
    h.queue.start_script(engine.clone(), oom, true);
    h.queue.start_script(engine.clone(), odd, true);

    h.queue.run_once();

    assert_eq!(
        h.observer.tagged(StatusTag::Notice),
        vec![
            "ERROR: Not enough memory to execute code.".to_string(),
            "ERROR: Could not run code: 9".to_string(),
        ]
    );
    assert_eq!(engine.live_refs(), 0);
}

#[test]
fn test_unbounded_script_cancelled_mid_execution() {
    let h = harness();
    let engine = MockEngine::new();
    let key = engine.register("nested 20");
    let quiescent = Rc::new(Cell::new(0));

    {
        let weak = h.queue.downgrade();
        let quiescent = quiescent.clone();
        engine.at_instruction(50, move || {
            let Some(queue) = weak.upgrade() else {
                return;
            };
            let quiescent = quiescent.clone();
            queue.interrupt_all(move |_| quiescent.set(quiescent.get() + 1));
        });
    }

    let id = h.queue.start_script(engine.clone(), key, true);
    h.queue.run_once();

    // With an interval of one the hook fires on the instruction that armed it.
    assert_eq!(engine.executed(), 50);
    assert!(!h.queue.contains(id));
    assert_eq!(quiescent.get(), 1);
    assert_eq!(engine.live_refs(), 0);
    assert_eq!(engine.top(), 0);
    assert!(!engine.has_hook());
    assert!(h.observer.messages().is_empty());
}

#[test]
fn test_cancellation_respects_hook_interval() {
    let h = harness_with(SchedulerConfig {
        hook_interval: 100,
        ..SchedulerConfig::default()
    });
    let engine = MockEngine::new();
    let key = engine.register("forever");

    {
        let weak = h.queue.downgrade();
        engine.at_instruction(10, move || {
            if let Some(queue) = weak.upgrade() {
                queue.interrupt_all(|_| {});
            }
        });
    }

    h.queue.start_script(engine.clone(), key, true);
    h.queue.run_once();

    assert_eq!(engine.executed(), 109);
}

#[test]
fn test_script_interrupted_before_its_turn() {
    let h = harness();
    let engine = MockEngine::new();
    let key = engine.register("forever");

    let script = h.queue.start_script(engine.clone(), key, true);
    h.queue.interrupt(script).unwrap();
    h.queue.run_once();

    assert_eq!(engine.executed(), 1);
    assert_eq!(engine.live_refs(), 0);
    assert!(h.queue.is_empty());
}

#[test]
fn test_two_scripts_on_one_engine_both_cancel() {
    let h = harness();
    let engine = MockEngine::new();
    let first = engine.register("forever");
    let second = engine.register("forever");
    let quiescent = Rc::new(Cell::new(0));

    h.queue.start_script(engine.clone(), first, true);
    h.queue.start_script(engine.clone(), second, true);
    {
        let quiescent = quiescent.clone();
        h.queue.interrupt_all(move |_| quiescent.set(quiescent.get() + 1));
    }
    h.queue.run_once();

    assert_eq!(engine.executed(), 2);
    assert_eq!(quiescent.get(), 1);
    assert_eq!(engine.live_refs(), 0);
}

#[test]
fn test_hook_ignores_unarmed_scripts() {
    let h = harness();
    let engine = MockEngine::new();
    let spinner = engine.register("forever");
    let finite = engine.register("steps 30");

    // The hook is installed while the finite script is not the armed one.
    let armed = h.queue.start_script(engine.clone(), spinner, true);
    h.queue.interrupt(armed).unwrap();
    h.queue.remove(armed).unwrap();
    h.queue.start_script(engine.clone(), finite, true);

    h.queue.run_once();
    assert_eq!(engine.executed(), 30);
}

#[test]
fn test_parse_and_start_schedules_script() {
    let h = harness();
    let engine = MockEngine::new();

    let id = h.queue.parse_and_start(engine.clone(), b"steps 3".to_vec()).unwrap();
    assert!(h.queue.contains(id));
    assert_eq!(engine.live_refs(), 1);
    assert_eq!(
        h.observer.messages(),
        vec![
            (StatusTag::Notice, "Running script...".to_string()),
            (StatusTag::State, "1".to_string()),
        ]
    );

    h.queue.run_once();
    assert_eq!(engine.executed(), 3);
    assert_eq!(engine.live_refs(), 0);
}

struct CountedBuffer {
    bytes: Vec<u8>,
    drops: Rc<Cell<u32>>,
}

impl AsRef<[u8]> for CountedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for CountedBuffer {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[test]
fn test_syntax_error_schedules_nothing_and_frees_buffer_once() {
    let h = harness();
    let engine = MockEngine::new();
    let drops = Rc::new(Cell::new(0));

    let buffer = CountedBuffer {
        bytes: b"jump nowhere".to_vec(),
        drops: drops.clone(),
    };
    let err = h.queue.parse_and_start(engine.clone(), buffer).unwrap_err();

    assert!(matches!(err, LoadError::Syntax(_)));
    assert_eq!(drops.get(), 1);
    assert!(h.queue.is_empty());
    assert_eq!(engine.top(), 0);
    assert_eq!(
        h.observer.tagged(StatusTag::Notice),
        vec!["ERROR: Syntax error: unexpected 'jump'".to_string()]
    );
}

#[test]
fn test_load_failures_are_classified() {
    let h = harness();
    let engine = MockEngine::new();

    let memory = h.queue.parse_and_start(engine.clone(), "huge").unwrap_err();
    let other = h.queue.parse_and_start(engine.clone(), "weird").unwrap_err();

    assert_eq!(memory.code(), 4);
    assert_eq!(other.code(), 7);
    assert_eq!(
        h.observer.tagged(StatusTag::Notice),
        vec![
            "ERROR: Not enough memory to load code: chunk too large".to_string(),
            "ERROR: Could not load code (error #7): unsupported chunk".to_string(),
        ]
    );
    assert!(h.queue.is_empty());
}

#[test]
fn test_script_removed_before_running_releases_engine_state() {
    let h = harness();
    let engine = MockEngine::new();
    let key = engine.register("forever");

    let id = h.queue.start_script(engine.clone(), key, true);
    h.queue.interrupt(id).unwrap();
    assert!(engine.has_hook());

    h.queue.remove(id).unwrap();
    h.queue.run_once();

    assert_eq!(engine.executed(), 0);
    assert!(!engine.has_hook());
    assert_eq!(engine.live_refs(), 0);
}

#[test]
fn test_script_removed_before_running_keeps_borrowed_reference() {
    let h = harness();
    let engine = MockEngine::new();
    let key = engine.register("steps 3");

    let id = h.queue.start_script(engine.clone(), key, false);
    h.queue.remove(id).unwrap();

    assert!(!engine.has_hook());
    assert_eq!(engine.live_refs(), 1);

    h.queue.start_script(engine.clone(), key, true);
    h.queue.run_once();
    assert_eq!(engine.executed(), 3);
    assert_eq!(engine.live_refs(), 0);
}
