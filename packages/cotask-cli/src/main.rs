mod settings;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cotask_scheduler::{Observer, StatusTag, Step, TaskQueue, WeakQueue};
use cotask_vm::Vm;
use settings::{Overrides, Settings};
use std::path::PathBuf;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cotask")]
#[command(about = "Runs scripts on a cooperative task queue", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run script files until every task has finished
    Run {
        /// Script files, started in the order given
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[command(flatten)]
        overrides: Overrides,
        /// Interrupt every queued task once this many milliseconds have passed.
        /// Checked only between scripts: a script that loops without calling
        /// `host interrupt` is never cut short
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Print scheduler statistics as JSON when the queue drains
        #[arg(long)]
        stats: bool,
    },
    /// Compile script files without running them
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// Prints status messages as `<tag> <message>` lines.
struct ConsoleObserver;

impl Observer for ConsoleObserver {
    fn command(&self, tag: StatusTag, message: &str) {
        println!("{tag} {message}");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            files,
            overrides,
            timeout_ms,
            stats,
        } => run(&files, &overrides, timeout_ms, stats),
        Commands::Check { files } => check(&files),
    }
}

fn run(
    files: &[PathBuf],
    overrides: &Overrides,
    timeout_ms: Option<u64>,
    stats: bool,
) -> Result<()> {
    let settings = Settings::resolve(overrides)?;
    tracing::debug!(?settings, "starting");

    let queue = TaskQueue::builder()
        .config(settings.scheduler)
        .observer(Rc::new(ConsoleObserver))
        .build();
    let vm = Rc::new(Vm::new(settings.vm));
    register_hosts(&vm, queue.downgrade());

    let mut rejected = 0;
    for path in files {
        let source = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        if queue.parse_and_start(vm.clone(), source).is_err() {
            rejected += 1;
        }
    }
    if let Some(timeout) = timeout_ms {
        start_watchdog(&queue, timeout);
    }

    queue.run_once();
    if stats {
        println!("{}", serde_json::to_string_pretty(&queue.stats())?);
    }
    if rejected > 0 {
        anyhow::bail!("{rejected} of {} scripts failed to load", files.len());
    }
    Ok(())
}

/// Interrupts everything still queued once `timeout` has passed. A script
/// holds the loop for its whole call, so the check only runs between
/// scripts.
fn start_watchdog(queue: &TaskQueue, timeout: u64) {
    let deadline = queue.now_ms().saturating_add(timeout);
    queue.start_idle(move |queue| {
        if queue.count() == 1 {
            return Step::Done;
        }
        if queue.now_ms() < deadline {
            return Step::Continue;
        }
        tracing::warn!(timeout, "timeout reached");
        queue.interrupt_all(|queue| queue.notify(StatusTag::Notice, "Interrupted."));
        Step::Done
    });
}

fn register_hosts(vm: &Vm, queue: WeakQueue) {
    vm.register_host("print", |vm| {
        let value = vm.pop_int().ok_or("expected an integer")?;
        println!("{value}");
        Ok(())
    });

    let clock = queue.clone();
    vm.register_host("uptime", move |vm| {
        let queue = clock.upgrade().ok_or("queue is gone")?;
        let now = i64::try_from(queue.now_ms()).map_err(|err| err.to_string())?;
        vm.push_int(now)
    });

    vm.register_host("interrupt", move |_| {
        let queue = queue.upgrade().ok_or("queue is gone")?;
        queue.interrupt_all(|queue| queue.notify(StatusTag::Notice, "Interrupted."));
        Ok(())
    });
}

fn check(files: &[PathBuf]) -> Result<()> {
    let mut failed = 0;
    for path in files {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let chunk = path.display().to_string();
        match cotask_vm::compile(&text, &chunk) {
            Ok(program) => println!("ok {chunk} ({} functions)", program.functions.len() - 1),
            Err(err) => {
                failed += 1;
                println!("error {}", err.message());
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} files failed to compile", files.len());
    }
    Ok(())
}
