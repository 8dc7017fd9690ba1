use crate::queue::{QueueInner, TaskQueue};
use crate::task::TaskId;
use slotmap::SecondaryMap;

thread_local! {
    static DEFAULT_LOOP: TaskQueue = TaskQueue::new_default();
}

/// Why [`TaskQueue::run_once`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The queue is empty.
    Drained,
    /// [`TaskQueue::request_stop`] was called.
    Stopped,
}

/// Marks a task as executing for the duration of one step. Cleared on drop so
/// the marker is reset even when a step unwinds.
struct CurrentGuard<'a> {
    inner: &'a QueueInner,
}

impl<'a> CurrentGuard<'a> {
    fn enter(inner: &'a QueueInner, id: TaskId) -> Self {
        inner.current.set(Some(id));
        Self { inner }
    }
}

impl Drop for CurrentGuard<'_> {
    fn drop(&mut self) {
        self.inner.current.set(None);
    }
}

impl TaskQueue {
    /// The thread's default queue, built lazily with the default
    /// configuration, the monotonic clock and the tracing observer.
    pub fn default_loop() -> TaskQueue {
        DEFAULT_LOOP.with(TaskQueue::clone)
    }

    /// Walks the queue once, stepping each live task. Returns the number of
    /// steps performed.
    ///
    /// Tasks appended behind the cursor during the walk are stepped in the
    /// same pass; tasks that finish are unlinked right after their step.
    pub fn run_pass(&self) -> usize {
        if let Some(current) = self.current() {
            tracing::warn!(?current, "run_pass called from inside a step; ignoring");
            return 0;
        }

        let mut stepped = 0;
        let mut completed = 0;
        let mut visited = SecondaryMap::new();
        let mut cursor = self.first();

        while let Some(id) = cursor {
            let Some(task) = self.get(id) else {
                break;
            };
            visited.insert(id, ());

            let verdict = {
                let _current = CurrentGuard::enter(&self.inner, id);
                task.step(self, id)
            };
            stepped += 1;

            cursor = if self.contains(id) {
                self.next_after(id)
            } else {
                // Unlinked during its own step, possibly with its neighbours.
                self.first_unvisited(&visited)
            };

            if verdict.is_done() && self.remove(id).is_ok() {
                completed += 1;
            }
        }

        self.update_stats(|stats| {
            stats.passes += 1;
            stats.steps += stepped as u64;
            stats.completed += completed;
        });
        tracing::trace!(stepped, completed, remaining = self.count(), "pass finished");
        stepped
    }

    /// Runs passes until the queue is empty or a stop is requested.
    pub fn run_once(&self) -> RunOutcome {
        if let Some(current) = self.current() {
            tracing::warn!(?current, "run_once called from inside a step; ignoring");
            return RunOutcome::Stopped;
        }
        while !self.is_empty() {
            if self.inner.stop.replace(false) {
                tracing::debug!("scheduler stopped on request");
                return RunOutcome::Stopped;
            }
            self.run_pass();
        }
        // A stop requested during the last pass, or before an empty run, is
        // consumed here rather than carried into the next drain.
        if self.inner.stop.replace(false) {
            tracing::debug!("scheduler stopped on request");
            return RunOutcome::Stopped;
        }
        RunOutcome::Drained
    }

    /// Drains the queue over and over, waiting for new tasks in between,
    /// until [`request_stop`](Self::request_stop) is called.
    pub fn run_forever(&self) {
        tracing::debug!("scheduler loop started");
        loop {
            if self.run_once() == RunOutcome::Stopped {
                break;
            }
            std::hint::spin_loop();
        }
        tracing::debug!("scheduler loop exited");
    }

    /// Asks the loop to return before its next pass.
    pub fn request_stop(&self) {
        self.inner.stop.set(true);
    }
}
