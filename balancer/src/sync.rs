//! The synchronization context: a serialized task queue with re-entrant
//! scheduling and cancellable timers.
//!
//! Tasks submitted with [`SyncContext::execute`] run in submission order,
//! never concurrently, on whichever thread wins the drain. A task may submit
//! further tasks (they run after it returns) and may schedule timers; timer
//! tasks re-enter the context when they fire.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::timer::TimerDriver;

type Task = Box<dyn FnOnce() + Send>;

/// Serialized executor for balancer callbacks and timers.
#[derive(Default)]
pub struct SyncContext {
    queue: Mutex<VecDeque<Task>>,
    draining: AtomicBool,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `task` and drain the queue. If another thread is already
    /// draining, the task will run on that thread instead.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) {
        self.execute_later(task);
        self.drain();
    }

    /// Enqueue `task` without draining. Useful from within a running task
    /// to defer work until after the current task returns.
    pub fn execute_later(&self, task: impl FnOnce() + Send + 'static) {
        self.queue.lock().push_back(Box::new(task));
    }

    /// Run queued tasks until the queue is empty, unless another thread
    /// already holds the drain.
    pub fn drain(&self) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                return;
            }
            loop {
                let task = self.queue.lock().pop_front();
                match task {
                    Some(task) => task(),
                    None => break,
                }
            }
            self.draining.store(false, Ordering::Release);
            // A task enqueued between the final pop and the flag release
            // would otherwise be stranded.
            if self.queue.lock().is_empty() {
                return;
            }
        }
    }

    /// Schedule `task` to run on this context after `delay`, using `driver`
    /// for the wait. The returned handle cancels the task any time before
    /// it starts.
    pub fn schedule(
        self: &Arc<Self>,
        delay: Duration,
        driver: &dyn TimerDriver,
        task: impl FnOnce() + Send + 'static,
    ) -> ScheduledHandle {
        let state = Arc::new(HandleState {
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        });
        let ctx = Arc::clone(self);
        let task_state = Arc::clone(&state);
        driver.schedule(
            delay,
            Box::new(move || {
                ctx.execute(move || {
                    if task_state.cancelled.load(Ordering::Acquire) {
                        return;
                    }
                    task_state.finished.store(true, Ordering::Release);
                    task();
                });
            }),
        );
        ScheduledHandle { state }
    }
}

struct HandleState {
    cancelled: AtomicBool,
    finished: AtomicBool,
}

/// Handle to a task scheduled via [`SyncContext::schedule`].
pub struct ScheduledHandle {
    state: Arc<HandleState>,
}

impl ScheduledHandle {
    /// Prevent the task from running. Effective until the task starts;
    /// harmless afterwards.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    /// Whether the task has neither run nor been cancelled.
    pub fn is_pending(&self) -> bool {
        !self.state.finished.load(Ordering::Acquire)
            && !self.state.cancelled.load(Ordering::Acquire)
    }
}
