//! Timer drivers backing scheduled balancer work.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A deferred unit of work handed to a [`TimerDriver`].
pub type TimerTask = Box<dyn FnOnce() + Send>;

/// Runs tasks after a delay, on an unspecified thread.
///
/// Production code uses [`ThreadTimer`]; tests use the manually advanced
/// driver from [`crate::testing`]. Cancellation is layered on top by
/// [`crate::SyncContext::schedule`], so drivers only ever fire.
pub trait TimerDriver: Send + Sync {
    fn schedule(&self, delay: Duration, task: TimerTask);
}

struct Entry {
    deadline: Instant,
    seq: u64,
    task: TimerTask,
}

// Min-heap on (deadline, seq) via reversed comparisons.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct TimerState {
    entries: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

/// Timer driver backed by a dedicated thread draining a deadline heap.
pub struct ThreadTimer {
    shared: Arc<TimerShared>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadTimer {
    pub fn new() -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState::default()),
            wakeup: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("chassis-timer".into())
            .spawn(move || run_timer(worker_shared))
            .expect("failed to spawn timer thread");
        Self {
            shared,
            worker: Some(worker),
        }
    }
}

impl Default for ThreadTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerDriver for ThreadTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) {
        let mut state = self.shared.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(Entry {
            deadline: Instant::now() + delay,
            seq,
            task,
        });
        self.shared.wakeup.notify_one();
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.wakeup_and_join();
    }
}

impl ThreadTimer {
    fn wakeup_and_join(&mut self) {
        self.shared.wakeup.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_timer(shared: Arc<TimerShared>) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            // Pending tasks are dropped unrun.
            return;
        }
        let now = Instant::now();
        let next_deadline = state.entries.peek().map(|entry| entry.deadline);
        match next_deadline {
            None => {
                shared.wakeup.wait(&mut state);
            }
            Some(deadline) if deadline <= now => {
                if let Some(entry) = state.entries.pop() {
                    drop(state);
                    (entry.task)();
                    state = shared.state.lock();
                }
            }
            Some(deadline) => {
                let _ = shared.wakeup.wait_for(&mut state, deadline - now);
            }
        }
    }
}
