//! Test doubles for the balancer runtime: a manually advanced timer driver,
//! a recording helper with inert subchannels, and a trivially-ready child
//! policy for cluster-manager tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chassis_core::{ConnectivityState, Status};
use parking_lot::Mutex;

use crate::api::{
    Address, ErrorPicker, Helper, LbProvider, LoadBalancer, PickArgs, PickResult, Picker,
    PolicyConfig, ResolvedAddresses, StateListener, Subchannel,
};
use crate::config::ConfigError;
use crate::sync::SyncContext;
use crate::timer::{TimerDriver, TimerTask};

struct FakeEntry {
    deadline: Duration,
    seq: u64,
    task: TimerTask,
}

#[derive(Default)]
struct FakeTimerState {
    now: Duration,
    next_seq: u64,
    entries: Vec<FakeEntry>,
}

/// Manually advanced timer driver. Tasks fire on the thread calling
/// [`advance`](FakeTimer::advance), in deadline order.
#[derive(Default)]
pub struct FakeTimer {
    state: Mutex<FakeTimerState>,
}

impl FakeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the virtual clock by `delta`, firing every task whose
    /// deadline is reached.
    pub fn advance(&self, delta: Duration) {
        let target = self.state.lock().now + delta;
        loop {
            let task = {
                let mut state = self.state.lock();
                let due = state
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.deadline <= target)
                    .min_by_key(|(_, e)| (e.deadline, e.seq))
                    .map(|(i, _)| i);
                match due {
                    Some(index) => {
                        let entry = state.entries.remove(index);
                        state.now = state.now.max(entry.deadline);
                        Some(entry.task)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    /// Number of tasks not yet fired.
    pub fn pending(&self) -> usize {
        self.state.lock().entries.len()
    }
}

impl TimerDriver for FakeTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) {
        let mut state = self.state.lock();
        let deadline = state.now + delay;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(FakeEntry {
            deadline,
            seq,
            task,
        });
    }
}

/// Inert subchannel that records connection requests and lets tests drive
/// state transitions through the registered listener.
pub struct FakeSubchannel {
    addresses: Vec<Address>,
    listener: Mutex<StateListener>,
    connect_requests: AtomicUsize,
    shut_down: AtomicBool,
}

impl FakeSubchannel {
    fn new(addresses: Vec<Address>, listener: StateListener) -> Self {
        Self {
            addresses,
            listener: Mutex::new(listener),
            connect_requests: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Deliver a connectivity transition to the registered listener.
    pub fn transition(&self, state: ConnectivityState, status: Option<Status>) {
        (self.listener.lock())(state, status);
    }

    pub fn connect_requests(&self) -> usize {
        self.connect_requests.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Subchannel for FakeSubchannel {
    fn addresses(&self) -> Vec<Address> {
        self.addresses.clone()
    }

    fn request_connection(&self) {
        self.connect_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// Helper that records every published balancing state and hands out
/// [`FakeSubchannel`]s.
pub struct RecordingHelper {
    ctx: Arc<SyncContext>,
    timer: Arc<dyn TimerDriver>,
    published: Mutex<Vec<(ConnectivityState, Arc<dyn Picker>)>>,
    subchannels: Mutex<Vec<Arc<FakeSubchannel>>>,
}

impl RecordingHelper {
    pub fn new(ctx: Arc<SyncContext>, timer: Arc<dyn TimerDriver>) -> Self {
        Self {
            ctx,
            timer,
            published: Mutex::new(Vec::new()),
            subchannels: Mutex::new(Vec::new()),
        }
    }

    /// Most recently published connectivity state.
    pub fn latest_state(&self) -> Option<ConnectivityState> {
        self.published.lock().last().map(|(state, _)| *state)
    }

    /// Most recently published picker snapshot.
    pub fn latest_picker(&self) -> Option<Arc<dyn Picker>> {
        self.published.lock().last().map(|(_, picker)| Arc::clone(picker))
    }

    /// Total number of publishes observed.
    pub fn publish_count(&self) -> usize {
        self.published.lock().len()
    }

    /// All subchannels created through this helper, in creation order.
    pub fn subchannels(&self) -> Vec<Arc<FakeSubchannel>> {
        self.subchannels.lock().clone()
    }

    /// The subchannel whose address list contains `addr`.
    pub fn subchannel_for(&self, addr: &str) -> Option<Arc<FakeSubchannel>> {
        self.subchannels
            .lock()
            .iter()
            .find(|s| s.addresses.iter().any(|a| a.0 == addr))
            .cloned()
    }
}

impl Helper for RecordingHelper {
    fn create_subchannel(
        &self,
        addresses: Vec<Address>,
        listener: StateListener,
    ) -> Arc<dyn Subchannel> {
        let subchannel = Arc::new(FakeSubchannel::new(addresses, listener));
        self.subchannels.lock().push(Arc::clone(&subchannel));
        subchannel
    }

    fn update_balancing_state(&self, state: ConnectivityState, picker: Arc<dyn Picker>) {
        self.published.lock().push((state, picker));
    }

    fn sync_context(&self) -> Arc<SyncContext> {
        Arc::clone(&self.ctx)
    }

    fn timer_driver(&self) -> Arc<dyn TimerDriver> {
        Arc::clone(&self.timer)
    }
}

/// Child policy that connects one subchannel and reports READY immediately.
/// Keeps cluster-manager tests independent of real policy behavior.
pub struct InstantReadyProvider;

/// Policy name [`InstantReadyProvider`] registers under.
pub const INSTANT_READY_POLICY_NAME: &str = "instant_ready";

impl LbProvider for InstantReadyProvider {
    fn name(&self) -> &'static str {
        INSTANT_READY_POLICY_NAME
    }

    fn priority(&self) -> u8 {
        5
    }

    fn parse_config(&self, _raw: &serde_json::Value) -> Result<PolicyConfig, ConfigError> {
        Ok(Arc::new(()))
    }

    fn new_balancer(&self, helper: Arc<dyn Helper>) -> Box<dyn LoadBalancer> {
        Box::new(InstantReadyBalancer {
            helper,
            subchannel: None,
        })
    }
}

struct StaticPicker(Arc<dyn Subchannel>);

impl Picker for StaticPicker {
    fn pick(&self, _args: &PickArgs) -> PickResult {
        PickResult::Subchannel(Arc::clone(&self.0))
    }
}

struct InstantReadyBalancer {
    helper: Arc<dyn Helper>,
    subchannel: Option<Arc<dyn Subchannel>>,
}

impl LoadBalancer for InstantReadyBalancer {
    fn accept_resolved_addresses(&mut self, update: ResolvedAddresses) -> Result<(), Status> {
        if let Some(old) = self.subchannel.take() {
            old.shutdown();
        }
        let subchannel = self
            .helper
            .create_subchannel(update.addresses, Box::new(|_, _| {}));
        self.subchannel = Some(Arc::clone(&subchannel));
        self.helper.update_balancing_state(
            ConnectivityState::Ready,
            Arc::new(StaticPicker(subchannel)),
        );
        Ok(())
    }

    fn handle_name_resolution_error(&mut self, error: Status) {
        self.helper.update_balancing_state(
            ConnectivityState::TransientFailure,
            Arc::new(ErrorPicker(error)),
        );
    }

    fn shutdown(&mut self) {
        if let Some(subchannel) = self.subchannel.take() {
            subchannel.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_timer_fires_in_deadline_order() {
        let timer = FakeTimer::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let later = order.clone();
        timer.schedule(
            Duration::from_secs(20),
            Box::new(move || later.lock().push("later")),
        );
        let sooner = order.clone();
        timer.schedule(
            Duration::from_secs(5),
            Box::new(move || sooner.lock().push("sooner")),
        );
        assert_eq!(timer.pending(), 2);

        timer.advance(Duration::from_secs(4));
        assert!(order.lock().is_empty());

        timer.advance(Duration::from_secs(30));
        assert_eq!(*order.lock(), vec!["sooner", "later"]);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn fake_timer_task_can_schedule_more_work() {
        let timer = Arc::new(FakeTimer::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let inner_timer = Arc::clone(&timer);
        let inner_fired = Arc::clone(&fired);
        timer.schedule(
            Duration::from_secs(1),
            Box::new(move || {
                let fired = Arc::clone(&inner_fired);
                inner_timer.schedule(
                    Duration::from_secs(1),
                    Box::new(move || {
                        fired.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }),
        );

        timer.advance(Duration::from_secs(2));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
