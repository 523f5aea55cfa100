//! The cluster-manager load balancer.
//!
//! Top-level policy that fans picks out to child balancers keyed by cluster
//! name. Children removed by an update are not shut down immediately: they
//! are deactivated and a deletion timer is started, so a cluster that is
//! removed and then re-advertised (machines rebooting, capacity being
//! reshuffled) is reactivated in place instead of rebuilt from scratch.
//!
//! Children that go idle are not reconnected automatically; a fresh pick
//! drives reconnection lazily.

use std::collections::BTreeMap;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chassis_core::{ConnectivityState, Status};
use parking_lot::Mutex;

use crate::api::{
    Address, ErrorPicker, Helper, LbProvider, LoadBalancer, Picker, PolicyConfig, QueuePicker,
    ResolvedAddresses, StateListener, Subchannel,
};
use crate::config::{ClusterManagerConfig, ConfigError};
use crate::dispatch::ClusterDispatchPicker;
use crate::registry::LbRegistry;
use crate::sync::{ScheduledHandle, SyncContext};
use crate::timer::TimerDriver;

/// How long a deactivated child is kept before deletion. Long enough for a
/// reboot and service restart, short enough that stale children do not pile
/// up.
pub const DELAYED_CHILD_DELETION_TIME: Duration = Duration::from_secs(15 * 60);

/// Provider for the cluster-manager policy. Child policies are resolved
/// against the registry handed in at construction.
pub struct ClusterManagerProvider {
    registry: Arc<LbRegistry>,
}

impl ClusterManagerProvider {
    pub fn new(registry: Arc<LbRegistry>) -> Self {
        Self { registry }
    }
}

impl LbProvider for ClusterManagerProvider {
    fn name(&self) -> &'static str {
        "cluster_manager"
    }

    fn priority(&self) -> u8 {
        5
    }

    fn parse_config(&self, raw: &serde_json::Value) -> Result<PolicyConfig, ConfigError> {
        ClusterManagerConfig::parse(raw, &self.registry)
            .map(|config| Arc::new(config) as PolicyConfig)
    }

    fn new_balancer(&self, helper: Arc<dyn Helper>) -> Box<dyn LoadBalancer> {
        Box::new(ClusterManagerBalancer::new(helper))
    }
}

type SharedBalancer = Arc<Mutex<Box<dyn LoadBalancer>>>;

struct ChildState {
    provider: Arc<dyn LbProvider>,
    balancer: SharedBalancer,
    picker: Arc<dyn Picker>,
    state: ConnectivityState,
    deactivated: bool,
    deletion_timer: Option<ScheduledHandle>,
}

struct Shared {
    helper: Arc<dyn Helper>,
    ctx: Arc<SyncContext>,
    timer: Arc<dyn TimerDriver>,
    children: Mutex<BTreeMap<String, ChildState>>,
    /// Publishes are deferred while an address update is being applied so a
    /// single coherent snapshot goes out at the end.
    resolving: AtomicBool,
}

impl Shared {
    /// Recompute the aggregate state and publish a fresh dispatch snapshot
    /// of the non-deactivated children.
    fn update_overall_state(self: &Arc<Self>) {
        if self.resolving.load(Ordering::Acquire) {
            return;
        }
        let (aggregate, snapshot) = {
            let children = self.children.lock();
            let mut snapshot: BTreeMap<String, Arc<dyn Picker>> = BTreeMap::new();
            let mut states = Vec::new();
            for (name, child) in children.iter().filter(|(_, c)| !c.deactivated) {
                snapshot.insert(name.clone(), Arc::clone(&child.picker));
                states.push(child.state);
            }
            (aggregate_state(&states), snapshot)
        };
        self.helper
            .update_balancing_state(aggregate, Arc::new(ClusterDispatchPicker::new(snapshot)));
    }

    /// Deletion-timer body. A timer that lost the race with reactivation or
    /// shutdown finds its child gone or active again and does nothing.
    fn delete_child(self: &Arc<Self>, key: &str) {
        let removed = {
            let mut children = self.children.lock();
            let due = matches!(children.get(key), Some(child) if child.deactivated);
            if due {
                children.remove(key)
            } else {
                None
            }
        };
        if let Some(child) = removed {
            child.balancer.lock().shutdown();
            tracing::debug!(child = %key, "child balancer deleted");
        }
    }
}

fn aggregate_state(states: &[ConnectivityState]) -> ConnectivityState {
    if states.contains(&ConnectivityState::Ready) {
        ConnectivityState::Ready
    } else if states.contains(&ConnectivityState::Connecting) {
        ConnectivityState::Connecting
    } else if states.contains(&ConnectivityState::Idle) {
        ConnectivityState::Idle
    } else {
        ConnectivityState::TransientFailure
    }
}

/// Per-child helper: forwards subchannel creation to the channel and records
/// the child's picker updates into the registry entry it is keyed under.
/// Holds only a weak reference back, so a child outliving the manager is
/// inert rather than a cycle.
struct ChildHelper {
    key: String,
    shared: Weak<Shared>,
    parent: Arc<dyn Helper>,
    ctx: Arc<SyncContext>,
    timer: Arc<dyn TimerDriver>,
}

impl Helper for ChildHelper {
    fn create_subchannel(
        &self,
        addresses: Vec<Address>,
        listener: StateListener,
    ) -> Arc<dyn Subchannel> {
        self.parent.create_subchannel(addresses, listener)
    }

    fn update_balancing_state(&self, state: ConnectivityState, picker: Arc<dyn Picker>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        {
            let mut children = shared.children.lock();
            let Some(child) = children.get_mut(&self.key) else {
                return;
            };
            child.state = state;
            child.picker = picker;
        }
        shared.update_overall_state();
    }

    fn sync_context(&self) -> Arc<SyncContext> {
        Arc::clone(&self.ctx)
    }

    fn timer_driver(&self) -> Arc<dyn TimerDriver> {
        Arc::clone(&self.timer)
    }
}

/// The cluster-manager balancer. See the module docs for the child
/// lifecycle.
pub struct ClusterManagerBalancer {
    shared: Arc<Shared>,
}

impl ClusterManagerBalancer {
    pub fn new(helper: Arc<dyn Helper>) -> Self {
        let shared = Arc::new(Shared {
            ctx: helper.sync_context(),
            timer: helper.timer_driver(),
            helper,
            children: Mutex::new(BTreeMap::new()),
            resolving: AtomicBool::new(false),
        });
        tracing::debug!("cluster_manager balancer created");
        Self { shared }
    }

    fn child_helper(&self, key: &str) -> Arc<dyn Helper> {
        Arc::new(ChildHelper {
            key: key.to_string(),
            shared: Arc::downgrade(&self.shared),
            parent: Arc::clone(&self.shared.helper),
            ctx: Arc::clone(&self.shared.ctx),
            timer: Arc::clone(&self.shared.timer),
        })
    }

    /// Mark a child deactivated and start its deletion timer.
    fn deactivate_child(&self, key: &str) {
        let weak = Arc::downgrade(&self.shared);
        let timer_key = key.to_string();
        let handle = self.shared.ctx.schedule(
            DELAYED_CHILD_DELETION_TIME,
            &*self.shared.timer,
            move || {
                if let Some(shared) = weak.upgrade() {
                    shared.delete_child(&timer_key);
                }
            },
        );
        let mut children = self.shared.children.lock();
        match children.get_mut(key) {
            Some(child) => {
                child.deletion_timer = Some(handle);
                child.deactivated = true;
                tracing::debug!(child = %key, "child balancer deactivated");
            }
            None => handle.cancel(),
        }
    }
}

impl LoadBalancer for ClusterManagerBalancer {
    fn accept_resolved_addresses(&mut self, update: ResolvedAddresses) -> Result<(), Status> {
        let config = update
            .config
            .as_ref()
            .and_then(|c| Arc::clone(c).downcast::<ClusterManagerConfig>().ok())
            .ok_or_else(|| Status::unavailable("missing cluster_manager configuration"))?;
        let cluster_names: Vec<&String> = config.children.keys().collect();
        tracing::debug!(children = ?cluster_names, "received cluster_manager config");

        self.shared.resolving.store(true, Ordering::Release);
        let mut forward: Vec<(SharedBalancer, ResolvedAddresses)> = Vec::new();
        let mut retired: Vec<SharedBalancer> = Vec::new();

        for (name, policy) in &config.children {
            let child_update = ResolvedAddresses {
                addresses: update.addresses.clone(),
                config: policy.config.clone(),
            };
            let existing = {
                let children = self.shared.children.lock();
                children.get(name).map(|c| c.provider.name())
            };
            match existing {
                None => {
                    let balancer = Arc::new(Mutex::new(
                        policy.provider.new_balancer(self.child_helper(name)),
                    ));
                    self.shared.children.lock().insert(
                        name.clone(),
                        ChildState {
                            provider: Arc::clone(&policy.provider),
                            balancer: Arc::clone(&balancer),
                            picker: Arc::new(QueuePicker),
                            state: ConnectivityState::Connecting,
                            deactivated: false,
                            deletion_timer: None,
                        },
                    );
                    tracing::debug!(child = %name, policy = policy.provider.name(), "child balancer created");
                    forward.push((balancer, child_update));
                }
                Some(current_policy) => {
                    // A policy swap rebuilds the child balancer in place.
                    let replacement = if current_policy != policy.provider.name() {
                        Some(Arc::new(Mutex::new(
                            policy.provider.new_balancer(self.child_helper(name)),
                        )))
                    } else {
                        None
                    };
                    let mut children = self.shared.children.lock();
                    let Some(child) = children.get_mut(name) else {
                        continue;
                    };
                    if child.deactivated {
                        if let Some(timer) = child.deletion_timer.take() {
                            timer.cancel();
                        }
                        child.deactivated = false;
                        tracing::debug!(child = %name, "child balancer reactivated");
                    }
                    match replacement {
                        Some(replacement) => {
                            retired.push(mem::replace(
                                &mut child.balancer,
                                Arc::clone(&replacement),
                            ));
                            child.provider = Arc::clone(&policy.provider);
                            child.picker = Arc::new(QueuePicker);
                            child.state = ConnectivityState::Connecting;
                            forward.push((replacement, child_update));
                        }
                        None => forward.push((Arc::clone(&child.balancer), child_update)),
                    }
                }
            }
        }

        // Children absent from the new mapping are deactivated, not
        // destroyed.
        let removed: Vec<String> = {
            let children = self.shared.children.lock();
            children
                .iter()
                .filter(|(name, child)| {
                    !config.children.contains_key(*name) && !child.deactivated
                })
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in removed {
            self.deactivate_child(&name);
        }

        for balancer in retired {
            balancer.lock().shutdown();
        }
        for (balancer, child_update) in forward {
            if let Err(status) = balancer.lock().accept_resolved_addresses(child_update) {
                tracing::warn!(%status, "child balancer rejected resolved addresses");
            }
        }

        self.shared.resolving.store(false, Ordering::Release);
        self.shared.update_overall_state();
        Ok(())
    }

    fn handle_name_resolution_error(&mut self, error: Status) {
        tracing::warn!(%error, "received name resolution error");
        let active: Vec<SharedBalancer> = {
            let children = self.shared.children.lock();
            children
                .values()
                .filter(|c| !c.deactivated)
                .map(|c| Arc::clone(&c.balancer))
                .collect()
        };
        if active.is_empty() {
            self.shared.helper.update_balancing_state(
                ConnectivityState::TransientFailure,
                Arc::new(ErrorPicker(error)),
            );
            return;
        }
        for balancer in active {
            balancer.lock().handle_name_resolution_error(error.clone());
        }
    }

    fn shutdown(&mut self) {
        let children = mem::take(&mut *self.shared.children.lock());
        for (name, child) in children {
            if let Some(timer) = child.deletion_timer {
                timer.cancel();
            }
            child.balancer.lock().shutdown();
            tracing::debug!(child = %name, "child balancer shut down");
        }
    }
}
