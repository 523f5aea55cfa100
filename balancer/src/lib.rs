//! Load-balancing runtime for the chassis gRPC core.
//!
//! The centerpiece is the cluster-manager balancer: a top-level policy that
//! multiplexes calls over a dynamic set of child balancers addressed by
//! cluster name. Children removed from an update are not destroyed
//! immediately; they are deactivated and deleted only after an idle timeout,
//! so a cluster that is removed and re-advertised (machines rebooting,
//! capacity being reshuffled) is reactivated instead of rebuilt.
//!
//! All balancer callbacks, timer firings and picker updates run on a
//! [`SyncContext`], a serialized executor; pickers themselves are immutable
//! snapshots safe to share across pick threads.

mod api;
mod cluster;
mod config;
mod dispatch;
mod pick_first;
mod registry;
mod sync;
mod timer;

pub mod testing;

pub use api::{
    Address, ErrorPicker, Helper, LbProvider, LoadBalancer, PickArgs, PickResult, Picker,
    PolicyConfig, QueuePicker, ResolvedAddresses, StateListener, Subchannel,
};
pub use cluster::{ClusterManagerBalancer, ClusterManagerProvider, DELAYED_CHILD_DELETION_TIME};
pub use config::{ChildPolicy, ClusterManagerConfig, ConfigError};
pub use dispatch::ClusterDispatchPicker;
pub use pick_first::{
    new_pick_first_enabled, PickFirstBalancer, PickFirstConfig, PickFirstProvider,
    PICK_FIRST_POLICY_NAME,
};
pub use registry::LbRegistry;
pub use sync::{ScheduledHandle, SyncContext};
pub use timer::{ThreadTimer, TimerDriver, TimerTask};
