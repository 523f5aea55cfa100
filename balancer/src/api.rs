//! The load-balancer API surface: balancers, providers, pickers,
//! subchannels, and the helper through which balancers talk back to the
//! channel.

use std::any::Any;
use std::sync::Arc;

use chassis_core::{CallOptions, ConnectivityState, Status};

use crate::sync::SyncContext;
use crate::timer::TimerDriver;

/// A resolved backend address, kept opaque as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(pub String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }
}

/// Parsed, type-erased policy configuration produced by
/// [`LbProvider::parse_config`].
pub type PolicyConfig = Arc<dyn Any + Send + Sync>;

/// One name-resolution update delivered to a balancer.
#[derive(Clone)]
pub struct ResolvedAddresses {
    pub addresses: Vec<Address>,
    /// Parsed policy configuration, when the provider produced one.
    pub config: Option<PolicyConfig>,
}

/// Arguments for one pick.
#[derive(Clone, Default)]
pub struct PickArgs {
    pub options: CallOptions,
}

/// Outcome of one pick.
#[derive(Clone)]
pub enum PickResult {
    /// Use this subchannel.
    Subchannel(Arc<dyn Subchannel>),
    /// Buffer the call until a new picker is published.
    Queue,
    /// Fail the call with this status.
    Err(Status),
}

impl PickResult {
    /// The failure status, when the pick failed.
    pub fn error(&self) -> Option<&Status> {
        match self {
            PickResult::Err(status) => Some(status),
            _ => None,
        }
    }
}

/// A pure function from call metadata to a subchannel or a pick error.
///
/// Pickers are immutable snapshots; a balancer publishes a fresh picker
/// through [`Helper::update_balancing_state`] whenever its state changes.
pub trait Picker: Send + Sync {
    fn pick(&self, args: &PickArgs) -> PickResult;
}

/// Picker that buffers every pick until a real picker is published.
pub struct QueuePicker;

impl Picker for QueuePicker {
    fn pick(&self, _args: &PickArgs) -> PickResult {
        PickResult::Queue
    }
}

/// Picker that fails every pick with a fixed status.
pub struct ErrorPicker(pub Status);

impl Picker for ErrorPicker {
    fn pick(&self, _args: &PickArgs) -> PickResult {
        PickResult::Err(self.0.clone())
    }
}

/// Listener invoked on every connectivity-state transition of a subchannel.
/// The status is populated for `TransientFailure` transitions.
pub type StateListener = Box<dyn FnMut(ConnectivityState, Option<Status>) + Send>;

/// A transport-level connection (or connection attempt) to a fixed set of
/// addresses.
pub trait Subchannel: Send + Sync {
    /// The addresses this subchannel connects over.
    fn addresses(&self) -> Vec<Address>;
    /// Ask the transport to establish a connection if there is none.
    fn request_connection(&self);
    /// Tear the connection down; terminal.
    fn shutdown(&self);
}

/// The channel-provided surface a balancer drives: subchannel creation,
/// picker publication, and access to the serialized runtime.
pub trait Helper: Send + Sync {
    /// Create a subchannel for `addresses`; `listener` observes its state
    /// transitions on the synchronization context.
    fn create_subchannel(
        &self,
        addresses: Vec<Address>,
        listener: StateListener,
    ) -> Arc<dyn Subchannel>;

    /// Publish a new balancing state and the picker snapshot that goes with
    /// it.
    fn update_balancing_state(&self, state: ConnectivityState, picker: Arc<dyn Picker>);

    /// The serialized context all balancer callbacks run on.
    fn sync_context(&self) -> Arc<SyncContext>;

    /// The timer driver backing scheduled work.
    fn timer_driver(&self) -> Arc<dyn TimerDriver>;
}

/// A load-balancing policy instance.
///
/// All methods are invoked on the synchronization context.
pub trait LoadBalancer: Send {
    /// Accept a name-resolution update (addresses plus parsed policy
    /// config).
    fn accept_resolved_addresses(&mut self, update: ResolvedAddresses) -> Result<(), Status>;

    /// The resolver failed; react by publishing an error picker or
    /// propagating to children.
    fn handle_name_resolution_error(&mut self, error: Status);

    /// Ask the policy to establish connectivity if it is idle. Policies
    /// that connect lazily may ignore this.
    fn request_connection(&mut self) {}

    /// Release all resources; terminal.
    fn shutdown(&mut self);
}

/// Factory and config parser for one named policy.
pub trait LbProvider: Send + Sync {
    /// The policy name used in balancer config payloads.
    fn name(&self) -> &'static str;

    /// Whether this provider can be used in this process.
    fn is_available(&self) -> bool {
        true
    }

    /// Selection priority among providers registered under the same name;
    /// higher wins.
    fn priority(&self) -> u8;

    /// Parse a raw JSON policy config into this policy's typed config.
    fn parse_config(&self, raw: &serde_json::Value) -> Result<PolicyConfig, crate::ConfigError>;

    /// Build a new balancer instance driving `helper`.
    fn new_balancer(&self, helper: Arc<dyn Helper>) -> Box<dyn LoadBalancer>;
}
