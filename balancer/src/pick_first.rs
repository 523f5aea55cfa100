//! The pick-first load-balancing policy: no balancing at all. Walks the
//! resolved address list and sticks to the first address that connects.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chassis_core::{ConnectivityState, Status};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::api::{
    ErrorPicker, Helper, LbProvider, LoadBalancer, PickArgs, PickResult, Picker, PolicyConfig,
    QueuePicker, ResolvedAddresses, StateListener, Subchannel,
};
use crate::config::ConfigError;

/// Policy name used in balancer config payloads.
pub const PICK_FIRST_POLICY_NAME: &str = "pick_first";

const NEW_PICK_FIRST_VAR: &str = "GRPC_EXPERIMENTAL_ENABLE_NEW_PICK_FIRST";

/// Whether the newer pick-first implementation is selected via the
/// `GRPC_EXPERIMENTAL_ENABLE_NEW_PICK_FIRST` environment variable.
/// Case-insensitive `true` enables it; empty or unset means `false`.
pub fn new_pick_first_enabled() -> bool {
    std::env::var(NEW_PICK_FIRST_VAR)
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Pick-first policy configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PickFirstConfig {
    /// Shuffle the resolved address list before connecting.
    pub shuffle_address_list: bool,
}

/// Provider for the pick-first policy.
pub struct PickFirstProvider;

impl LbProvider for PickFirstProvider {
    fn name(&self) -> &'static str {
        PICK_FIRST_POLICY_NAME
    }

    fn priority(&self) -> u8 {
        5
    }

    fn parse_config(&self, raw: &serde_json::Value) -> Result<PolicyConfig, ConfigError> {
        serde_json::from_value::<PickFirstConfig>(raw.clone())
            .map(|config| Arc::new(config) as PolicyConfig)
            .map_err(|err| ConfigError::InvalidPolicyConfig {
                policy: PICK_FIRST_POLICY_NAME,
                reason: err.to_string(),
            })
    }

    fn new_balancer(&self, helper: Arc<dyn Helper>) -> Box<dyn LoadBalancer> {
        Box::new(PickFirstBalancer::new(helper, new_pick_first_enabled()))
    }
}

struct PfShared {
    helper: Arc<dyn Helper>,
    subchannel: Mutex<Option<Arc<dyn Subchannel>>>,
    /// Listener registrations are keyed by generation so a replaced
    /// subchannel's late transitions are ignored.
    generation: AtomicU64,
    /// The newer variant stays in TRANSIENT_FAILURE through reconnect
    /// attempts instead of bouncing back to CONNECTING.
    sticky_transient_failure: bool,
    in_transient_failure: AtomicBool,
}

impl PfShared {
    fn on_state_change(
        &self,
        generation: u64,
        state: ConnectivityState,
        status: Option<Status>,
    ) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        let Some(subchannel) = self.subchannel.lock().clone() else {
            return;
        };
        match state {
            ConnectivityState::Ready => {
                self.in_transient_failure.store(false, Ordering::Release);
                self.helper.update_balancing_state(
                    ConnectivityState::Ready,
                    Arc::new(ReadyPicker(subchannel)),
                );
            }
            ConnectivityState::Idle => {
                self.helper.update_balancing_state(
                    ConnectivityState::Idle,
                    Arc::new(RequestConnectionPicker(subchannel)),
                );
            }
            ConnectivityState::Connecting => {
                if self.sticky_transient_failure
                    && self.in_transient_failure.load(Ordering::Acquire)
                {
                    return;
                }
                self.helper
                    .update_balancing_state(ConnectivityState::Connecting, Arc::new(QueuePicker));
            }
            ConnectivityState::TransientFailure => {
                self.in_transient_failure.store(true, Ordering::Release);
                let status =
                    status.unwrap_or_else(|| Status::unavailable("connection attempt failed"));
                self.helper.update_balancing_state(
                    ConnectivityState::TransientFailure,
                    Arc::new(ErrorPicker(status)),
                );
            }
            ConnectivityState::Shutdown => {}
        }
    }
}

/// Picker handing every pick the connected subchannel.
struct ReadyPicker(Arc<dyn Subchannel>);

impl Picker for ReadyPicker {
    fn pick(&self, _args: &PickArgs) -> PickResult {
        PickResult::Subchannel(Arc::clone(&self.0))
    }
}

/// Picker for an idle child: the pick itself drives reconnection, and the
/// call is buffered until a fresh picker is published.
struct RequestConnectionPicker(Arc<dyn Subchannel>);

impl Picker for RequestConnectionPicker {
    fn pick(&self, _args: &PickArgs) -> PickResult {
        self.0.request_connection();
        PickResult::Queue
    }
}

/// The pick-first balancer.
pub struct PickFirstBalancer {
    helper: Arc<dyn Helper>,
    shared: Arc<PfShared>,
}

impl PickFirstBalancer {
    pub fn new(helper: Arc<dyn Helper>, sticky_transient_failure: bool) -> Self {
        let shared = Arc::new(PfShared {
            helper: Arc::clone(&helper),
            subchannel: Mutex::new(None),
            generation: AtomicU64::new(0),
            sticky_transient_failure,
            in_transient_failure: AtomicBool::new(false),
        });
        Self { helper, shared }
    }
}

impl LoadBalancer for PickFirstBalancer {
    fn accept_resolved_addresses(&mut self, update: ResolvedAddresses) -> Result<(), Status> {
        if update.addresses.is_empty() {
            let status = Status::unavailable("name resolver returned an empty address list");
            self.helper.update_balancing_state(
                ConnectivityState::TransientFailure,
                Arc::new(ErrorPicker(status.clone())),
            );
            return Err(status);
        }
        let config = update
            .config
            .as_ref()
            .and_then(|c| Arc::clone(c).downcast::<PickFirstConfig>().ok())
            .map(|c| *c)
            .unwrap_or_default();

        let mut addresses = update.addresses;
        if config.shuffle_address_list {
            addresses.shuffle(&mut rand::rng());
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let old = self.shared.subchannel.lock().take();
        if let Some(old) = old {
            old.shutdown();
        }
        self.shared.in_transient_failure.store(false, Ordering::Release);

        let listener_shared = Arc::clone(&self.shared);
        let listener: StateListener = Box::new(move |state, status| {
            listener_shared.on_state_change(generation, state, status);
        });
        let subchannel = self.helper.create_subchannel(addresses, listener);
        *self.shared.subchannel.lock() = Some(Arc::clone(&subchannel));
        subchannel.request_connection();
        self.helper
            .update_balancing_state(ConnectivityState::Connecting, Arc::new(QueuePicker));
        Ok(())
    }

    fn handle_name_resolution_error(&mut self, error: Status) {
        self.helper.update_balancing_state(
            ConnectivityState::TransientFailure,
            Arc::new(ErrorPicker(error)),
        );
    }

    fn request_connection(&mut self) {
        if let Some(subchannel) = self.shared.subchannel.lock().as_ref() {
            subchannel.request_connection();
        }
    }

    fn shutdown(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(subchannel) = self.shared.subchannel.lock().take() {
            subchannel.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Address;
    use crate::testing::{FakeTimer, RecordingHelper};
    use crate::sync::SyncContext;
    use chassis_core::Code;
    use serde_json::json;

    fn helper() -> Arc<RecordingHelper> {
        Arc::new(RecordingHelper::new(
            Arc::new(SyncContext::new()),
            Arc::new(FakeTimer::new()),
        ))
    }

    fn addresses(addrs: &[&str]) -> Vec<Address> {
        addrs.iter().map(|a| Address::new(*a)).collect()
    }

    #[test]
    fn config_defaults_to_no_shuffle() {
        let config: PickFirstConfig = serde_json::from_value(json!({})).unwrap();
        assert!(!config.shuffle_address_list);
    }

    #[test]
    fn config_round_trips() {
        let config: PickFirstConfig =
            serde_json::from_value(json!({"shuffleAddressList": true})).unwrap();
        assert!(config.shuffle_address_list);
        assert_eq!(
            serde_json::to_value(config).unwrap(),
            json!({"shuffleAddressList": true})
        );
    }

    #[test]
    fn config_rejects_wrong_type() {
        let err = PickFirstProvider
            .parse_config(&json!({"shuffleAddressList": "yes"}))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidPolicyConfig { policy: PICK_FIRST_POLICY_NAME, .. }
        ));
    }

    #[test]
    fn env_variant_selection() {
        std::env::remove_var(NEW_PICK_FIRST_VAR);
        assert!(!new_pick_first_enabled());
        std::env::set_var(NEW_PICK_FIRST_VAR, "");
        assert!(!new_pick_first_enabled());
        std::env::set_var(NEW_PICK_FIRST_VAR, "false");
        assert!(!new_pick_first_enabled());
        std::env::set_var(NEW_PICK_FIRST_VAR, "true");
        assert!(new_pick_first_enabled());
        std::env::set_var(NEW_PICK_FIRST_VAR, "TRUE");
        assert!(new_pick_first_enabled());
        std::env::remove_var(NEW_PICK_FIRST_VAR);
    }

    #[test]
    fn connects_and_publishes_ready_picker() {
        let helper = helper();
        let mut balancer = PickFirstBalancer::new(helper.clone(), false);
        balancer
            .accept_resolved_addresses(ResolvedAddresses {
                addresses: addresses(&["10.0.0.1:443", "10.0.0.2:443"]),
                config: None,
            })
            .unwrap();

        let subchannel = helper.subchannels().pop().unwrap();
        assert_eq!(subchannel.connect_requests(), 1);
        assert_eq!(helper.latest_state(), Some(ConnectivityState::Connecting));

        subchannel.transition(ConnectivityState::Ready, None);
        assert_eq!(helper.latest_state(), Some(ConnectivityState::Ready));
        let picker = helper.latest_picker().unwrap();
        assert!(matches!(
            picker.pick(&PickArgs::default()),
            PickResult::Subchannel(_)
        ));
    }

    #[test]
    fn idle_pick_drives_reconnection() {
        let helper = helper();
        let mut balancer = PickFirstBalancer::new(helper.clone(), false);
        balancer
            .accept_resolved_addresses(ResolvedAddresses {
                addresses: addresses(&["10.0.0.1:443"]),
                config: None,
            })
            .unwrap();
        let subchannel = helper.subchannels().pop().unwrap();
        subchannel.transition(ConnectivityState::Ready, None);
        subchannel.transition(ConnectivityState::Idle, None);

        assert_eq!(helper.latest_state(), Some(ConnectivityState::Idle));
        let requests_before = subchannel.connect_requests();
        let picker = helper.latest_picker().unwrap();
        assert!(matches!(picker.pick(&PickArgs::default()), PickResult::Queue));
        assert_eq!(subchannel.connect_requests(), requests_before + 1);

        // An explicit connection request from the owner works too.
        balancer.request_connection();
        assert_eq!(subchannel.connect_requests(), requests_before + 2);
    }

    #[test]
    fn transient_failure_publishes_the_status() {
        let helper = helper();
        let mut balancer = PickFirstBalancer::new(helper.clone(), false);
        balancer
            .accept_resolved_addresses(ResolvedAddresses {
                addresses: addresses(&["10.0.0.1:443"]),
                config: None,
            })
            .unwrap();
        let subchannel = helper.subchannels().pop().unwrap();
        subchannel.transition(
            ConnectivityState::TransientFailure,
            Some(Status::unavailable("connection refused")),
        );

        let picker = helper.latest_picker().unwrap();
        let result = picker.pick(&PickArgs::default());
        assert_eq!(result.error().unwrap().code(), Code::Unavailable);

        // The stock variant bounces back to CONNECTING on a reconnect
        // attempt.
        subchannel.transition(ConnectivityState::Connecting, None);
        assert_eq!(helper.latest_state(), Some(ConnectivityState::Connecting));
    }

    #[test]
    fn sticky_variant_holds_transient_failure_through_connecting() {
        let helper = helper();
        let mut balancer = PickFirstBalancer::new(helper.clone(), true);
        balancer
            .accept_resolved_addresses(ResolvedAddresses {
                addresses: addresses(&["10.0.0.1:443"]),
                config: None,
            })
            .unwrap();
        let subchannel = helper.subchannels().pop().unwrap();
        subchannel.transition(
            ConnectivityState::TransientFailure,
            Some(Status::unavailable("connection refused")),
        );
        subchannel.transition(ConnectivityState::Connecting, None);
        assert_eq!(
            helper.latest_state(),
            Some(ConnectivityState::TransientFailure)
        );

        subchannel.transition(ConnectivityState::Ready, None);
        assert_eq!(helper.latest_state(), Some(ConnectivityState::Ready));
    }

    #[test]
    fn empty_address_list_is_an_error() {
        let helper = helper();
        let mut balancer = PickFirstBalancer::new(helper.clone(), false);
        let status = balancer
            .accept_resolved_addresses(ResolvedAddresses {
                addresses: vec![],
                config: None,
            })
            .unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(
            helper.latest_state(),
            Some(ConnectivityState::TransientFailure)
        );
    }

    #[test]
    fn shuffle_preserves_the_address_set() {
        let helper = helper();
        let mut balancer = PickFirstBalancer::new(helper.clone(), false);
        let config: PolicyConfig = Arc::new(PickFirstConfig {
            shuffle_address_list: true,
        });
        let original = addresses(&["a:1", "b:2", "c:3", "d:4", "e:5"]);
        balancer
            .accept_resolved_addresses(ResolvedAddresses {
                addresses: original.clone(),
                config: Some(config),
            })
            .unwrap();

        let subchannel = helper.subchannels().pop().unwrap();
        let mut shuffled = subchannel.addresses();
        shuffled.sort_by(|a, b| a.0.cmp(&b.0));
        let mut expected = original;
        expected.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(shuffled, expected);
    }

    #[test]
    fn update_replaces_the_previous_subchannel() {
        let helper = helper();
        let mut balancer = PickFirstBalancer::new(helper.clone(), false);
        balancer
            .accept_resolved_addresses(ResolvedAddresses {
                addresses: addresses(&["10.0.0.1:443"]),
                config: None,
            })
            .unwrap();
        balancer
            .accept_resolved_addresses(ResolvedAddresses {
                addresses: addresses(&["10.0.0.2:443"]),
                config: None,
            })
            .unwrap();

        let subchannels = helper.subchannels();
        assert_eq!(subchannels.len(), 2);
        assert!(subchannels[0].is_shut_down());
        assert!(!subchannels[1].is_shut_down());

        // A late transition from the replaced subchannel is ignored.
        subchannels[0].transition(ConnectivityState::Ready, None);
        assert_eq!(helper.latest_state(), Some(ConnectivityState::Connecting));
    }
}
