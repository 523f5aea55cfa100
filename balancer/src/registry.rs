//! Registry of load-balancer policy providers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::api::LbProvider;

/// Maps policy names to providers.
///
/// Several providers may register under the same name; lookup returns the
/// available one with the highest priority, so an experimental provider can
/// shadow a stock one without unregistering it.
#[derive(Default)]
pub struct LbRegistry {
    providers: HashMap<&'static str, Vec<Arc<dyn LbProvider>>>,
}

impl LbRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own policy name.
    pub fn register(&mut self, provider: Arc<dyn LbProvider>) {
        self.providers
            .entry(provider.name())
            .or_default()
            .push(provider);
    }

    /// Look up the best provider for a policy name.
    pub fn provider(&self, name: &str) -> Option<Arc<dyn LbProvider>> {
        self.providers
            .get(name)?
            .iter()
            .filter(|p| p.is_available())
            .max_by_key(|p| p.priority())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Helper, LoadBalancer, PolicyConfig};
    use crate::config::ConfigError;

    struct FixedProvider {
        name: &'static str,
        priority: u8,
        available: bool,
    }

    impl LbProvider for FixedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn parse_config(&self, _raw: &serde_json::Value) -> Result<PolicyConfig, ConfigError> {
            Ok(Arc::new(()))
        }

        fn new_balancer(&self, _helper: Arc<dyn Helper>) -> Box<dyn LoadBalancer> {
            unimplemented!("not built in registry tests")
        }
    }

    #[test]
    fn unknown_name_is_none() {
        assert!(LbRegistry::new().provider("nope").is_none());
    }

    #[test]
    fn highest_priority_available_provider_wins() {
        let mut registry = LbRegistry::new();
        registry.register(Arc::new(FixedProvider {
            name: "p",
            priority: 5,
            available: true,
        }));
        registry.register(Arc::new(FixedProvider {
            name: "p",
            priority: 9,
            available: false,
        }));
        registry.register(Arc::new(FixedProvider {
            name: "p",
            priority: 7,
            available: true,
        }));
        let chosen = registry.provider("p").unwrap();
        assert_eq!(chosen.priority(), 7);
    }
}
