//! Per-call options consulted by pickers.

use std::collections::HashMap;

/// Option key under which the name resolver records the cluster a call
/// should be routed to.
pub const CLUSTER_SELECTION_KEY: &str = "cluster-selection";

/// String-keyed options attached to an outbound call.
///
/// Options are set by resolvers and interceptors upstream of the balancer
/// and read by pickers at pick time. Keys are static strings owned by the
/// component that defines them.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    values: HashMap<&'static str, String>,
}

impl CallOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of these options with `key` set to `value`.
    pub fn with_option(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    /// Look up an option by key.
    pub fn option(&self, key: &'static str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_option_is_none() {
        assert_eq!(CallOptions::new().option(CLUSTER_SELECTION_KEY), None);
    }

    #[test]
    fn set_option_is_readable() {
        let options = CallOptions::new().with_option(CLUSTER_SELECTION_KEY, "cluster-a");
        assert_eq!(options.option(CLUSTER_SELECTION_KEY), Some("cluster-a"));
    }

    #[test]
    fn later_value_replaces_earlier() {
        let options = CallOptions::new()
            .with_option(CLUSTER_SELECTION_KEY, "first")
            .with_option(CLUSTER_SELECTION_KEY, "second");
        assert_eq!(options.option(CLUSTER_SELECTION_KEY), Some("second"));
    }
}
