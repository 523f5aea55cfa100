//! Balancer configuration payloads and their parsing.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::api::{LbProvider, PolicyConfig};
use crate::registry::LbRegistry;

/// Errors raised while parsing balancer configuration.
///
/// Always returned as values; config parsing never panics on bad input.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("balancer config must be a JSON object")]
    NotAnObject,
    #[error("cluster {0:?}: entry must be a JSON object")]
    ClusterNotAnObject(String),
    #[error("cluster {0:?}: missing \"policyProvider\"")]
    MissingPolicy(String),
    #[error("unknown load-balancing policy {0:?}")]
    UnknownPolicy(String),
    #[error("failed parsing configuration for {policy}: {reason}")]
    InvalidPolicyConfig {
        policy: &'static str,
        reason: String,
    },
}

/// One child entry of the cluster-manager config: the policy to run and its
/// parsed configuration.
#[derive(Clone)]
pub struct ChildPolicy {
    pub provider: Arc<dyn LbProvider>,
    pub config: Option<PolicyConfig>,
}

impl std::fmt::Debug for ChildPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildPolicy")
            .field("provider", &self.provider.name())
            .field("config", &self.config.is_some())
            .finish()
    }
}

/// Parsed cluster-manager balancer configuration: an ordered mapping from
/// cluster name to child policy.
#[derive(Clone, Default, Debug)]
pub struct ClusterManagerConfig {
    pub children: BTreeMap<String, ChildPolicy>,
}

impl ClusterManagerConfig {
    /// Parse the wire schema
    /// `{clusterName: {"policyProvider": name, "policyConfig": opaque}}`
    /// against `registry`.
    pub fn parse(raw: &Value, registry: &LbRegistry) -> Result<Self, ConfigError> {
        let object = raw.as_object().ok_or(ConfigError::NotAnObject)?;
        let mut children = BTreeMap::new();
        for (cluster, entry) in object {
            let entry = entry
                .as_object()
                .ok_or_else(|| ConfigError::ClusterNotAnObject(cluster.clone()))?;
            let policy_name = entry
                .get("policyProvider")
                .and_then(Value::as_str)
                .ok_or_else(|| ConfigError::MissingPolicy(cluster.clone()))?;
            let provider = registry
                .provider(policy_name)
                .ok_or_else(|| ConfigError::UnknownPolicy(policy_name.to_string()))?;
            let config = match entry.get("policyConfig") {
                Some(raw_child) => Some(provider.parse_config(raw_child)?),
                None => None,
            };
            children.insert(
                cluster.clone(),
                ChildPolicy { provider, config },
            );
        }
        Ok(Self { children })
    }
}
