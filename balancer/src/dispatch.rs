//! Picker routing each call to the child named by its cluster-selection
//! option.

use std::collections::BTreeMap;
use std::sync::Arc;

use chassis_core::{Status, CLUSTER_SELECTION_KEY};

use crate::api::{PickArgs, PickResult, Picker};

/// Stateless snapshot of child pickers, rebuilt whenever the child set or
/// any child picker changes. Picks racing an update observe either the old
/// snapshot or the new one, never a mix.
pub struct ClusterDispatchPicker {
    children: BTreeMap<String, Arc<dyn Picker>>,
}

impl ClusterDispatchPicker {
    pub fn new(children: BTreeMap<String, Arc<dyn Picker>>) -> Self {
        Self { children }
    }
}

impl Picker for ClusterDispatchPicker {
    fn pick(&self, args: &PickArgs) -> PickResult {
        let cluster = args
            .options
            .option(CLUSTER_SELECTION_KEY)
            .unwrap_or_default();
        match self.children.get(cluster) {
            Some(child) => child.pick(args),
            None => PickResult::Err(Status::unavailable(format!(
                "CDS encountered error: unable to find available subchannel for cluster {cluster}"
            ))),
        }
    }
}
