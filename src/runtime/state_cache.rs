/// Per-session input state cache
///
/// Holds the latest value delivered to every (node, port) pair of a running flow.
/// Values survive across scan cycles until overwritten or cleared; there is no
/// implicit expiry. All operations are synchronous and infallible. The cache
/// belongs to exactly one session, and that session's tick is its only writer.

use crate::flow::types::PortValue;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default, Clone)]
pub struct InputStateCache {
    nodes: HashMap<String, BTreeMap<String, PortValue>>,
}

impl InputStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the value of a port; no merge semantics
    pub fn update(&mut self, node_id: &str, port: &str, value: PortValue) {
        self.nodes
            .entry(node_id.to_string())
            .or_default()
            .insert(port.to_string(), value);
    }

    /// Last value written to a port, if any
    pub fn get(&self, node_id: &str, port: &str) -> Option<&PortValue> {
        self.nodes.get(node_id).and_then(|ports| ports.get(port))
    }

    /// Snapshot of every port of a node, ordered by port name
    ///
    /// The result is an owned copy; later updates do not show through it.
    pub fn get_all(&self, node_id: &str) -> BTreeMap<String, PortValue> {
        self.nodes.get(node_id).cloned().unwrap_or_default()
    }

    /// The node's inputs as a JSON object of raw values, the shape trigger
    /// expressions see as `$input`
    pub fn input_object(&self, node_id: &str) -> Value {
        let object = self
            .nodes
            .get(node_id)
            .map(|ports| {
                ports
                    .iter()
                    .map(|(port, value)| (port.clone(), value.value.clone()))
                    .collect::<Map<String, Value>>()
            })
            .unwrap_or_default();
        Value::Object(object)
    }

    /// Forget every port of one node
    pub fn clear(&mut self, node_id: &str) {
        self.nodes.remove(node_id);
    }

    /// Forget everything
    pub fn clear_all(&mut self) {
        self.nodes.clear();
    }
}
