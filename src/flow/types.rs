/// Core flow type definitions
///
/// Defines the stored shape of flows, nodes and edges, the declared parameter
/// schema, and the port values that move between nodes at runtime. Flows are
/// serialized to JSON for persistence and compiled into petgraph DAGs for execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A complete flow definition: graph, schedule, logging policy and parameter schema
///
/// Created and edited by external collaborators; the engine only reads it at
/// session start and when injecting runtime parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    /// Unique flow identifier (e.g., "flow-boiler-1")
    pub id: String,
    /// Human-readable flow name
    pub name: String,
    /// Nodes of the dataflow graph
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Port-to-port connections between nodes
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// How the flow is driven once started
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// Period between scan cycles (continuous mode only)
    #[serde(default)]
    pub scan_rate_ms: Option<u64>,
    /// Whether the flow is intended to be running
    #[serde(default)]
    pub deployed: bool,
    /// Whether non-error execution log entries are persisted
    #[serde(default = "default_logs_enabled")]
    pub logs_enabled: bool,
    /// Days execution log entries are kept before the retention sweep deletes them
    #[serde(default = "default_retention_days")]
    pub logs_retention_days: u32,
    /// Declared runtime parameters, in declaration order
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
}

fn default_logs_enabled() -> bool {
    true
}

fn default_retention_days() -> u32 {
    30
}

impl Flow {
    /// Look up a node by id
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == node_id)
    }

    /// Mutable node lookup, used when writing parameter values into configuration
    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.id == node_id)
    }

    /// True for deployed flows the bootstrap reconciler must keep running
    pub fn wants_continuous_session(&self) -> bool {
        self.deployed && self.execution_mode == ExecutionMode::Continuous
    }
}

/// How a started flow is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Periodic scan cycles at `scan_rate_ms` until stopped
    Continuous,
    /// A single evaluation pass
    #[default]
    Manual,
    /// A single evaluation pass that also records every node's outputs
    TestMode,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Continuous => "continuous",
            ExecutionMode::Manual => "manual",
            ExecutionMode::TestMode => "test_mode",
        }
    }
}

/// A single node in the flow graph
///
/// Execution behavior is delegated to the node handler registered for `node_type`.
/// The optional trigger expression gates whether the node fires on a given cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the flow (e.g., "n1", "temp-read")
    pub id: String,
    /// Type tag used to find the node handler
    pub node_type: String,
    /// Node-specific configuration bag; runtime parameters are written here
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Declared input port names
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Declared output port names
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Boolean gate evaluated against this node's inputs each cycle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

/// Connection from one node's output port to another node's input port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node ID
    pub from: String,
    /// Source output port
    #[serde(default = "default_output_port")]
    pub from_port: String,
    /// Target node ID
    pub to: String,
    /// Target input port
    #[serde(default = "default_input_port")]
    pub to_port: String,
}

fn default_output_port() -> String {
    "out".to_string()
}

fn default_input_port() -> String {
    "in".to_string()
}

/// Ordinal validity indicator attached to every port value
///
/// Higher is worse. Unknown ordinals are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quality(pub u8);

impl Quality {
    pub const GOOD: Quality = Quality(0);
    pub const UNCERTAIN: Quality = Quality(64);
    pub const BAD: Quality = Quality(192);

    pub fn is_good(self) -> bool {
        self == Quality::GOOD
    }

    /// The worse of two qualities
    pub fn worst(self, other: Quality) -> Quality {
        self.max(other)
    }
}

impl Default for Quality {
    fn default() -> Self {
        Quality::GOOD
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Quality::GOOD => write!(f, "good"),
            Quality::UNCERTAIN => write!(f, "uncertain"),
            Quality::BAD => write!(f, "bad"),
            Quality(other) => write!(f, "quality({other})"),
        }
    }
}

/// Latest value seen on a port, with its quality and arrival time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortValue {
    pub value: Value,
    pub quality: Quality,
    pub updated_at: DateTime<Utc>,
}

impl PortValue {
    pub fn new(value: Value, quality: Quality) -> Self {
        Self {
            value,
            quality,
            updated_at: Utc::now(),
        }
    }

    /// A good-quality value
    pub fn good(value: Value) -> Self {
        Self::new(value, Quality::GOOD)
    }
}

/// One declared runtime parameter of a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    /// Key callers use when supplying the value
    pub name: String,
    /// Node whose configuration receives the value
    pub node_id: String,
    /// Configuration key inside that node
    pub node_parameter: String,
    /// Expected value type
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub constraints: ParameterConstraints,
    /// Value injected when the caller supplies none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Supported parameter value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    Date,
    Select,
    Json,
}

/// Type-specific constraints; fields that do not apply to a type are ignored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Allowed values for `select` parameters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Value>,
}
