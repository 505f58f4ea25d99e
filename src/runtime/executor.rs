/// Node execution seam
///
/// The node-type library lives outside the engine. Each type tag maps to a
/// `NodeHandler`; the executor dispatches by tag and times every execution.
/// Two built-ins ship with the engine:
/// - `constant`: emits `config.value` on its `out` port
/// - `passthrough`: copies every input port to the same-named output port

use crate::{
    flow::types::{Node, PortValue, Quality},
    runtime::log_sink::LogLevel,
};
use anyhow::Result;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
};

/// Boxed future returned by a node handler
pub type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<NodeOutput>> + Send + 'a>>;

/// Implementation of one node type
pub trait NodeHandler: Send + Sync {
    /// Type tag this handler serves (matches `Node::node_type`)
    fn node_type(&self) -> &str;

    /// Run the node against a snapshot of its inputs
    ///
    /// An `Err` is a node execution failure: it is logged against the node and
    /// its downstream inputs turn BAD, while the rest of the tick carries on.
    fn execute<'a>(&'a self, node: &'a Node, inputs: &'a BTreeMap<String, PortValue>) -> NodeFuture<'a>;
}

/// A value emitted on an output port
#[derive(Debug, Clone, PartialEq)]
pub struct OutputValue {
    pub value: Value,
    /// `None` means the node has no opinion; the worst input quality is used
    pub quality: Option<Quality>,
}

/// A log line emitted by a node during execution
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLog {
    pub level: LogLevel,
    pub message: String,
    pub metadata: Option<Value>,
}

/// Everything a node produced in one execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    pub ports: BTreeMap<String, OutputValue>,
    pub logs: Vec<NodeLog>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `value` on `port`, inheriting input quality
    pub fn with_port(mut self, port: impl Into<String>, value: Value) -> Self {
        self.ports.insert(port.into(), OutputValue { value, quality: None });
        self
    }

    /// Emit `value` on `port` with an explicit quality
    pub fn with_quality(mut self, port: impl Into<String>, value: Value, quality: Quality) -> Self {
        self.ports.insert(
            port.into(),
            OutputValue {
                value,
                quality: Some(quality),
            },
        );
        self
    }

    pub fn with_log(mut self, level: LogLevel, message: impl Into<String>) -> Self {
        self.logs.push(NodeLog {
            level,
            message: message.into(),
            metadata: None,
        });
        self
    }
}

/// Registry of node handlers keyed by type tag
#[derive(Clone, Default)]
pub struct NodeExecutor {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl fmt::Debug for NodeExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("NodeExecutor").field("handlers", &types).finish()
    }
}

impl NodeExecutor {
    /// Empty executor; every node type is unknown until registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor with the built-in `constant` and `passthrough` handlers
    pub fn with_builtins() -> Self {
        let mut executor = Self::new();
        executor.register(Arc::new(ConstantNode));
        executor.register(Arc::new(PassthroughNode));
        executor
    }

    /// Register (or replace) the handler for its type tag
    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        let node_type = handler.node_type().to_string();
        if self.handlers.insert(node_type.clone(), handler).is_some() {
            tracing::warn!("⚠️ Replaced node handler for type '{}'", node_type);
        } else {
            tracing::debug!("🧩 Registered node handler: {}", node_type);
        }
    }

    /// Execute a single node against its input snapshot
    pub async fn execute_node(&self, node: &Node, inputs: &BTreeMap<String, PortValue>) -> Result<NodeOutput> {
        tracing::debug!("🚀 Executing node {} (type: {})", node.id, node.node_type);
        let start_time = std::time::Instant::now();

        let result = match self.handlers.get(&node.node_type) {
            Some(handler) => handler.execute(node, inputs).await,
            None => Err(anyhow::anyhow!("unknown node type '{}'", node.node_type)),
        };

        let duration = start_time.elapsed();
        match &result {
            Ok(output) => {
                tracing::debug!(
                    "✅ Node {} completed in {:?} ({} outputs)",
                    node.id,
                    duration,
                    output.ports.len()
                );
            }
            Err(e) => {
                tracing::warn!("❌ Node {} failed in {:?}: {}", node.id, duration, e);
            }
        }

        result
    }
}

/// Emits its configured `value` on `out` every time it runs
struct ConstantNode;

impl NodeHandler for ConstantNode {
    fn node_type(&self) -> &str {
        "constant"
    }

    fn execute<'a>(&'a self, node: &'a Node, _inputs: &'a BTreeMap<String, PortValue>) -> NodeFuture<'a> {
        Box::pin(async move {
            let value = node.config.get("value").cloned().unwrap_or(Value::Null);
            Ok(NodeOutput::new().with_port("out", value))
        })
    }
}

/// Forwards each input port, value and quality, to the output port of the same name
struct PassthroughNode;

impl NodeHandler for PassthroughNode {
    fn node_type(&self) -> &str {
        "passthrough"
    }

    fn execute<'a>(&'a self, _node: &'a Node, inputs: &'a BTreeMap<String, PortValue>) -> NodeFuture<'a> {
        Box::pin(async move {
            let output = inputs.iter().fold(NodeOutput::new(), |output, (port, input)| {
                output.with_quality(port.clone(), input.value.clone(), input.quality)
            });
            Ok(output)
        })
    }
}
