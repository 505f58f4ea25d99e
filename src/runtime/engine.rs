/// Petgraph-based scan cycle engine
///
/// Compiles a flow into an `ExecutionPlan` (topological node order plus the
/// output routes of every node) and runs one scan cycle over it: trigger
/// gating, node execution against the input state cache, routing of outputs
/// into downstream inputs with quality propagation, and forwarding of log lines
/// to the execution log sink.

use crate::{
    error::SessionError,
    flow::types::{Flow, Node, PortValue, Quality},
    runtime::{
        executor::{NodeExecutor, NodeOutput},
        log_sink::{ExecutionLogSink, LogEntry, LogLevel},
        state_cache::InputStateCache,
        trigger::TriggerEvaluator,
    },
};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// One edge as seen from its source node
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub from_port: String,
    pub to: String,
    pub to_port: String,
}

/// A flow compiled for repeated scanning
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    flow: Arc<Flow>,
    /// Indices into `flow.nodes` in dependency order
    order: Vec<usize>,
    routes: HashMap<String, Vec<Route>>,
}

impl ExecutionPlan {
    /// Build the plan, rejecting duplicate node ids, dangling edges and cycles
    pub fn build(flow: Arc<Flow>) -> Result<Self, SessionError> {
        let invalid = |reason: String| SessionError::InvalidGraph {
            flow_id: flow.id.clone(),
            reason,
        };

        tracing::debug!(
            "🏗️ Building execution plan for '{}' ({} nodes, {} edges)",
            flow.id,
            flow.nodes.len(),
            flow.edges.len()
        );

        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut index_of: HashMap<&str, NodeIndex> = HashMap::new();
        for (position, node) in flow.nodes.iter().enumerate() {
            let index = graph.add_node(position);
            if index_of.insert(node.id.as_str(), index).is_some() {
                return Err(invalid(format!("duplicate node id '{}'", node.id)));
            }
        }

        let mut routes: HashMap<String, Vec<Route>> = HashMap::new();
        for edge in &flow.edges {
            let from = *index_of
                .get(edge.from.as_str())
                .ok_or_else(|| invalid(format!("edge source '{}' is not a node", edge.from)))?;
            let to = *index_of
                .get(edge.to.as_str())
                .ok_or_else(|| invalid(format!("edge target '{}' is not a node", edge.to)))?;
            graph.add_edge(from, to, ());
            routes.entry(edge.from.clone()).or_default().push(Route {
                from_port: edge.from_port.clone(),
                to: edge.to.clone(),
                to_port: edge.to_port.clone(),
            });
        }

        let sorted = toposort(&graph, None).map_err(|cycle| {
            let node = &flow.nodes[graph[cycle.node_id()]];
            invalid(format!("cycle through node '{}'", node.id))
        })?;
        let order: Vec<usize> = sorted.into_iter().map(|index| graph[index]).collect();

        tracing::debug!(
            "📋 Execution order for '{}': {:?}",
            flow.id,
            order.iter().map(|&i| flow.nodes[i].id.as_str()).collect::<Vec<_>>()
        );

        Ok(Self { flow, order, routes })
    }

    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }

    /// Nodes in dependency order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().map(|&i| &self.flow.nodes[i])
    }

    pub fn routes_from(&self, node_id: &str) -> &[Route] {
        self.routes.get(node_id).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Writes a session's execution log entries, honoring the flow's logging toggle
#[derive(Debug, Clone)]
pub struct ExecutionLogger {
    sink: ExecutionLogSink,
    execution_id: String,
    flow_id: String,
    /// When false only error entries are kept
    persist_all: bool,
}

impl ExecutionLogger {
    pub fn new(sink: ExecutionLogSink, execution_id: impl Into<String>, flow: &Flow) -> Self {
        Self {
            sink,
            execution_id: execution_id.into(),
            flow_id: flow.id.clone(),
            persist_all: flow.logs_enabled,
        }
    }

    /// Flow-level entry
    pub fn flow(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(LogEntry::new(&self.execution_id, &self.flow_id, level, message));
    }

    /// Entry tagged with a node id
    pub fn node(&self, node_id: &str, level: LogLevel, message: impl Into<String>, metadata: Option<Value>) {
        let mut entry = LogEntry::new(&self.execution_id, &self.flow_id, level, message).with_node(node_id);
        entry.metadata = metadata;
        self.emit(entry);
    }

    fn emit(&self, entry: LogEntry) {
        if self.persist_all || entry.level == LogLevel::Error {
            self.sink.add(entry);
        }
    }
}

/// Mutable per-session scan state, touched only by that session's tick
#[derive(Debug, Default)]
pub struct ScanState {
    cache: InputStateCache,
    triggers: TriggerEvaluator,
    /// Nodes whose trigger failed and has already been reported
    trigger_faults: HashSet<String>,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release cached inputs and trigger bookkeeping at session teardown
    pub fn release(&mut self) {
        self.cache.clear_all();
        self.trigger_faults.clear();
    }
}

/// What happened to each node during one tick
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Runs scan cycles over execution plans
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    executor: Arc<NodeExecutor>,
}

impl ExecutionEngine {
    pub fn new(executor: Arc<NodeExecutor>) -> Self {
        Self { executor }
    }

    /// One full pass over the plan in dependency order
    ///
    /// Node failures never abort the pass: the failure is logged once against
    /// the node and every input it feeds turns BAD, keeping its last value.
    /// With `record_outputs` each executed node's outputs are logged at debug.
    pub async fn run_tick(
        &self,
        plan: &ExecutionPlan,
        state: &mut ScanState,
        logger: &ExecutionLogger,
        record_outputs: bool,
    ) -> TickReport {
        let mut report = TickReport::default();

        for node in plan.nodes() {
            if !self.trigger_fires(node, state, logger) {
                report.skipped.push(node.id.clone());
                continue;
            }

            let inputs = state.cache.get_all(&node.id);
            let inherited = inputs
                .values()
                .fold(Quality::GOOD, |quality, input| quality.worst(input.quality));

            match self.executor.execute_node(node, &inputs).await {
                Ok(NodeOutput { ports, logs }) => {
                    for log in logs {
                        logger.node(&node.id, log.level, log.message, log.metadata);
                    }

                    let mut recorded = Map::new();
                    for (port, output) in ports {
                        let value = PortValue::new(output.value, output.quality.unwrap_or(inherited));
                        for route in plan.routes_from(&node.id).iter().filter(|r| r.from_port == port) {
                            state.cache.update(&route.to, &route.to_port, value.clone());
                        }
                        if record_outputs {
                            recorded.insert(port, json!({ "value": value.value, "quality": value.quality }));
                        }
                    }

                    if record_outputs {
                        logger.node(&node.id, LogLevel::Debug, "node outputs", Some(Value::Object(recorded)));
                    }
                    report.executed.push(node.id.clone());
                }
                Err(e) => {
                    logger.node(
                        &node.id,
                        LogLevel::Error,
                        format!("node execution failed: {e:#}"),
                        Some(json!({ "node_type": node.node_type })),
                    );
                    for route in plan.routes_from(&node.id) {
                        let last = state
                            .cache
                            .get(&route.to, &route.to_port)
                            .map(|previous| previous.value.clone())
                            .unwrap_or(Value::Null);
                        state
                            .cache
                            .update(&route.to, &route.to_port, PortValue::new(last, Quality::BAD));
                    }
                    report.failed.push(node.id.clone());
                }
            }
        }

        tracing::debug!(
            "🔄 Tick for '{}': {} executed, {} skipped, {} failed",
            plan.flow.id,
            report.executed.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    /// Evaluate the node's trigger, if any
    ///
    /// An expression that cannot be evaluated counts as "did not fire" and is
    /// reported once until it evaluates successfully again.
    fn trigger_fires(&self, node: &Node, state: &mut ScanState, logger: &ExecutionLogger) -> bool {
        let Some(expression) = node.trigger.as_deref().filter(|e| !e.trim().is_empty()) else {
            return true;
        };

        match state.triggers.evaluate(&state.cache, &node.id, expression) {
            Ok(fires) => {
                state.trigger_faults.remove(&node.id);
                fires
            }
            Err(e) => {
                if state.trigger_faults.insert(node.id.clone()) {
                    logger.node(
                        &node.id,
                        LogLevel::Warn,
                        format!("trigger skipped: {e}"),
                        Some(json!({ "expression": expression })),
                    );
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::LiveBus,
        database::Database,
        runtime::{
            executor::{NodeFuture, NodeHandler},
            log_storage::LogStorage,
        },
    };
    use std::collections::BTreeMap;

    struct FailingNode;

    impl NodeHandler for FailingNode {
        fn node_type(&self) -> &str {
            "fail"
        }

        fn execute<'a>(&'a self, _node: &'a Node, _inputs: &'a BTreeMap<String, PortValue>) -> NodeFuture<'a> {
            Box::pin(async { Err(anyhow::anyhow!("device offline")) })
        }
    }

    /// Emits a fixed value without stating a quality
    struct OpinionlessNode;

    impl NodeHandler for OpinionlessNode {
        fn node_type(&self) -> &str {
            "opinionless"
        }

        fn execute<'a>(&'a self, _node: &'a Node, _inputs: &'a BTreeMap<String, PortValue>) -> NodeFuture<'a> {
            Box::pin(async { Ok(NodeOutput::new().with_port("out", json!(1))) })
        }
    }

    fn flow(value: Value) -> Arc<Flow> {
        Arc::new(serde_json::from_value(value).unwrap())
    }

    fn engine() -> ExecutionEngine {
        let mut executor = NodeExecutor::with_builtins();
        executor.register(Arc::new(FailingNode));
        executor.register(Arc::new(OpinionlessNode));
        ExecutionEngine::new(Arc::new(executor))
    }

    async fn logger(flow: &Flow) -> (ExecutionLogger, LogStorage) {
        let db = Database::in_memory().await.unwrap();
        let logs = LogStorage::new(db.pool().clone());
        let sink = ExecutionLogSink::new(logs.clone(), LiveBus::default());
        (ExecutionLogger::new(sink, "exec-1", flow), logs)
    }

    async fn stored(logger: &ExecutionLogger, logs: &LogStorage) -> Vec<LogEntry> {
        logger.sink.finalize().await;
        logs.fetch_for_execution("exec-1").await.unwrap()
    }

    #[test]
    fn plan_orders_nodes_by_dependency() {
        let plan = ExecutionPlan::build(flow(json!({
            "id": "f1", "name": "f1",
            "nodes": [
                { "id": "c", "node_type": "passthrough" },
                { "id": "a", "node_type": "constant" },
                { "id": "b", "node_type": "passthrough" }
            ],
            "edges": [
                { "from": "a", "to": "b" },
                { "from": "b", "from_port": "in", "to": "c" }
            ]
        })))
        .unwrap();

        let order: Vec<&str> = plan.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(plan.routes_from("b")[0].from_port, "in");
        assert!(plan.routes_from("c").is_empty());
    }

    #[test]
    fn plan_rejects_cycles_and_dangling_edges() {
        let cyclic = ExecutionPlan::build(flow(json!({
            "id": "f1", "name": "f1",
            "nodes": [{ "id": "a", "node_type": "passthrough" }, { "id": "b", "node_type": "passthrough" }],
            "edges": [{ "from": "a", "to": "b" }, { "from": "b", "to": "a" }]
        })));
        assert!(matches!(cyclic, Err(SessionError::InvalidGraph { .. })));

        let dangling = ExecutionPlan::build(flow(json!({
            "id": "f1", "name": "f1",
            "nodes": [{ "id": "a", "node_type": "constant" }],
            "edges": [{ "from": "a", "to": "ghost" }]
        })));
        let err = dangling.unwrap_err();
        assert!(err.to_string().contains("ghost"));

        let duplicate = ExecutionPlan::build(flow(json!({
            "id": "f1", "name": "f1",
            "nodes": [{ "id": "a", "node_type": "constant" }, { "id": "a", "node_type": "constant" }]
        })));
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn failing_node_is_isolated_and_logged_once() {
        let flow = flow(json!({
            "id": "f1", "name": "f1",
            "nodes": [
                { "id": "n1", "node_type": "constant", "config": { "value": 5 } },
                { "id": "n2", "node_type": "fail" },
                { "id": "n3", "node_type": "passthrough" }
            ],
            "edges": [{ "from": "n1", "to": "n2" }, { "from": "n2", "to": "n3" }]
        }));
        let plan = ExecutionPlan::build(flow.clone()).unwrap();
        let (logger, logs) = logger(&flow).await;
        let mut state = ScanState::new();

        let report = engine().run_tick(&plan, &mut state, &logger, false).await;

        assert_eq!(report.executed, vec!["n1", "n3"]);
        assert_eq!(report.failed, vec!["n2"]);
        assert_eq!(state.cache.get("n2", "in").unwrap().value, json!(5));
        let degraded = state.cache.get("n3", "in").unwrap();
        assert_eq!(degraded.quality, Quality::BAD);
        assert_eq!(degraded.value, Value::Null);

        let errors: Vec<LogEntry> = stored(&logger, &logs)
            .await
            .into_iter()
            .filter(|e| e.level == LogLevel::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].node_id.as_deref(), Some("n2"));
        assert!(errors[0].message.contains("device offline"));
    }

    #[tokio::test]
    async fn outputs_inherit_worst_input_quality() {
        let flow = flow(json!({
            "id": "f1", "name": "f1",
            "nodes": [
                { "id": "x", "node_type": "opinionless" },
                { "id": "y", "node_type": "passthrough" }
            ],
            "edges": [{ "from": "x", "to": "y", "to_port": "value" }]
        }));
        let plan = ExecutionPlan::build(flow.clone()).unwrap();
        let (logger, _logs) = logger(&flow).await;
        let mut state = ScanState::new();
        state.cache.update("x", "a", PortValue::good(json!(1)));
        state.cache.update("x", "b", PortValue::new(json!(2), Quality::UNCERTAIN));

        engine().run_tick(&plan, &mut state, &logger, false).await;

        assert_eq!(state.cache.get("y", "value").unwrap().quality, Quality::UNCERTAIN);
    }

    #[tokio::test]
    async fn trigger_gates_execution_and_reports_faults_once() {
        let flow = flow(json!({
            "id": "f1", "name": "f1",
            "nodes": [
                { "id": "hot", "node_type": "passthrough", "trigger": "$input.temp > 100" },
                { "id": "broken", "node_type": "constant", "trigger": "$input.temp >" }
            ]
        }));
        let plan = ExecutionPlan::build(flow.clone()).unwrap();
        let (logger, logs) = logger(&flow).await;
        let engine = engine();
        let mut state = ScanState::new();

        state.cache.update("hot", "temp", PortValue::good(json!(50)));
        let first = engine.run_tick(&plan, &mut state, &logger, false).await;
        assert!(first.executed.is_empty());
        assert_eq!(first.skipped.len(), 2);

        state.cache.update("hot", "temp", PortValue::good(json!(150)));
        let second = engine.run_tick(&plan, &mut state, &logger, false).await;
        assert_eq!(second.executed, vec!["hot"]);
        assert_eq!(second.skipped, vec!["broken"]);

        let warnings: Vec<LogEntry> = stored(&logger, &logs)
            .await
            .into_iter()
            .filter(|e| e.level == LogLevel::Warn)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].node_id.as_deref(), Some("broken"));
    }

    #[tokio::test]
    async fn disabled_logging_keeps_only_errors_and_records_outputs() {
        let mut definition: Flow = serde_json::from_value(json!({
            "id": "f1", "name": "f1",
            "nodes": [
                { "id": "n1", "node_type": "constant", "config": { "value": 1 } },
                { "id": "n2", "node_type": "fail" }
            ]
        }))
        .unwrap();
        definition.logs_enabled = false;
        let flow = Arc::new(definition);
        let plan = ExecutionPlan::build(flow.clone()).unwrap();
        let (logger, logs) = logger(&flow).await;

        engine().run_tick(&plan, &mut ScanState::new(), &logger, true).await;

        let entries = stored(&logger, &logs).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Error);
    }

    #[tokio::test]
    async fn record_outputs_logs_debug_entries() {
        let flow = flow(json!({
            "id": "f1", "name": "f1",
            "nodes": [{ "id": "n1", "node_type": "constant", "config": { "value": "on" } }]
        }));
        let plan = ExecutionPlan::build(flow.clone()).unwrap();
        let (logger, logs) = logger(&flow).await;

        engine().run_tick(&plan, &mut ScanState::new(), &logger, true).await;

        let entries = stored(&logger, &logs).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Debug);
        assert_eq!(entries[0].metadata, Some(json!({ "out": { "value": "on", "quality": 0 } })));
    }
}
