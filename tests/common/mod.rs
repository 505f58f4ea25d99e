//! Common test utilities for integration tests.

#![allow(dead_code)]

use scanflow::{
    config::Config,
    database::Database,
    flow::{storage::FlowStorage, types::Flow},
    runtime::{
        executor::{NodeExecutor, NodeFuture, NodeHandler, NodeOutput},
        session::{SessionManager, SessionState},
    },
    server::Services,
    Node, PortValue,
};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc, time::Duration};

/// Always fails with a device error.
pub struct FailingNode;

impl NodeHandler for FailingNode {
    fn node_type(&self) -> &str {
        "fail"
    }

    fn execute<'a>(&'a self, _node: &'a Node, _inputs: &'a BTreeMap<String, PortValue>) -> NodeFuture<'a> {
        Box::pin(async { Err(anyhow::anyhow!("device offline")) })
    }
}

/// Sleeps for `config.delay_ms` before passing `in` through to `out`.
pub struct SlowNode;

impl NodeHandler for SlowNode {
    fn node_type(&self) -> &str {
        "slow"
    }

    fn execute<'a>(&'a self, node: &'a Node, inputs: &'a BTreeMap<String, PortValue>) -> NodeFuture<'a> {
        Box::pin(async move {
            let delay = node.config.get("delay_ms").and_then(Value::as_u64).unwrap_or(50);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let value = inputs.get("in").map(|input| input.value.clone()).unwrap_or(Value::Null);
            Ok(NodeOutput::new().with_port("out", value))
        })
    }
}

/// Panics, which breaks the scan cycle itself.
pub struct PanickingNode;

impl NodeHandler for PanickingNode {
    fn node_type(&self) -> &str {
        "panic"
    }

    fn execute<'a>(&'a self, _node: &'a Node, _inputs: &'a BTreeMap<String, PortValue>) -> NodeFuture<'a> {
        Box::pin(async { panic!("driver crashed") })
    }
}

/// Built-in handlers plus the test handlers above.
pub fn test_executor() -> NodeExecutor {
    let mut executor = NodeExecutor::with_builtins();
    executor.register(Arc::new(FailingNode));
    executor.register(Arc::new(SlowNode));
    executor.register(Arc::new(PanickingNode));
    executor
}

/// Configuration with short timers for tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.engine.log_batch_size = 50;
    config.engine.log_flush_delay_ms = 10;
    config.engine.bootstrap_delay_ms = 0;
    config.engine.worker_poll_interval_ms = 10;
    config.engine.default_scan_rate_ms = 50;
    config
}

/// Fully wired services over a private in-memory database.
pub async fn test_services() -> Services {
    let database = Database::in_memory().await.unwrap();
    Services::init(&test_config(), database, test_executor()).await.unwrap()
}

/// Persist a flow and load it into the registry.
pub async fn save_flow(services: &Services, definition: Value) -> Flow {
    let flow: Flow = serde_json::from_value(definition).unwrap();
    FlowStorage::new(services.database.pool().clone())
        .save_flow(&flow)
        .await
        .unwrap();
    services.registry.reload_flow(&flow.id).await.unwrap();
    flow
}

/// Wait until the flow has no active session.
pub async fn wait_until_stopped(sessions: &SessionManager, flow_id: &str) {
    for _ in 0..500 {
        if !sessions.is_running(flow_id).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session for {flow_id} did not stop");
}

/// Wait until the running session has completed at least `ticks` scans.
pub async fn wait_for_ticks(sessions: &SessionManager, flow_id: &str, ticks: u64) {
    for _ in 0..500 {
        let status = sessions.status(flow_id).await;
        assert_eq!(status.state, SessionState::Running, "session for {flow_id} is not running");
        if status.ticks >= ticks {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session for {flow_id} did not reach {ticks} scans");
}
