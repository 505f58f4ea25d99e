//! Integration tests for restart reconciliation.

mod common;

use common::{save_flow, test_services, wait_for_ticks};
use scanflow::{
    queue::jobs::{JobStatus, FLOW_EXECUTION},
    runtime::session::StartOptions,
};
use serde_json::json;

fn continuous(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": id,
        "execution_mode": "continuous",
        "scan_rate_ms": 1000,
        "deployed": true,
        "nodes": [{ "id": "n1", "node_type": "constant", "config": { "value": 1 } }]
    })
}

#[tokio::test]
async fn repeated_passes_enqueue_each_flow_once() {
    let services = test_services().await;
    save_flow(&services, continuous("boiler")).await;

    let first = services.reconciler.reconcile().await.unwrap();
    assert_eq!(first.enqueued.len(), 1);
    let (flow_id, job_id) = &first.enqueued[0];
    assert_eq!(flow_id, "boiler");

    let job = services.queue.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.job_type, FLOW_EXECUTION);
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.flow_params().unwrap().scan_rate_ms, Some(1000));

    let second = services.reconciler.reconcile().await.unwrap();
    assert!(second.enqueued.is_empty());
    assert_eq!(second.already_queued, vec![("boiler".to_string(), job_id.clone())]);

    // once the worker has started it, the flow counts as running
    services.worker.process_next().await.unwrap();
    let third = services.reconciler.reconcile().await.unwrap();
    assert!(third.enqueued.is_empty());
    assert_eq!(third.already_running, vec!["boiler"]);
    assert_eq!(third.total_processed(), 1);

    services.sessions.shutdown().await;
}

#[tokio::test]
async fn flows_running_in_process_are_left_alone() {
    let services = test_services().await;
    save_flow(&services, continuous("pump")).await;
    services.sessions.start("pump", StartOptions::default()).await.unwrap();
    wait_for_ticks(&services.sessions, "pump", 1).await;

    let report = services.reconciler.reconcile().await.unwrap();
    assert_eq!(report.already_running, vec!["pump"]);
    assert!(report.enqueued.is_empty());
    assert!(services
        .queue
        .find_active_for_flow(FLOW_EXECUTION, "pump")
        .await
        .unwrap()
        .is_none());

    services.sessions.stop("pump").await.unwrap();
}

#[tokio::test]
async fn only_deployed_continuous_flows_are_reconciled() {
    let services = test_services().await;
    let mut draft = continuous("draft");
    draft["deployed"] = json!(false);
    save_flow(&services, draft).await;
    let mut manual = continuous("oneshot");
    manual["execution_mode"] = json!("manual");
    save_flow(&services, manual).await;

    let report = services.reconciler.reconcile().await.unwrap();
    assert_eq!(report.total_processed(), 0);
}

#[tokio::test]
async fn one_broken_flow_does_not_stop_the_pass() {
    let services = test_services().await;
    save_flow(&services, continuous("alpha")).await;
    save_flow(&services, continuous("beta")).await;

    // an active job whose params cannot be read makes the lookup for beta fail
    sqlx::query(
        "INSERT INTO jobs (id, job_type, flow_id, params, status, progress, created_at, updated_at) \
         VALUES ('broken', ?, 'beta', 'not json', 'queued', 0, ?, ?)",
    )
    .bind(FLOW_EXECUTION)
    .bind("2026-01-01T00:00:00.000000Z")
    .bind("2026-01-01T00:00:00.000000Z")
    .execute(services.database.pool())
    .await
    .unwrap();

    let report = services.reconciler.reconcile().await.unwrap();
    assert_eq!(report.enqueued.len(), 1);
    assert_eq!(report.enqueued[0].0, "alpha");
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "beta");
    assert_eq!(report.to_string(), "ReconcileReport { enqueued: 1, already_running: 0, already_queued: 0, failed: 1 }");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_passes_enqueue_once() {
    let services = test_services().await;
    save_flow(&services, continuous("boiler")).await;

    let a = services.reconciler.clone();
    let b = services.reconciler.clone();
    let (first, second) = tokio::join!(a.reconcile(), b.reconcile());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.enqueued.len() + second.enqueued.len(), 1);
    assert_eq!(first.already_queued.len() + second.already_queued.len(), 1);
    assert!(first.failed.is_empty() && second.failed.is_empty());

    let active: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE flow_id = 'boiler' AND status IN ('queued', 'running')",
    )
    .fetch_one(services.database.pool())
    .await
    .unwrap();
    assert_eq!(active, 1);
}
