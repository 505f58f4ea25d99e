/// Bootstrap reconciliation
///
/// After a restart, makes sure every deployed continuous flow has exactly one
/// execution path. A flow is skipped when this process already runs it or when
/// the work queue already holds a queued or running job for it; otherwise a new
/// `flow_execution` job is enqueued for the worker with a conditional insert,
/// so overlapping passes enqueue at most one job per flow. Failures are per
/// flow and never stop the pass.

use crate::{
    flow::{storage::FlowStorage, types::Flow},
    queue::jobs::{FlowExecutionParams, JobQueue, FLOW_EXECUTION},
    runtime::session::SessionManager,
};
use anyhow::Result;
use serde::Serialize;
use std::{fmt, time::Duration};
use tokio::task::JoinHandle;

/// Outcome of one reconciliation pass
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Flows a new job was enqueued for, with the job id
    pub enqueued: Vec<(String, String)>,
    /// Flows with a session in this process
    pub already_running: Vec<String>,
    /// Flows with an active job, with the job id
    pub already_queued: Vec<(String, String)>,
    /// Flows that could not be reconciled, with the reason
    pub failed: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_processed(&self) -> usize {
        self.enqueued.len() + self.already_running.len() + self.already_queued.len() + self.failed.len()
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReconcileReport {{ enqueued: {}, already_running: {}, already_queued: {}, failed: {} }}",
            self.enqueued.len(),
            self.already_running.len(),
            self.already_queued.len(),
            self.failed.len()
        )
    }
}

enum FlowAction {
    Enqueued(String),
    Running,
    Queued(String),
}

#[derive(Clone)]
pub struct BootstrapReconciler {
    storage: FlowStorage,
    sessions: SessionManager,
    queue: JobQueue,
}

impl BootstrapReconciler {
    pub fn new(storage: FlowStorage, sessions: SessionManager, queue: JobQueue) -> Self {
        Self {
            storage,
            sessions,
            queue,
        }
    }

    /// One pass over every deployed continuous flow
    ///
    /// Only the flow listing itself can fail the pass.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let flows: Vec<Flow> = self
            .storage
            .list_deployed_continuous()
            .await?
            .into_iter()
            .filter(Flow::wants_continuous_session)
            .collect();
        tracing::info!("🔁 Reconciling {} deployed continuous flows", flows.len());

        let mut report = ReconcileReport::new();
        for flow in &flows {
            match self.reconcile_flow(flow).await {
                Ok(FlowAction::Enqueued(job_id)) => {
                    tracing::info!("📥 Enqueued job {} for flow {}", job_id, flow.id);
                    report.enqueued.push((flow.id.clone(), job_id));
                }
                Ok(FlowAction::Running) => {
                    tracing::debug!("Flow {} already has a session", flow.id);
                    report.already_running.push(flow.id.clone());
                }
                Ok(FlowAction::Queued(job_id)) => {
                    tracing::debug!("Flow {} already has active job {}", flow.id, job_id);
                    report.already_queued.push((flow.id.clone(), job_id));
                }
                Err(e) => {
                    tracing::error!("❌ Failed to reconcile flow {}: {}", flow.id, e);
                    report.failed.push((flow.id.clone(), e.to_string()));
                }
            }
        }

        tracing::info!("✅ Reconciliation finished: {}", report);
        Ok(report)
    }

    async fn reconcile_flow(&self, flow: &Flow) -> Result<FlowAction> {
        if self.sessions.is_running(&flow.id).await {
            return Ok(FlowAction::Running);
        }

        if let Some(job) = self.queue.find_active_for_flow(FLOW_EXECUTION, &flow.id).await? {
            return Ok(FlowAction::Queued(job.id));
        }

        let params = FlowExecutionParams {
            flow_id: flow.id.clone(),
            scan_rate_ms: flow.scan_rate_ms,
            ..Default::default()
        };
        if let Some(job) = self.queue.enqueue_flow_execution_if_idle(&params).await? {
            return Ok(FlowAction::Enqueued(job.id));
        }

        // another pass enqueued between the lookup and the insert
        self.queue
            .find_active_for_flow(FLOW_EXECUTION, &flow.id)
            .await?
            .map(|job| FlowAction::Queued(job.id))
            .ok_or_else(|| anyhow::anyhow!("active job for flow {} finished during reconciliation", flow.id))
    }

    /// Run one pass after `delay`, giving collaborators time to come up
    pub fn spawn_after_delay(self, delay: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = self.reconcile().await {
                tracing::error!("❌ Bootstrap reconciliation failed: {}", e);
            }
        })
    }
}
