/// Job worker
///
/// Polls the work queue for `flow_execution` jobs and starts a session for each
/// one it claims. The session owns the job from then on and finishes it when it
/// stops or fails; a job whose session cannot start is failed right here.

use crate::{
    error::SessionError,
    queue::jobs::{Job, JobQueue, FLOW_EXECUTION},
    runtime::session::{SessionManager, StartOptions},
};
use anyhow::Result;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct JobWorker {
    queue: JobQueue,
    sessions: SessionManager,
    poll_interval: Duration,
}

impl JobWorker {
    pub fn new(queue: JobQueue, sessions: SessionManager, poll_interval: Duration) -> Self {
        Self {
            queue,
            sessions,
            poll_interval,
        }
    }

    /// Run the poll loop on its own task until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("👷 Job worker started (poll every {:?})", self.poll_interval);

        loop {
            // drain everything that is queued before sleeping again
            loop {
                match self.process_next().await {
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("❌ Job worker poll failed: {}", e);
                        break;
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::info!("👷 Job worker stopped");
    }

    /// Claim one queued job and start its session
    ///
    /// Returns the claimed job, or `None` when the queue is empty.
    pub async fn process_next(&self) -> Result<Option<Job>> {
        let Some(job) = self.queue.claim_next(FLOW_EXECUTION).await? else {
            return Ok(None);
        };

        tracing::info!("📤 Claimed job {} for flow {}", job.id, job.flow_id);
        if let Err(reason) = self.start_session(&job).await {
            tracing::warn!("⚠️ Job {} failed to start: {}", job.id, reason);
            self.queue.mark_failed(&job.id, &reason).await?;
        }

        Ok(Some(job))
    }

    async fn start_session(&self, job: &Job) -> Result<(), String> {
        let params = job.flow_params().map_err(|e| format!("invalid job params: {e}"))?;
        let options = StartOptions {
            parameters: params.parameters,
            scan_rate_ms: params.scan_rate_ms,
            job_id: Some(job.id.clone()),
        };

        match self.sessions.start(&params.flow_id, options).await {
            Ok(_) => Ok(()),
            Err(e @ SessionError::AlreadyRunning(_)) => Err(format!("duplicate execution: {e}")),
            Err(e) => Err(e.to_string()),
        }
    }
}
