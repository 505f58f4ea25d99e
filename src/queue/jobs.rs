/// SQLite-backed work queue
///
/// Job records move `queued -> running -> {completed | failed}`. A queued or
/// running `flow_execution` job for a flow is the durable signal that someone
/// is responsible for running it, which is what keeps bootstrap from enqueueing
/// duplicates.
///
/// Progress is coarse: 0 while queued, 50 once a session is running, 100 when
/// the job reaches a terminal state.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{
    sqlite::{SqlitePool, SqliteRow},
    Row,
};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Job type that starts a flow session
pub const FLOW_EXECUTION: &str = "flow_execution";

pub const PROGRESS_RUNNING: i64 = 50;
pub const PROGRESS_DONE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Queued or running
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(anyhow::anyhow!("unknown job status '{}'", other)),
        }
    }
}

/// Parameters of a `flow_execution` job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowExecutionParams {
    pub flow_id: String,
    /// Scan period override for continuous flows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_rate_ms: Option<u64>,
    /// Runtime parameter values
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

/// A work queue record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub flow_id: String,
    pub params: Value,
    pub status: JobStatus,
    pub progress: i64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Decode `params` as flow execution parameters
    pub fn flow_params(&self) -> Result<FlowExecutionParams> {
        Ok(serde_json::from_value(self.params.clone())?)
    }
}

/// Fixed-width timestamps so text ordering matches time ordering
fn now_text() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Clone)]
pub struct JobQueue {
    pool: SqlitePool,
}

impl JobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new queued job
    pub async fn enqueue(&self, job_type: &str, flow_id: &str, params: Value) -> Result<Job> {
        let id = Uuid::new_v4().to_string();
        let now = now_text();

        let row = sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, flow_id, params, status, progress, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'queued', 0, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(job_type)
        .bind(flow_id)
        .bind(params.to_string())
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        let job = job_from_row(&row)?;
        tracing::debug!("📥 Enqueued {} job {} for flow {}", job_type, job.id, flow_id);
        Ok(job)
    }

    /// Enqueue a `flow_execution` job
    pub async fn enqueue_flow_execution(&self, params: &FlowExecutionParams) -> Result<Job> {
        self.enqueue(FLOW_EXECUTION, &params.flow_id, serde_json::to_value(params)?)
            .await
    }

    /// Insert a queued job unless the flow already has a queued or running job
    /// of the same type
    ///
    /// Check and insert are one statement, so concurrent callers cannot both
    /// enqueue. Returns `None` when an active job already exists.
    pub async fn enqueue_if_idle(&self, job_type: &str, flow_id: &str, params: Value) -> Result<Option<Job>> {
        let id = Uuid::new_v4().to_string();
        let now = now_text();

        let row = sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, flow_id, params, status, progress, created_at, updated_at)
            SELECT ?, ?, ?, ?, 'queued', 0, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM jobs
                WHERE job_type = ? AND flow_id = ? AND status IN ('queued', 'running')
            )
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(job_type)
        .bind(flow_id)
        .bind(params.to_string())
        .bind(&now)
        .bind(&now)
        .bind(job_type)
        .bind(flow_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            tracing::debug!("Flow {} already has an active {} job", flow_id, job_type);
            return Ok(None);
        };
        let job = job_from_row(&row)?;
        tracing::debug!("📥 Enqueued {} job {} for flow {}", job_type, job.id, flow_id);
        Ok(Some(job))
    }

    /// Enqueue a `flow_execution` job unless one is already active for the flow
    pub async fn enqueue_flow_execution_if_idle(&self, params: &FlowExecutionParams) -> Result<Option<Job>> {
        self.enqueue_if_idle(FLOW_EXECUTION, &params.flow_id, serde_json::to_value(params)?)
            .await
    }

    /// Oldest queued or running job of `job_type` for a flow
    pub async fn find_active_for_flow(&self, job_type: &str, flow_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE job_type = ? AND flow_id = ? AND status IN ('queued', 'running')
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(job_type)
        .bind(flow_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// Atomically move the oldest queued job of `job_type` to running
    pub async fn claim_next(&self, job_type: &str) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            UPDATE jobs SET status = 'running', updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE job_type = ? AND status = 'queued'
                ORDER BY created_at ASC, rowid ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(now_text())
        .bind(job_type)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn update_progress(&self, id: &str, progress: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET progress = ?, updated_at = ? WHERE id = ?")
            .bind(progress.clamp(0, PROGRESS_DONE))
            .bind(now_text())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_completed(&self, id: &str) -> Result<()> {
        self.finish(id, JobStatus::Completed, None).await
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        self.finish(id, JobStatus::Failed, Some(error)).await
    }

    async fn finish(&self, id: &str, status: JobStatus, error: Option<&str>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = ?, progress = ?, error = ?, updated_at = ? \
             WHERE id = ? AND status IN ('queued', 'running')",
        )
        .bind(status.as_str())
        .bind(PROGRESS_DONE)
        .bind(error)
        .bind(now_text())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!("Job {} was not active, leaving it as is", id);
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// Return running jobs to the queue
    ///
    /// Called once at startup: a fresh process has no sessions, so any job still
    /// marked running lost its owner when the previous process exited.
    pub async fn requeue_orphaned(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'queued', progress = 0, updated_at = ? WHERE status = 'running'",
        )
        .bind(now_text())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let params: String = row.get("params");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Job {
        id: row.get("id"),
        job_type: row.get("job_type"),
        flow_id: row.get("flow_id"),
        params: serde_json::from_str(&params)?,
        status: status.parse()?,
        progress: row.get("progress"),
        error: row.get("error"),
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
    })
}
