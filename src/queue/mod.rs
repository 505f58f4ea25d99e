/// Work queue layer
///
/// Durable job records that hand flow executions to a worker, and the worker
/// that turns claimed jobs into sessions.

// SQLite-backed job records with queued/running/completed/failed states
pub mod jobs;

// Polling worker that starts sessions for claimed flow_execution jobs
pub mod worker;

pub use jobs::{FlowExecutionParams, Job, JobQueue, JobStatus, FLOW_EXECUTION};
pub use worker::JobWorker;
