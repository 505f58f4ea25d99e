/// Flow sessions and the session manager
///
/// A session is the single in-memory runtime instance of a running flow. It owns
/// the flow's execution plan, its input state cache and its scan timer. The
/// manager is the only place sessions are created or destroyed and it enforces
/// at most one session per flow id.
///
/// Lifecycle: `Starting -> Running -> Stopping -> Stopped`, or `Failed` when the
/// scan machinery itself breaks (a panicking scan cycle). Continuous flows scan
/// every `scan_rate_ms`; a scan that is still running when the next one is due
/// causes that next one to be skipped, never queued. Manual and test-mode flows
/// run one pass and stop themselves.

use crate::{
    bus::{LiveBus, LiveEvent},
    error::SessionError,
    flow::{
        registry::FlowRegistry,
        types::{ExecutionMode, Flow},
    },
    queue::jobs::{JobQueue, PROGRESS_RUNNING},
    runtime::{
        engine::{ExecutionEngine, ExecutionLogger, ExecutionPlan, ScanState, TickReport},
        executor::NodeExecutor,
        log_sink::{ExecutionLogSink, LogLevel},
        parameters::{ParameterInjector, ParameterValidation},
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Stopped => "stopped",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Failed => "failed",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            SessionState::Stopped => 0,
            SessionState::Starting => 1,
            SessionState::Running => 2,
            SessionState::Stopping => 3,
            SessionState::Failed => 4,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SessionState::Starting,
            2 => SessionState::Running,
            3 => SessionState::Stopping,
            4 => SessionState::Failed,
            _ => SessionState::Stopped,
        }
    }
}

/// Options for starting a session
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Runtime parameter values, validated against the flow's schema
    pub parameters: Map<String, Value>,
    /// Overrides the flow's `scan_rate_ms`
    pub scan_rate_ms: Option<u64>,
    /// Work-queue job that owns this run, completed or failed with it
    pub job_id: Option<String>,
}

/// Point-in-time view of a flow's execution state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub flow_id: String,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_mode: Option<ExecutionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_rate_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub ticks: u64,
    pub skipped_ticks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SessionStatus {
    fn never_started(flow_id: &str) -> Self {
        Self {
            flow_id: flow_id.to_string(),
            state: SessionState::Stopped,
            execution_id: None,
            execution_mode: None,
            scan_rate_ms: None,
            started_at: None,
            ticks: 0,
            skipped_ticks: 0,
            last_error: None,
        }
    }
}

/// Result of asking a session to scan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Completed(TickReport),
    /// Another scan was in flight, or the session is tearing down
    Skipped,
    /// The scan machinery broke; the session is failing
    Faulted { reason: String },
}

/// Parts of a session only a scan (or teardown) touches
#[derive(Debug)]
struct SessionRuntime {
    plan: ExecutionPlan,
    scan: ScanState,
    released: bool,
}

#[derive(Debug)]
struct FlowSession {
    flow_id: String,
    execution_id: String,
    mode: ExecutionMode,
    scan_rate: Duration,
    started_at: DateTime<Utc>,
    job_id: Option<String>,
    /// Stored definition the plan is rebuilt from when parameters change
    base: Arc<Flow>,
    logger: ExecutionLogger,
    state: AtomicU8,
    ticks: AtomicU64,
    skipped_ticks: AtomicU64,
    in_flight: AtomicBool,
    /// Fires when the session should stop scanning
    cancel: CancellationToken,
    /// Fires once teardown has completed
    stopped: CancellationToken,
    failure: Mutex<Option<String>>,
    parameters: Mutex<Map<String, Value>>,
    parameters_pending: AtomicBool,
    runtime: Mutex<SessionRuntime>,
}

/// Holds the session's reentrancy flag for the duration of one scan
struct TickGuard(Arc<FlowSession>);

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}

impl FlowSession {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    /// Claim the reentrancy flag, counting a skipped tick when it is taken
    fn try_begin_tick(self: &Arc<Self>) -> Option<TickGuard> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("⏭️ Scan for flow {} still in flight, skipping tick", self.flow_id);
            return None;
        }
        Some(TickGuard(Arc::clone(self)))
    }

    async fn status(&self) -> SessionStatus {
        SessionStatus {
            flow_id: self.flow_id.clone(),
            state: self.state(),
            execution_id: Some(self.execution_id.clone()),
            execution_mode: Some(self.mode),
            scan_rate_ms: (self.mode == ExecutionMode::Continuous).then(|| self.scan_rate.as_millis() as u64),
            started_at: Some(self.started_at),
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            last_error: self.failure.lock().await.clone(),
        }
    }
}

/// Owner of every running session in the process
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    sessions: RwLock<HashMap<String, Arc<FlowSession>>>,
    /// Terminal status of the last session of each flow
    finished: RwLock<HashMap<String, SessionStatus>>,
    registry: Arc<FlowRegistry>,
    engine: ExecutionEngine,
    sink: ExecutionLogSink,
    bus: LiveBus,
    queue: JobQueue,
    default_scan_rate: Duration,
}

impl SessionManager {
    pub fn new(
        registry: Arc<FlowRegistry>,
        executor: Arc<NodeExecutor>,
        sink: ExecutionLogSink,
        bus: LiveBus,
        queue: JobQueue,
        default_scan_rate_ms: u64,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                sessions: RwLock::new(HashMap::new()),
                finished: RwLock::new(HashMap::new()),
                registry,
                engine: ExecutionEngine::new(executor),
                sink,
                bus,
                queue,
                default_scan_rate: Duration::from_millis(default_scan_rate_ms.max(1)),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<FlowRegistry> {
        &self.inner.registry
    }

    /// Start a session for `flow_id`
    ///
    /// Fails with `AlreadyRunning` if the flow already has a session, and rejects
    /// invalid parameters or graphs before anything is registered.
    pub async fn start(&self, flow_id: &str, options: StartOptions) -> Result<SessionStatus, SessionError> {
        if self.is_running(flow_id).await {
            return Err(SessionError::AlreadyRunning(flow_id.to_string()));
        }

        let base = self
            .inner
            .registry
            .get_or_load(flow_id)
            .await?
            .ok_or_else(|| SessionError::FlowNotFound(flow_id.to_string()))?;

        let validation = ParameterInjector::validate(&base.parameters, &options.parameters);
        if !validation.valid {
            return Err(SessionError::InvalidParameters(validation.errors));
        }
        for warning in &validation.warnings {
            tracing::warn!("⚠️ Flow {}: {}", flow_id, warning);
        }

        let plan = build_plan(&base, &options.parameters)?;
        let scan_rate = options
            .scan_rate_ms
            .or(base.scan_rate_ms)
            .map(|ms| Duration::from_millis(ms.max(1)))
            .unwrap_or(self.inner.default_scan_rate);

        let execution_id = Uuid::new_v4().to_string();
        let session = Arc::new(FlowSession {
            flow_id: flow_id.to_string(),
            execution_id: execution_id.clone(),
            mode: base.execution_mode,
            scan_rate,
            started_at: Utc::now(),
            job_id: options.job_id,
            logger: ExecutionLogger::new(self.inner.sink.clone(), &execution_id, &base),
            base,
            state: AtomicU8::new(SessionState::Starting.to_u8()),
            ticks: AtomicU64::new(0),
            skipped_ticks: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            stopped: CancellationToken::new(),
            failure: Mutex::new(None),
            parameters: Mutex::new(options.parameters),
            parameters_pending: AtomicBool::new(false),
            runtime: Mutex::new(SessionRuntime {
                plan,
                scan: ScanState::new(),
                released: false,
            }),
        });

        {
            let mut sessions = self.inner.sessions.write().await;
            if sessions.contains_key(flow_id) {
                return Err(SessionError::AlreadyRunning(flow_id.to_string()));
            }
            sessions.insert(flow_id.to_string(), Arc::clone(&session));
        }
        self.publish_state(&session, SessionState::Starting).await;

        tracing::info!(
            "▶️ Started session {} for flow {} ({} mode)",
            execution_id,
            flow_id,
            session.mode.as_str()
        );
        session.logger.flow(
            LogLevel::Info,
            match session.mode {
                ExecutionMode::Continuous => format!("session started, scanning every {:?}", scan_rate),
                mode => format!("session started ({} mode)", mode.as_str()),
            },
        );

        if let Some(job_id) = &session.job_id {
            if let Err(e) = self.inner.queue.update_progress(job_id, PROGRESS_RUNNING).await {
                tracing::warn!("⚠️ Failed to update progress of job {}: {}", job_id, e);
            }
        }

        session.set_state(SessionState::Running);
        self.publish_state(&session, SessionState::Running).await;

        let status = session.status().await;
        tokio::spawn(self.clone().drive(session));
        Ok(status)
    }

    /// Stop the flow's session and wait for its teardown
    ///
    /// Safe mid-scan: future scans are cancelled at once and the in-flight scan
    /// finishes before the session's logs are drained.
    pub async fn stop(&self, flow_id: &str) -> Result<SessionStatus, SessionError> {
        let session = self
            .session(flow_id)
            .await
            .ok_or_else(|| SessionError::NotRunning(flow_id.to_string()))?;

        tracing::info!("⏹️ Stopping session for flow {}", flow_id);
        session.cancel.cancel();
        session.stopped.cancelled().await;

        Ok(self.status(flow_id).await)
    }

    /// Current status, or the last terminal status once the session is gone
    pub async fn status(&self, flow_id: &str) -> SessionStatus {
        if let Some(session) = self.session(flow_id).await {
            return session.status().await;
        }

        self.inner
            .finished
            .read()
            .await
            .get(flow_id)
            .cloned()
            .unwrap_or_else(|| SessionStatus::never_started(flow_id))
    }

    /// Status of every active session, ordered by flow id
    pub async fn list(&self) -> Vec<SessionStatus> {
        let sessions: Vec<Arc<FlowSession>> = self.inner.sessions.read().await.values().cloned().collect();

        let mut statuses = Vec::with_capacity(sessions.len());
        for session in sessions {
            statuses.push(session.status().await);
        }
        statuses.sort_by(|a, b| a.flow_id.cmp(&b.flow_id));
        statuses
    }

    pub async fn is_running(&self, flow_id: &str) -> bool {
        self.inner.sessions.read().await.contains_key(flow_id)
    }

    /// Merge new parameter values into the running session
    ///
    /// The merged set is validated now and applied at the start of the next scan.
    pub async fn update_parameters(
        &self,
        flow_id: &str,
        values: Map<String, Value>,
    ) -> Result<ParameterValidation, SessionError> {
        let session = self
            .session(flow_id)
            .await
            .ok_or_else(|| SessionError::NotRunning(flow_id.to_string()))?;

        let mut parameters = session.parameters.lock().await;
        let mut merged = parameters.clone();
        merged.extend(values);

        let validation = ParameterInjector::validate(&session.base.parameters, &merged);
        if !validation.valid {
            return Err(SessionError::InvalidParameters(validation.errors));
        }

        *parameters = merged;
        session.parameters_pending.store(true, Ordering::Release);
        tracing::info!("🔧 Queued parameter override for flow {}", flow_id);
        Ok(validation)
    }

    /// Scan once now, through the same reentrancy guard as the timer
    pub async fn tick_now(&self, flow_id: &str) -> Result<TickOutcome, SessionError> {
        let session = self
            .session(flow_id)
            .await
            .ok_or_else(|| SessionError::NotRunning(flow_id.to_string()))?;

        Ok(match session.try_begin_tick() {
            Some(guard) => self.run_tick(&session, guard).await,
            None => TickOutcome::Skipped,
        })
    }

    /// Stop every session; used at process shutdown
    pub async fn shutdown(&self) -> usize {
        let flow_ids: Vec<String> = self.inner.sessions.read().await.keys().cloned().collect();
        tracing::info!("🛑 Shutting down {} sessions", flow_ids.len());

        let mut stopped = 0;
        for flow_id in flow_ids {
            match self.stop(&flow_id).await {
                Ok(_) => stopped += 1,
                Err(e) => tracing::debug!("Session for {} already gone: {}", flow_id, e),
            }
        }
        stopped
    }

    async fn session(&self, flow_id: &str) -> Option<Arc<FlowSession>> {
        self.inner.sessions.read().await.get(flow_id).cloned()
    }

    /// Session task: scan until cancelled (or once), then tear down
    async fn drive(self, session: Arc<FlowSession>) {
        match session.mode {
            ExecutionMode::Continuous => self.scan_loop(&session).await,
            ExecutionMode::Manual | ExecutionMode::TestMode => {
                if !session.cancel.is_cancelled() {
                    if let Some(guard) = session.try_begin_tick() {
                        self.run_tick(&session, guard).await;
                    }
                }
            }
        }

        self.teardown(&session).await;
    }

    async fn scan_loop(&self, session: &Arc<FlowSession>) {
        let mut interval = tokio::time::interval(session.scan_rate);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                biased;
                _ = session.cancel.cancelled() => break,
                _ = interval.tick() => {
                    let Some(guard) = session.try_begin_tick() else {
                        continue;
                    };
                    let manager = self.clone();
                    let session = Arc::clone(session);
                    in_flight = Some(tokio::spawn(async move {
                        manager.run_tick(&session, guard).await;
                    }));
                }
            }
        }

        if let Some(handle) = in_flight {
            if let Err(e) = handle.await {
                tracing::error!("❌ Scan task for flow {} ended abnormally: {}", session.flow_id, e);
            }
        }
    }

    /// Run one scan; the work runs on its own task so a panicking node fails
    /// the session instead of the caller
    async fn run_tick(&self, session: &Arc<FlowSession>, _guard: TickGuard) -> TickOutcome {
        let manager = self.clone();
        let worker = Arc::clone(session);
        let work = tokio::spawn(async move {
            let mut runtime = worker.runtime.lock().await;
            if runtime.released {
                return None;
            }
            if worker.parameters_pending.swap(false, Ordering::AcqRel) {
                manager.apply_pending_parameters(&worker, &mut runtime).await;
            }

            let record_outputs = worker.mode == ExecutionMode::TestMode;
            let SessionRuntime { plan, scan, .. } = &mut *runtime;
            Some(
                manager
                    .inner
                    .engine
                    .run_tick(plan, scan, &worker.logger, record_outputs)
                    .await,
            )
        });

        match work.await {
            Ok(Some(report)) => {
                session.ticks.fetch_add(1, Ordering::Relaxed);
                TickOutcome::Completed(report)
            }
            Ok(None) => TickOutcome::Skipped,
            Err(e) => {
                let reason = if e.is_panic() {
                    "scan cycle panicked".to_string()
                } else {
                    format!("scan cycle aborted: {e}")
                };
                self.fail(session, &reason).await;
                TickOutcome::Faulted { reason }
            }
        }
    }

    async fn apply_pending_parameters(&self, session: &FlowSession, runtime: &mut SessionRuntime) {
        let values = session.parameters.lock().await.clone();
        match build_plan(&session.base, &values) {
            Ok(plan) => {
                runtime.plan = plan;
                session.logger.flow(LogLevel::Info, "runtime parameters applied");
            }
            Err(e) => {
                session
                    .logger
                    .flow(LogLevel::Error, format!("runtime parameters not applied: {e}"));
            }
        }
    }

    /// Record a session-level failure and stop scanning
    async fn fail(&self, session: &FlowSession, reason: &str) {
        tracing::error!("❌ Session for flow {} failed: {}", session.flow_id, reason);
        session.failure.lock().await.get_or_insert_with(|| reason.to_string());
        session.cancel.cancel();
    }

    async fn teardown(&self, session: &Arc<FlowSession>) {
        session.set_state(SessionState::Stopping);
        self.publish_state(session, SessionState::Stopping).await;

        // waits for a scan that is still running
        let mut runtime = session.runtime.lock().await;
        runtime.released = true;

        let failure = session.failure.lock().await.clone();
        match &failure {
            Some(reason) => session.logger.flow(LogLevel::Error, format!("session failed: {reason}")),
            None => session.logger.flow(
                LogLevel::Info,
                format!("session stopped after {} scans", session.ticks.load(Ordering::Relaxed)),
            ),
        }
        self.inner.sink.finalize().await;
        runtime.scan.release();
        drop(runtime);

        let terminal = if failure.is_some() {
            SessionState::Failed
        } else {
            SessionState::Stopped
        };
        session.set_state(terminal);

        let status = session.status().await;
        self.inner
            .finished
            .write()
            .await
            .insert(session.flow_id.clone(), status);
        {
            let mut sessions = self.inner.sessions.write().await;
            if sessions
                .get(&session.flow_id)
                .is_some_and(|current| Arc::ptr_eq(current, session))
            {
                sessions.remove(&session.flow_id);
            }
        }
        self.publish_state(session, terminal).await;

        if let Some(job_id) = &session.job_id {
            let result = match &failure {
                Some(reason) => self.inner.queue.mark_failed(job_id, reason).await,
                None => self.inner.queue.mark_completed(job_id).await,
            };
            if let Err(e) = result {
                tracing::warn!("⚠️ Failed to finish job {}: {}", job_id, e);
            }
        }

        tracing::info!(
            "⏹️ Session {} for flow {} ended: {}",
            session.execution_id,
            session.flow_id,
            terminal.as_str()
        );
        session.stopped.cancel();
    }

    async fn publish_state(&self, session: &FlowSession, state: SessionState) {
        let event = LiveEvent::SessionStatus {
            flow_id: session.flow_id.clone(),
            state,
        };
        // nobody listening is fine
        let _ = self.inner.bus.publish(&session.flow_id, event).await;
    }
}

/// Inject parameters into a copy of `base` and compile it
fn build_plan(base: &Flow, values: &Map<String, Value>) -> Result<ExecutionPlan, SessionError> {
    let flow = ParameterInjector::apply(base, &base.parameters, values);
    ExecutionPlan::build(Arc::new(flow))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_atomic_encoding() {
        for state in [
            SessionState::Stopped,
            SessionState::Starting,
            SessionState::Running,
            SessionState::Stopping,
            SessionState::Failed,
        ] {
            assert_eq!(SessionState::from_u8(state.to_u8()), state);
        }
        assert_eq!(SessionState::from_u8(200), SessionState::Stopped);
    }

    #[test]
    fn tick_outcome_serializes_with_tag() {
        let skipped = serde_json::to_value(TickOutcome::Skipped).unwrap();
        assert_eq!(skipped, serde_json::json!({ "outcome": "skipped" }));

        let faulted = serde_json::to_value(TickOutcome::Faulted {
            reason: "scan cycle panicked".into(),
        })
        .unwrap();
        assert_eq!(faulted["outcome"], "faulted");
    }

    #[test]
    fn never_started_status_is_stopped() {
        let status = SessionStatus::never_started("f1");
        assert_eq!(status.state, SessionState::Stopped);
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({ "flow_id": "f1", "state": "stopped", "ticks": 0, "skipped_ticks": 0 })
        );
    }
}
