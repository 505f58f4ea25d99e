/// Server setup and initialization
///
/// Wires together all components: database, flow registry, live bus, log sink,
/// node executor, session manager, work queue, worker, reconciler and retention.
/// Provides the application factory used by the binary and by tests.

use crate::{
    api::{create_control_routes, AppState},
    bus::LiveBus,
    config::Config,
    database::Database,
    flow::{registry::FlowRegistry, storage::FlowStorage},
    queue::{jobs::JobQueue, worker::JobWorker},
    runtime::{
        bootstrap::BootstrapReconciler, executor::NodeExecutor, log_sink::ExecutionLogSink,
        log_storage::LogStorage, retention::RetentionService, session::SessionManager,
    },
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Every long-lived component of a running engine
#[derive(Clone)]
pub struct Services {
    pub database: Database,
    pub registry: Arc<FlowRegistry>,
    pub bus: LiveBus,
    pub sink: ExecutionLogSink,
    pub logs: LogStorage,
    pub queue: JobQueue,
    pub sessions: SessionManager,
    pub worker: JobWorker,
    pub reconciler: BootstrapReconciler,
    pub retention: RetentionService,
}

impl Services {
    /// Build the component graph on an open database
    ///
    /// `executor` carries the node handlers available to flows.
    pub async fn init(config: &Config, database: Database, executor: NodeExecutor) -> Result<Self> {
        let pool = database.pool().clone();
        let engine = &config.engine;

        tracing::info!("📡 Initializing live update bus");
        let bus = LiveBus::default();

        tracing::info!("📊 Initializing flow registry");
        let flow_storage = FlowStorage::new(pool.clone());
        let registry = Arc::new(FlowRegistry::new(flow_storage.clone(), bus.clone()));
        registry
            .init_from_storage()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load flows from storage: {}", e))?;

        tracing::info!(
            "📝 Initializing execution log sink (batch {}, delay {}ms)",
            engine.log_batch_size,
            engine.log_flush_delay_ms
        );
        let logs = LogStorage::new(pool.clone());
        let sink = ExecutionLogSink::with_batching(
            logs.clone(),
            bus.clone(),
            engine.log_batch_size,
            Duration::from_millis(engine.log_flush_delay_ms),
        );

        tracing::info!("⚙️ Initializing session manager");
        let queue = JobQueue::new(pool);
        let sessions = SessionManager::new(
            Arc::clone(&registry),
            Arc::new(executor),
            sink.clone(),
            bus.clone(),
            queue.clone(),
            engine.default_scan_rate_ms,
        );

        let worker = JobWorker::new(
            queue.clone(),
            sessions.clone(),
            Duration::from_millis(engine.worker_poll_interval_ms.max(1)),
        );
        let reconciler = BootstrapReconciler::new(flow_storage, sessions.clone(), queue.clone());
        let retention = RetentionService::new(
            Arc::clone(&registry),
            logs.clone(),
            bus.clone(),
            Duration::from_secs(engine.retention_sweep_interval_secs.max(1)),
        );

        Ok(Self {
            database,
            registry,
            bus,
            sink,
            logs,
            queue,
            sessions,
            worker,
            reconciler,
            retention,
        })
    }

    /// HTTP router over these services
    pub fn router(&self) -> Router {
        let state = AppState {
            sessions: self.sessions.clone(),
            logs: self.logs.clone(),
            reconciler: self.reconciler.clone(),
        };

        Router::new()
            .route("/healthz", get(health_check))
            .merge(create_control_routes().with_state(state))
    }
}

/// Create the main Axum application with all routes
///
/// Opens the configured database and wires every component with the built-in
/// node handlers.
pub async fn create_app(config: Config) -> Result<(Router, Services)> {
    let database = Database::connect(&config.database.path).await?;
    let services = Services::init(&config, database, NodeExecutor::with_builtins()).await?;
    let app = services.router();

    tracing::info!("✅ Application initialized successfully");
    Ok((app, services))
}

/// Start the HTTP server and background services
///
/// Orphaned running jobs are requeued before the worker starts, reconciliation
/// runs after the settling delay, and every session is stopped on ctrl-c.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting scanflow server...");

    let (app, services) = create_app(config.clone()).await?;

    let requeued = services.queue.requeue_orphaned().await?;
    if requeued > 0 {
        tracing::info!("♻️ Requeued {} orphaned jobs", requeued);
    }

    let cancel = CancellationToken::new();
    let worker = services.worker.clone().spawn(cancel.clone());
    let retention = services.retention.clone().spawn(cancel.clone());
    services
        .reconciler
        .clone()
        .spawn_after_delay(Duration::from_millis(config.engine.bootstrap_delay_ms));

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("🛑 Shutting down");
    cancel.cancel();
    if let Err(e) = worker.await {
        tracing::warn!("⚠️ Job worker ended abnormally: {}", e);
    }
    if let Err(e) = retention.await {
        tracing::warn!("⚠️ Retention service ended abnormally: {}", e);
    }
    services.sessions.shutdown().await;
    services.sink.finalize().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
