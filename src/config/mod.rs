/// Configuration management for the scanflow engine
///
/// Handles server binding, database location, and the runtime knobs of the
/// execution engine (log batching, bootstrap settling, worker polling).

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Execution engine configuration
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding flows, jobs and execution logs (default: "data/scanflow.db")
    pub path: String,
}

/// Runtime knobs for sessions, the log sink and background services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Buffered log entries that force an immediate flush
    pub log_batch_size: usize,
    /// Upper bound a buffered log entry waits before being flushed
    pub log_flush_delay_ms: u64,
    /// Settling delay before the startup reconciliation pass
    pub bootstrap_delay_ms: u64,
    /// How often the job worker polls the queue
    pub worker_poll_interval_ms: u64,
    /// How often execution log retention is enforced
    pub retention_sweep_interval_secs: u64,
    /// Scan rate used for continuous flows that declare none
    pub default_scan_rate_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_batch_size: env_or("SCANFLOW_LOG_BATCH_SIZE", 50),
            log_flush_delay_ms: env_or("SCANFLOW_LOG_FLUSH_DELAY_MS", 100),
            bootstrap_delay_ms: env_or("SCANFLOW_BOOTSTRAP_DELAY_MS", 5_000),
            worker_poll_interval_ms: env_or("SCANFLOW_WORKER_POLL_MS", 500),
            retention_sweep_interval_secs: env_or("SCANFLOW_RETENTION_SWEEP_SECS", 3_600),
            default_scan_rate_ms: env_or("SCANFLOW_DEFAULT_SCAN_RATE_MS", 1_000),
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("SCANFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("SCANFLOW_PORT", 3010),
            },
            database: DatabaseConfig {
                path: std::env::var("SCANFLOW_DATABASE")
                    .unwrap_or_else(|_| "data/scanflow.db".to_string()),
            },
            engine: EngineConfig::default(),
        }
    }
}

/// Read and parse an environment variable, falling back on absence or parse failure
fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(fallback)
}
