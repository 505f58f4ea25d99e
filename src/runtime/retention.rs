/// Periodic execution log retention
///
/// Deletes each flow's log entries older than its `logs_retention_days`.
/// Entries of flows no longer in the registry fall back to the default window.
/// Each sweep also drops live topics nobody listens to anymore.

use crate::{bus::LiveBus, flow::registry::FlowRegistry, runtime::log_storage::LogStorage};
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RETENTION_DAYS: u32 = 30;

#[derive(Clone)]
pub struct RetentionService {
    registry: Arc<FlowRegistry>,
    logs: LogStorage,
    bus: LiveBus,
    interval: Duration,
}

impl RetentionService {
    pub fn new(registry: Arc<FlowRegistry>, logs: LogStorage, bus: LiveBus, interval: Duration) -> Self {
        Self {
            registry,
            logs,
            bus,
            interval,
        }
    }

    /// Purge every flow once; returns the number of deleted entries
    pub async fn sweep(&self) -> Result<u64> {
        let now_us = Utc::now().timestamp_micros();
        let mut deleted = 0;

        for flow_id in self.logs.flows_with_logs().await? {
            let days = self
                .registry
                .get_flow(&flow_id)
                .map(|flow| flow.logs_retention_days)
                .unwrap_or(DEFAULT_RETENTION_DAYS);
            let window_us = ChronoDuration::days(i64::from(days)).num_microseconds().unwrap_or(i64::MAX);
            let cutoff_us = now_us.saturating_sub(window_us);

            match self.logs.purge_older_than(&flow_id, cutoff_us).await {
                Ok(0) => {}
                Ok(count) => {
                    tracing::info!("🧹 Purged {} log entries of flow {} (retention {} days)", count, flow_id, days);
                    deleted += count;
                }
                Err(e) => tracing::warn!("⚠️ Log retention failed for flow {}: {}", flow_id, e),
            }
        }

        let pruned = self.bus.prune().await;
        if pruned > 0 {
            tracing::debug!("Dropped {} idle live topics", pruned);
        }

        Ok(deleted)
    }

    /// Sweep every `interval` until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            tracing::error!("❌ Log retention sweep failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}
