/// Execution log sink
///
/// Absorbs log entries from every running session without blocking node
/// execution. Entries are stamped with a strictly increasing microsecond
/// timestamp plus a sequence number, buffered, and written in bulk either when
/// the buffer reaches the batch size or after a short delay. Each flushed entry
/// is also published on the flow's live topic.
///
/// Storage and publish failures are logged and swallowed: logging never fails a
/// flow.

use crate::bus::{LiveBus, LiveEvent};
use crate::runtime::log_storage::LogStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// One execution log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub execution_id: String,
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    /// Microseconds since the Unix epoch; stamped by the sink when absent
    #[serde(default)]
    pub timestamp_us: Option<i64>,
    /// Sink-assigned total order
    #[serde(default)]
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl LogEntry {
    pub fn new(
        execution_id: impl Into<String>,
        flow_id: impl Into<String>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            flow_id: flow_id.into(),
            node_id: None,
            level,
            message: message.into(),
            timestamp_us: None,
            sequence: 0,
            metadata: None,
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Wall-clock rendering of the timestamp
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp_us.and_then(DateTime::from_timestamp_micros)
    }
}

/// Wall clock in microseconds, forced strictly increasing, plus a logical sequence
#[derive(Debug, Default)]
struct LogClock {
    last_us: AtomicI64,
    sequence: AtomicU64,
}

impl LogClock {
    fn next_timestamp(&self) -> i64 {
        let now = Utc::now().timestamp_micros();
        let previous = self
            .last_us
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }

    /// Keep later stamps ahead of a caller-supplied timestamp
    fn observe(&self, timestamp_us: i64) {
        self.last_us.fetch_max(timestamp_us, Ordering::AcqRel);
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }
}

/// Counters exposed for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub written: u64,
    pub failed: u64,
    pub pending: usize,
}

/// Shared, cheaply clonable handle to the sink
#[derive(Debug, Clone)]
pub struct ExecutionLogSink {
    inner: Arc<SinkInner>,
}

#[derive(Debug)]
struct SinkInner {
    buffer: Mutex<Vec<LogEntry>>,
    flushing: AtomicBool,
    timer_armed: AtomicBool,
    clock: LogClock,
    batch_size: usize,
    flush_delay: Duration,
    storage: LogStorage,
    bus: LiveBus,
    written: AtomicU64,
    failed: AtomicU64,
}

/// Clears the in-progress flag even if a flush future is dropped midway
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ExecutionLogSink {
    pub fn new(storage: LogStorage, bus: LiveBus) -> Self {
        Self::with_batching(storage, bus, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_DELAY)
    }

    pub fn with_batching(
        storage: LogStorage,
        bus: LiveBus,
        batch_size: usize,
        flush_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                buffer: Mutex::new(Vec::new()),
                flushing: AtomicBool::new(false),
                timer_armed: AtomicBool::new(false),
                clock: LogClock::default(),
                batch_size: batch_size.max(1),
                flush_delay,
                storage,
                bus,
                written: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.inner
            .buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stamp and buffer an entry; never blocks on storage
    ///
    /// Schedules an immediate flush at the batch size, otherwise arms the delay
    /// timer if none is pending. Outside a tokio runtime nothing is scheduled and
    /// the entry waits for the next flush or `finalize`.
    pub fn add(&self, mut entry: LogEntry) {
        let buffered = {
            let mut buffer = self.buffer();
            match entry.timestamp_us {
                Some(ts) => self.inner.clock.observe(ts),
                None => entry.timestamp_us = Some(self.inner.clock.next_timestamp()),
            }
            entry.sequence = self.inner.clock.next_sequence();
            buffer.push(entry);
            buffer.len()
        };

        if buffered >= self.inner.batch_size {
            self.spawn_flush();
        } else {
            self.arm_timer();
        }
    }

    fn spawn_flush(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let sink = self.clone();
        handle.spawn(async move {
            sink.flush().await;
        });
    }

    fn arm_timer(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if self.inner.timer_armed.swap(true, Ordering::AcqRel) {
            return;
        }
        let sink = self.clone();
        handle.spawn(async move {
            tokio::time::sleep(sink.inner.flush_delay).await;
            sink.inner.timer_armed.store(false, Ordering::Release);
            sink.flush().await;
        });
    }

    /// Write everything currently buffered; returns the number of entries written
    ///
    /// Returns 0 without touching the buffer while another flush is in progress.
    pub async fn flush(&self) -> usize {
        self.try_flush().await.unwrap_or(0)
    }

    /// `None` when another flush holds the guard
    async fn try_flush(&self) -> Option<usize> {
        if self.inner.flushing.swap(true, Ordering::AcqRel) {
            return None;
        }
        let guard = FlushGuard(&self.inner.flushing);

        let batch = std::mem::take(&mut *self.buffer());
        let mut written = 0;

        if !batch.is_empty() {
            match self.inner.storage.insert_batch(&batch).await {
                Ok(count) => {
                    written = count;
                    self.inner.written.fetch_add(count as u64, Ordering::Relaxed);
                    tracing::debug!("📝 Flushed {} execution log entries", count);
                }
                Err(e) => {
                    self.inner.failed.fetch_add(batch.len() as u64, Ordering::Relaxed);
                    tracing::error!(
                        "❌ Failed to persist {} execution log entries: {}",
                        batch.len(),
                        e
                    );
                }
            }

            for entry in batch {
                let flow_id = entry.flow_id.clone();
                if let Err(e) = self.inner.bus.publish(&flow_id, LiveEvent::Log(entry)).await {
                    tracing::trace!("Live log publish skipped: {}", e);
                }
            }
        }

        drop(guard);

        // Entries added while this flush held the guard
        if !self.buffer().is_empty() {
            self.arm_timer();
        }

        Some(written)
    }

    /// Drain every entry buffered before this call
    ///
    /// Waits out a concurrent flush rather than skipping it, so on return all
    /// earlier entries are in storage (or reported as failed).
    pub async fn finalize(&self) {
        let mark = self.inner.clock.current_sequence();
        loop {
            match self.try_flush().await {
                Some(_) => {
                    let remaining = self
                        .buffer()
                        .first()
                        .is_some_and(|entry| entry.sequence <= mark);
                    if !remaining {
                        return;
                    }
                }
                None => tokio::time::sleep(Duration::from_millis(1)).await,
            }
        }
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            written: self.inner.written.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            pending: self.buffer().len(),
        }
    }
}
