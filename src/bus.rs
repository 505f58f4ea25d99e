/// Live update bus
///
/// One broadcast topic per flow carrying execution log entries, configuration
/// change notices and session state changes. Delivery is best-effort: nothing is
/// persisted and slow subscribers lose the oldest events.

use crate::error::BusError;
use crate::runtime::log_sink::LogEntry;
use crate::runtime::session::SessionState;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{broadcast, RwLock};

/// Events fanned out on a flow's topic
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LiveEvent {
    Log(LogEntry),
    ConfigChanged { flow_id: String },
    SessionStatus { flow_id: String, state: SessionState },
}

/// Per-flow publish/subscribe fan-out
#[derive(Debug, Clone)]
pub struct LiveBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<LiveEvent>>>>,
    capacity: usize,
}

impl LiveBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Subscribe to a flow's topic, creating it on first use
    pub async fn subscribe(&self, flow_id: &str) -> broadcast::Receiver<LiveEvent> {
        {
            let topics = self.topics.read().await;
            if let Some(sender) = topics.get(flow_id) {
                return sender.subscribe();
            }
        }

        let mut topics = self.topics.write().await;
        topics
            .entry(flow_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish an event on a flow's topic, returning how many subscribers got it
    pub async fn publish(&self, flow_id: &str, event: LiveEvent) -> Result<usize, BusError> {
        let topics = self.topics.read().await;
        let sender = topics
            .get(flow_id)
            .ok_or_else(|| BusError::NoSubscribers(flow_id.to_string()))?;

        sender
            .send(event)
            .map_err(|_| BusError::NoSubscribers(flow_id.to_string()))
    }

    /// Drop topics whose subscribers have all gone away
    pub async fn prune(&self) -> usize {
        let mut topics = self.topics.write().await;
        let before = topics.len();
        topics.retain(|_, sender| sender.receiver_count() > 0);
        before - topics.len()
    }
}

impl Default for LiveBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
