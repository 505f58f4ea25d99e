/// Hot-reload flow definition registry using ArcSwap
///
/// Provides lock-free reads of flow definitions for session start and atomic
/// whole-map swaps on reload, so running sessions are never blocked by edits.
/// Reloads announce themselves on the live bus.

use crate::bus::{LiveBus, LiveEvent};
use crate::flow::{storage::FlowStorage, types::Flow};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// Lock-free flow registry for hot-reload capabilities
#[derive(Debug)]
pub struct FlowRegistry {
    /// Atomic pointer to the flow map, keyed by flow id
    flows: ArcSwap<HashMap<String, Arc<Flow>>>,

    /// Persistent storage for reload operations
    storage: FlowStorage,

    /// Bus used to announce configuration changes
    bus: LiveBus,
}

impl FlowRegistry {
    /// Create new registry instance with storage backend
    pub fn new(storage: FlowStorage, bus: LiveBus) -> Self {
        Self {
            flows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
            bus,
        }
    }

    /// Initialize registry by loading all flows from storage
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_all_flows().await?;
        let flows = stored
            .into_iter()
            .map(|(id, flow)| (id, Arc::new(flow)))
            .collect::<HashMap<_, _>>();

        self.flows.store(Arc::new(flows));

        tracing::info!("Initialized flow registry with {} flows", self.flows.load().len());

        Ok(())
    }

    /// Hot-reload a single flow from storage and announce the change
    ///
    /// A flow that no longer exists in storage is dropped from the registry.
    pub async fn reload_flow(&self, flow_id: &str) -> Result<Option<Arc<Flow>>> {
        let reloaded = self.storage.get_flow(flow_id).await?.map(Arc::new);

        self.flows.rcu(|current| {
            let mut next = (**current).clone();
            match &reloaded {
                Some(flow) => {
                    next.insert(flow_id.to_string(), Arc::clone(flow));
                }
                None => {
                    next.remove(flow_id);
                }
            }
            next
        });

        tracing::info!("🔥 Hot-reloaded flow: {}", flow_id);

        // Nobody listening is the common case
        let _ = self
            .bus
            .publish(flow_id, LiveEvent::ConfigChanged { flow_id: flow_id.to_string() })
            .await;

        Ok(reloaded)
    }

    /// Get a flow by ID (lock-free read)
    pub fn get_flow(&self, flow_id: &str) -> Option<Arc<Flow>> {
        self.flows.load().get(flow_id).cloned()
    }

    /// Get a flow from the registry, falling back to storage for flows created
    /// since the last reload
    pub async fn get_or_load(&self, flow_id: &str) -> Result<Option<Arc<Flow>>> {
        if let Some(flow) = self.get_flow(flow_id) {
            return Ok(Some(flow));
        }
        self.reload_flow(flow_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use serde_json::json;

    async fn registry() -> (FlowRegistry, FlowStorage, LiveBus) {
        let db = Database::in_memory().await.unwrap();
        let storage = FlowStorage::new(db.pool().clone());
        let bus = LiveBus::default();
        (FlowRegistry::new(storage.clone(), bus.clone()), storage, bus)
    }

    fn flow(id: &str, name: &str) -> Flow {
        serde_json::from_value(json!({ "id": id, "name": name })).unwrap()
    }

    #[tokio::test]
    async fn get_or_load_falls_back_to_storage() {
        let (registry, storage, _) = registry().await;
        storage.save_flow(&flow("f1", "first")).await.unwrap();

        assert!(registry.get_flow("f1").is_none());
        let loaded = registry.get_or_load("f1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "first");
        assert!(registry.get_flow("f1").is_some());
    }

    #[tokio::test]
    async fn reload_publishes_config_change() {
        let (registry, storage, bus) = registry().await;
        storage.save_flow(&flow("f1", "first")).await.unwrap();
        registry.init_from_storage().await.unwrap();
        let mut events = bus.subscribe("f1").await;

        storage.save_flow(&flow("f1", "renamed")).await.unwrap();
        registry.reload_flow("f1").await.unwrap();

        assert_eq!(registry.get_flow("f1").unwrap().name, "renamed");
        assert!(matches!(events.recv().await.unwrap(), LiveEvent::ConfigChanged { .. }));
    }

    #[tokio::test]
    async fn reload_of_deleted_flow_drops_it() {
        let (registry, storage, _) = registry().await;
        storage.save_flow(&flow("f1", "first")).await.unwrap();
        registry.init_from_storage().await.unwrap();

        storage.delete_flow("f1").await.unwrap();
        assert!(registry.reload_flow("f1").await.unwrap().is_none());
        assert!(registry.get_flow("f1").is_none());
    }
}
