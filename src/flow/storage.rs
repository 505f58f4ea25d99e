/// SQLite persistence layer for flow definitions
///
/// Flows are stored as JSON with the fields the reconciler filters on
/// (`deployed`, `execution_mode`) mirrored into indexed columns.

use crate::flow::types::{ExecutionMode, Flow};
use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;

/// SQLite-based flow definition store
#[derive(Debug, Clone)]
pub struct FlowStorage {
    /// SQLite connection pool
    pool: SqlitePool,
}

impl FlowStorage {
    /// Create new storage instance with database connection
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a new flow or update an existing one
    ///
    /// Uses UPSERT to handle both create and update operations atomically.
    pub async fn save_flow(&self, flow: &Flow) -> Result<()> {
        let definition_json = serde_json::to_string(flow)?;

        sqlx::query(
            r#"
            INSERT INTO flows (id, name, execution_mode, deployed, definition, updated_at)
            VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                execution_mode = excluded.execution_mode,
                deployed = excluded.deployed,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&flow.id)
        .bind(&flow.name)
        .bind(flow.execution_mode.as_str())
        .bind(flow.deployed)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieve a flow by ID
    pub async fn get_flow(&self, id: &str) -> Result<Option<Flow>> {
        let row = sqlx::query("SELECT definition FROM flows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                let flow: Flow = serde_json::from_str(&definition_json)?;
                Ok(Some(flow))
            }
            None => Ok(None),
        }
    }

    /// Load all flows for registry initialization
    pub async fn load_all_flows(&self) -> Result<HashMap<String, Flow>> {
        let rows = sqlx::query("SELECT id, definition FROM flows")
            .fetch_all(&self.pool)
            .await?;

        let mut flows = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            let flow: Flow = serde_json::from_str(&definition_json)?;
            flows.insert(id, flow);
        }

        Ok(flows)
    }

    /// Deployed flows in continuous mode, ordered by id
    ///
    /// A row whose definition no longer parses is skipped with a warning so one
    /// corrupt flow cannot hide the others from reconciliation.
    pub async fn list_deployed_continuous(&self) -> Result<Vec<Flow>> {
        let rows = sqlx::query(
            "SELECT id, definition FROM flows WHERE deployed = 1 AND execution_mode = ? ORDER BY id",
        )
        .bind(ExecutionMode::Continuous.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut flows = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            match serde_json::from_str::<Flow>(&definition_json) {
                Ok(flow) => flows.push(flow),
                Err(e) => tracing::warn!("⚠️ Skipping flow {} with unreadable definition: {}", id, e),
            }
        }

        Ok(flows)
    }

    /// Delete a flow by ID
    pub async fn delete_flow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM flows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
