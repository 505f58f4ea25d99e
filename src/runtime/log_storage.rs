/// SQLite persistence for execution log entries
///
/// Entries are written in bulk by the log sink and read back in
/// `(timestamp_us, sequence)` order, which is the sink's stamping order.

use crate::runtime::log_sink::{LogEntry, LogLevel};
use anyhow::Result;
use sqlx::{
    sqlite::{Sqlite, SqlitePool, SqliteRow},
    QueryBuilder, Row,
};

/// Rows per INSERT statement; keeps bind counts far below SQLite's limit
const ROWS_PER_STATEMENT: usize = 100;

#[derive(Debug, Clone)]
pub struct LogStorage {
    pool: SqlitePool,
}

impl LogStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Write all entries in one transaction
    pub async fn insert_batch(&self, entries: &[LogEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for chunk in entries.chunks(ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO execution_logs \
                 (execution_id, flow_id, node_id, level, message, timestamp_us, sequence, metadata) ",
            );
            builder.push_values(chunk, |mut row, entry| {
                row.push_bind(entry.execution_id.clone())
                    .push_bind(entry.flow_id.clone())
                    .push_bind(entry.node_id.clone())
                    .push_bind(entry.level.as_str())
                    .push_bind(entry.message.clone())
                    .push_bind(entry.timestamp_us.unwrap_or_default())
                    .push_bind(entry.sequence as i64)
                    .push_bind(entry.metadata.as_ref().map(|m| m.to_string()));
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        Ok(entries.len())
    }

    /// The newest `limit` entries of a flow, oldest first
    pub async fn fetch_for_flow(&self, flow_id: &str, limit: i64) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT execution_id, flow_id, node_id, level, message, timestamp_us, sequence, metadata
                FROM execution_logs
                WHERE flow_id = ?
                ORDER BY timestamp_us DESC, sequence DESC
                LIMIT ?
            )
            ORDER BY timestamp_us ASC, sequence ASC
            "#,
        )
        .bind(flow_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Every entry of one session run, oldest first
    pub async fn fetch_for_execution(&self, execution_id: &str) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT execution_id, flow_id, node_id, level, message, timestamp_us, sequence, metadata
            FROM execution_logs
            WHERE execution_id = ?
            ORDER BY timestamp_us ASC, sequence ASC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Delete a flow's entries stamped before `cutoff_us`
    pub async fn purge_older_than(&self, flow_id: &str, cutoff_us: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM execution_logs WHERE flow_id = ? AND timestamp_us < ?")
            .bind(flow_id)
            .bind(cutoff_us)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Flow ids that currently have stored entries
    pub async fn flows_with_logs(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT flow_id FROM execution_logs")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("flow_id")).collect())
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<LogEntry> {
    let level: String = row.get("level");
    let metadata: Option<String> = row.get("metadata");
    let sequence: i64 = row.get("sequence");

    Ok(LogEntry {
        execution_id: row.get("execution_id"),
        flow_id: row.get("flow_id"),
        node_id: row.get("node_id"),
        level: level
            .parse()
            .map_err(|e: String| anyhow::anyhow!("log entry has {}", e))?,
        message: row.get("message"),
        timestamp_us: Some(row.get("timestamp_us")),
        sequence: sequence as u64,
        metadata: metadata.map(|raw| serde_json::from_str(&raw)).transpose()?,
    })
}
