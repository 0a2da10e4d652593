//! New-engine history rows.
//!
//! History rows are written before the flush, keyed by an identifier the
//! entity owns, and all rows of one flush point at the same transaction.

use registry_types::Operation;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use serde_json::Value;

use crate::error::HistoryError;

/// Writes history rows for one pending transaction.
#[derive(Debug, Clone, Copy)]
pub struct HistoryWriter<'c> {
    conn: &'c Connection,
    transaction_id: i64,
}

impl<'c> HistoryWriter<'c> {
    /// Creates a writer bound to `transaction_id`.
    pub fn new(conn: &'c Connection, transaction_id: i64) -> Self {
        Self {
            conn,
            transaction_id,
        }
    }

    /// The transaction every row written here references.
    pub fn transaction_id(&self) -> i64 {
        self.transaction_id
    }

    /// Inserts one history row and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError` if the snapshot cannot be encoded or the row
    /// cannot be inserted.
    pub fn record(
        &self,
        entity_name: &str,
        version_key: &str,
        operation: Operation,
        snapshot: &Value,
    ) -> Result<i64, HistoryError> {
        let snapshot_json = serde_json::to_string(snapshot)?;
        let id = self.conn.query_row(
            "INSERT INTO entity_history (transaction_id, entity_name, version_key, operation, snapshot_json)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id",
            params![
                self.transaction_id,
                entity_name,
                version_key,
                operation.as_str(),
                snapshot_json
            ],
            |row| row.get(0),
        )?;

        tracing::trace!(
            transaction_id = self.transaction_id,
            entity = entity_name,
            key = version_key,
            %operation,
            "history row written"
        );
        Ok(id)
    }
}

/// A stored history row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub transaction_id: i64,
    pub entity_name: String,
    pub version_key: String,
    pub operation: Operation,
    pub snapshot: Value,
    pub captured_at: String,
}

const HISTORY_COLUMNS: &str =
    "id, transaction_id, entity_name, version_key, operation, snapshot_json, captured_at";

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    let label: String = row.get(4)?;
    let operation = Operation::from_label(&label).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            format!("unknown history operation: {label}").into(),
        )
    })?;

    let snapshot_json: String = row.get(5)?;
    let snapshot = serde_json::from_str(&snapshot_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(HistoryRecord {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        entity_name: row.get(2)?,
        version_key: row.get(3)?,
        operation,
        snapshot,
        captured_at: row.get(6)?,
    })
}

/// Lists the history rows of one transaction in write order.
pub fn history_for_transaction(
    conn: &Connection,
    transaction_id: i64,
) -> rusqlite::Result<Vec<HistoryRecord>> {
    let sql =
        format!("SELECT {HISTORY_COLUMNS} FROM entity_history WHERE transaction_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params![transaction_id], row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

/// Lists the history rows of one entity, oldest first.
pub fn history_for_entity(
    conn: &Connection,
    entity_name: &str,
    version_key: &str,
) -> rusqlite::Result<Vec<HistoryRecord>> {
    let sql = format!(
        "SELECT {HISTORY_COLUMNS} FROM entity_history
         WHERE entity_name = ?1 AND version_key = ?2
         ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params![entity_name, version_key], row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}
