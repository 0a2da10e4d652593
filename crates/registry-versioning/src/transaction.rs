//! The transaction registry.
//!
//! One row in the `"transaction"` table per logical write transaction. The
//! storage engine assigns `issued_at`; rows are never updated, and no
//! delete is offered here.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// A registered write transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    /// Row identity, assigned on insert.
    pub id: i64,
    /// Storage-assigned ISO 8601 timestamp.
    pub issued_at: String,
}

/// Inserts a new transaction row and returns it.
pub fn create_transaction(conn: &Connection) -> rusqlite::Result<Transaction> {
    conn.query_row(
        "INSERT INTO \"transaction\" DEFAULT VALUES RETURNING id, issued_at",
        [],
        |row| {
            Ok(Transaction {
                id: row.get(0)?,
                issued_at: row.get(1)?,
            })
        },
    )
}

/// Loads a transaction by id.
pub fn get_transaction(conn: &Connection, id: i64) -> rusqlite::Result<Option<Transaction>> {
    conn.query_row(
        "SELECT id, issued_at FROM \"transaction\" WHERE id = ?1",
        params![id],
        |row| {
            Ok(Transaction {
                id: row.get(0)?,
                issued_at: row.get(1)?,
            })
        },
    )
    .optional()
}

/// Holds the new engine's pending transaction for one session.
///
/// The handle is created lazily on the first versioned flush and discarded
/// when the session commits or rolls back.
#[derive(Debug, Default)]
pub struct TransactionManager {
    current: Option<Transaction>,
}

impl TransactionManager {
    /// Creates a manager with no pending transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pending transaction, creating it first if needed.
    pub fn get_or_create(&mut self, conn: &Connection) -> rusqlite::Result<Transaction> {
        if let Some(tx) = &self.current {
            return Ok(tx.clone());
        }

        let tx = create_transaction(conn)?;
        tracing::debug!(transaction_id = tx.id, "created pending transaction");
        self.current = Some(tx.clone());
        Ok(tx)
    }

    /// The pending transaction, if one exists.
    pub fn current(&self) -> Option<&Transaction> {
        self.current.as_ref()
    }

    /// Discards the pending transaction. Does nothing when none is pending.
    pub fn clear(&mut self) -> Option<Transaction> {
        self.current.take()
    }
}
