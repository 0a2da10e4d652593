//! Mapped entity and history-tracking capability traits.

use std::any::Any;
use std::fmt;

use registry_types::Operation;
use rusqlite::Connection;
use serde_json::Value;

use crate::error::HistoryError;
use crate::history::HistoryWriter;

/// Downcasting support for trait objects.
pub trait AsAny: Any {
    /// Borrows `self` as `dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// Mutably borrows `self` as `dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A row-mapped type the [`Session`](crate::Session) can write.
pub trait Entity: AsAny + fmt::Debug + Send {
    /// Stable name used in history rows, e.g. `business`.
    fn entity_name(&self) -> &'static str;

    /// Storage-assigned key. `None` until the entity has been inserted.
    fn primary_key(&self) -> Option<i64>;

    /// Inserts the row and records the assigned primary key on `self`.
    fn insert(&mut self, conn: &Connection) -> rusqlite::Result<()>;

    /// Writes the current state over the existing row.
    fn update(&self, conn: &Connection) -> rusqlite::Result<()>;

    /// Removes the row.
    fn delete(&self, conn: &Connection) -> rusqlite::Result<()>;

    /// Returns the history-tracking capability when the type has one.
    fn versioned(&self) -> Option<&dyn Versioned> {
        None
    }
}

/// Capability of entities whose changes are recorded as history rows.
///
/// Types opt in by implementing this trait and returning `Some(self)` from
/// [`Entity::versioned`].
pub trait Versioned: Entity {
    /// Identifier the entity owns before it is written, so the new engine
    /// can form history rows ahead of the flush.
    fn version_key(&self) -> String;

    /// Serialisable view of the current state.
    fn snapshot(&self) -> Result<Value, serde_json::Error>;

    /// Captures this object's state into the pending transaction.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError` when the row cannot be written. The caller
    /// logs it and moves on to the next object.
    fn capture_history(
        &self,
        writer: &HistoryWriter<'_>,
        operation: Operation,
    ) -> Result<(), HistoryError> {
        let snapshot = self.snapshot()?;
        writer.record(self.entity_name(), &self.version_key(), operation, &snapshot)?;
        Ok(())
    }
}
