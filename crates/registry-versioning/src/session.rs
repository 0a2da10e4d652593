//! A minimal unit-of-work session over one SQLite connection.
//!
//! The session tracks added, modified and deleted objects and turns them
//! into row writes when flushed. The storage transaction is opened lazily
//! by the first flush and ends with [`Session::commit_storage`] or
//! [`Session::rollback`]. The session knows nothing about history; see
//! [`VersionedSession`](crate::VersionedSession) for that.

use std::fmt;
use std::ops::Deref;

use registry_types::Operation;
use rusqlite::Connection;

use crate::entity::Entity;
use crate::error::SessionError;

/// Identifies an object tracked by a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(usize);

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectState {
    /// Added, not yet inserted.
    Pending,
    /// Row exists in storage.
    Persistent,
    /// Marked for deletion, not yet flushed.
    Deleted,
    /// Deletion flushed; dropped from the session on commit.
    Removed,
}

#[derive(Debug)]
struct Slot {
    entity: Box<dyn Entity>,
    state: ObjectState,
    dirty: bool,
}

impl Slot {
    fn pending_operation(&self) -> Option<Operation> {
        match self.state {
            ObjectState::Pending => Some(Operation::Insert),
            ObjectState::Persistent if self.dirty => Some(Operation::Update),
            ObjectState::Deleted => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// An object with an unflushed change.
#[derive(Debug)]
pub struct PendingChange<'s> {
    /// The tracked object's handle.
    pub handle: EntityHandle,
    /// What the next flush will do to it.
    pub operation: Operation,
    /// The object itself.
    pub entity: &'s dyn Entity,
}

/// A change written by [`Session::flush`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedChange {
    /// The tracked object's handle.
    pub handle: EntityHandle,
    /// What was written.
    pub operation: Operation,
    /// Entity name of the object.
    pub entity_name: &'static str,
    /// Primary key after the write.
    pub primary_key: Option<i64>,
}

/// Unit-of-work session over a connection `C`.
///
/// `C` is anything that dereferences to a [`Connection`]: a pooled
/// connection, a `Box<Connection>`, or a plain `&Connection`.
///
/// Dropping a session with its storage transaction still open rolls the
/// transaction back, so the connection goes back to autocommit.
pub struct Session<C: Deref<Target = Connection>> {
    conn: C,
    slots: Vec<Option<Slot>>,
}

impl<C: Deref<Target = Connection>> Session<C> {
    /// Creates an empty session.
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            slots: Vec::new(),
        }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn track(&mut self, entity: Box<dyn Entity>, state: ObjectState) -> EntityHandle {
        let handle = EntityHandle(self.slots.len());
        self.slots.push(Some(Slot {
            entity,
            state,
            dirty: false,
        }));
        handle
    }

    /// Tracks a new object; the next flush inserts it.
    pub fn add<E: Entity>(&mut self, entity: E) -> EntityHandle {
        self.track(Box::new(entity), ObjectState::Pending)
    }

    /// Tracks an object loaded from storage; it is written again only once
    /// modified.
    pub fn attach<E: Entity>(&mut self, entity: E) -> EntityHandle {
        self.track(Box::new(entity), ObjectState::Persistent)
    }

    fn slot(&self, handle: EntityHandle) -> Result<&Slot, SessionError> {
        self.slots
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or(SessionError::UnknownEntity(handle))
    }

    fn slot_mut(&mut self, handle: EntityHandle) -> Result<&mut Slot, SessionError> {
        self.slots
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(SessionError::UnknownEntity(handle))
    }

    /// The tracked object as a trait object.
    pub fn entity(&self, handle: EntityHandle) -> Option<&dyn Entity> {
        self.slot(handle).ok().map(|slot| &*slot.entity)
    }

    /// Borrows a tracked object as its concrete type.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::UnknownEntity` for an unknown handle and
    /// `SessionError::WrongEntityType` when `E` does not match.
    pub fn get<E: Entity>(&self, handle: EntityHandle) -> Result<&E, SessionError> {
        let entity: &dyn Entity = &*self.slot(handle)?.entity;
        entity
            .as_any()
            .downcast_ref::<E>()
            .ok_or(SessionError::WrongEntityType {
                handle,
                actual: entity.entity_name(),
            })
    }

    /// Mutates a tracked object and marks it for update.
    ///
    /// # Errors
    ///
    /// As [`Session::get`], plus `SessionError::Deleted` for objects marked
    /// for deletion.
    pub fn modify<E: Entity, R>(
        &mut self,
        handle: EntityHandle,
        f: impl FnOnce(&mut E) -> R,
    ) -> Result<R, SessionError> {
        let slot = self.slot_mut(handle)?;
        if matches!(slot.state, ObjectState::Deleted | ObjectState::Removed) {
            return Err(SessionError::Deleted(handle));
        }

        // Deref the box so the downcast targets the entity, not the `Box`.
        let entity: &mut dyn Entity = &mut *slot.entity;
        let actual = entity.entity_name();
        let entity = entity
            .as_any_mut()
            .downcast_mut::<E>()
            .ok_or(SessionError::WrongEntityType { handle, actual })?;
        let result = f(entity);

        if slot.state == ObjectState::Persistent {
            slot.dirty = true;
        }
        Ok(result)
    }

    /// Marks a tracked object for deletion.
    ///
    /// Objects that were never inserted are simply forgotten.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::UnknownEntity` for an unknown handle.
    pub fn delete(&mut self, handle: EntityHandle) -> Result<(), SessionError> {
        match self.slot(handle)?.state {
            ObjectState::Pending => self.slots[handle.0] = None,
            ObjectState::Persistent => self.slot_mut(handle)?.state = ObjectState::Deleted,
            ObjectState::Deleted | ObjectState::Removed => {}
        }
        Ok(())
    }

    /// Objects the next flush will write, in the order they were tracked.
    pub fn changes(&self) -> Vec<PendingChange<'_>> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                let slot = slot.as_ref()?;
                Some(PendingChange {
                    handle: EntityHandle(idx),
                    operation: slot.pending_operation()?,
                    entity: &*slot.entity,
                })
            })
            .collect()
    }

    /// Whether any tracked object has an unflushed change.
    pub fn has_changes(&self) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|slot| slot.pending_operation().is_some())
    }

    /// Number of objects currently tracked.
    pub fn tracked(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Whether a storage transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Opens the storage transaction if none is open.
    pub fn begin(&mut self) -> rusqlite::Result<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    /// Writes every pending change, in tracking order.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Database` on the first failed write. Writes
    /// already issued stay inside the open storage transaction; the caller
    /// is expected to roll back.
    pub fn flush(&mut self) -> Result<Vec<FlushedChange>, SessionError> {
        let pending: Vec<(usize, Operation)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| Some((idx, slot.as_ref()?.pending_operation()?)))
            .collect();

        if pending.is_empty() {
            return Ok(Vec::new());
        }

        self.begin()?;

        let conn: &Connection = &self.conn;
        let mut flushed = Vec::with_capacity(pending.len());
        for (idx, operation) in pending {
            let Some(slot) = self.slots[idx].as_mut() else {
                continue;
            };

            match operation {
                Operation::Insert => {
                    slot.entity.insert(conn)?;
                    slot.state = ObjectState::Persistent;
                }
                Operation::Update => slot.entity.update(conn)?,
                Operation::Delete => {
                    slot.entity.delete(conn)?;
                    slot.state = ObjectState::Removed;
                }
            }
            slot.dirty = false;

            flushed.push(FlushedChange {
                handle: EntityHandle(idx),
                operation,
                entity_name: slot.entity.entity_name(),
                primary_key: slot.entity.primary_key(),
            });
        }

        tracing::debug!(writes = flushed.len(), "flushed session");
        Ok(flushed)
    }

    /// Commits the storage transaction without flushing first.
    ///
    /// Objects whose deletion was flushed stop being tracked.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Database` if `COMMIT` fails; the storage
    /// transaction is then still open and must be rolled back.
    pub fn commit_storage(&mut self) -> Result<(), SessionError> {
        if self.in_transaction() {
            self.conn.execute_batch("COMMIT")?;
        }

        for slot in &mut self.slots {
            if matches!(slot, Some(s) if s.state == ObjectState::Removed) {
                *slot = None;
            }
        }
        Ok(())
    }

    /// Flushes, then commits.
    ///
    /// # Errors
    ///
    /// Returns the first write or commit failure.
    pub fn commit(&mut self) -> Result<(), SessionError> {
        self.flush()?;
        self.commit_storage()
    }

    /// Rolls back the storage transaction and stops tracking every object.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Database` if `ROLLBACK` fails. Objects are
    /// forgotten either way.
    pub fn rollback(&mut self) -> Result<(), SessionError> {
        let result = if self.in_transaction() {
            self.conn.execute_batch("ROLLBACK")
        } else {
            Ok(())
        };
        self.slots.clear();
        result.map_err(SessionError::from)
    }
}

impl<C: Deref<Target = Connection>> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl<C: Deref<Target = Connection>> Drop for Session<C> {
    fn drop(&mut self) {
        if !self.in_transaction() {
            return;
        }
        match self.conn.execute_batch("ROLLBACK") {
            Ok(()) => tracing::debug!(
                tracked = self.tracked(),
                "rolled back storage transaction of dropped session"
            ),
            Err(e) => tracing::warn!(
                error = %e,
                "failed to roll back storage transaction of dropped session"
            ),
        }
    }
}
