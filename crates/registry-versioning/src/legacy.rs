//! Adapter around the legacy unit-of-work history engine.
//!
//! The legacy engine keeps one [`UnitOfWork`] per session in a registry
//! shared by every session in the process. Before a flush it only notes
//! which versioned objects changed; after the flush, once primary keys
//! exist, it writes one `entity_versions` row per object and closes the
//! object's previous version by stamping its `end_transaction_id`.
//!
//! The registry is constructed explicitly and handed to each session.
//! Sessions touch only their own entry, apart from the eviction sweep in
//! [`LegacyEngine::clear`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use registry_types::Operation;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use crate::session::{EntityHandle, PendingChange, Session};
use crate::transaction::{create_transaction, Transaction};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Key of a unit-of-work entry in the legacy registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UowKey {
    /// A versioned session.
    Session(u64),
    /// A low-level connection registered on behalf of a session.
    Connection(u64),
    /// An engine-wide entry. Never owned by a session.
    Engine(String),
    /// Any key shape the adapter does not understand.
    Unrecognized(String),
}

impl fmt::Display for UowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session(id) => write!(f, "session:{id}"),
            Self::Connection(id) => write!(f, "connection:{id}"),
            Self::Engine(name) => write!(f, "engine:{name}"),
            Self::Unrecognized(raw) => write!(f, "unrecognized:{raw}"),
        }
    }
}

/// Identity of one session in the legacy registry.
///
/// The entry stays live while this value exists; once it is dropped the
/// entry counts as closed and any sweep may evict it.
#[derive(Debug)]
pub struct SessionIdentity {
    key: UowKey,
    token: Arc<()>,
}

impl SessionIdentity {
    /// Allocates a fresh process-unique identity.
    pub fn next() -> Self {
        Self {
            key: UowKey::Session(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)),
            token: Arc::new(()),
        }
    }

    /// The registry key of this identity.
    pub fn key(&self) -> &UowKey {
        &self.key
    }

    /// A handle that reports whether this identity is still alive.
    pub fn liveness(&self) -> Weak<()> {
        Arc::downgrade(&self.token)
    }
}

/// Per-session legacy bookkeeping.
#[derive(Debug, Default, Clone)]
pub struct UnitOfWork {
    /// Legacy transaction created by the first version write.
    pub current_transaction: Option<Transaction>,
    /// Versioned objects changed since the last after-flush pass.
    pub pending: BTreeMap<EntityHandle, Operation>,
}

impl UnitOfWork {
    /// Notes a change. A delete replaces whatever was noted; otherwise the
    /// first operation wins, so an insert stays an insert.
    pub fn record(&mut self, handle: EntityHandle, operation: Operation) {
        if operation == Operation::Delete {
            self.pending.insert(handle, operation);
        } else {
            self.pending.entry(handle).or_insert(operation);
        }
    }
}

#[derive(Debug)]
struct Entry {
    uow: UnitOfWork,
    liveness: Option<Weak<()>>,
}

impl Entry {
    fn is_closed(&self) -> bool {
        !matches!(&self.liveness, Some(weak) if weak.strong_count() > 0)
    }
}

type Registry = HashMap<UowKey, Entry>;

/// Process-wide registry of legacy units of work.
///
/// Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct LegacyEngine {
    units: Arc<Mutex<Registry>>,
}

impl LegacyEngine {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.units.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts an empty entry under `key`, replacing any existing one.
    ///
    /// `liveness` of `None` marks the entry as having no owner to outlive.
    pub fn register(&self, key: UowKey, liveness: Option<Weak<()>>) {
        self.lock().insert(
            key,
            Entry {
                uow: UnitOfWork::default(),
                liveness,
            },
        );
    }

    /// Whether an entry exists under `key`.
    pub fn contains(&self, key: &UowKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of entries in the registry.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs `f` on the unit of work of `owner`, creating it first if needed.
    pub fn unit_of_work<R>(
        &self,
        owner: &SessionIdentity,
        f: impl FnOnce(&mut UnitOfWork) -> R,
    ) -> R {
        let mut units = self.lock();
        let entry = units.entry(owner.key.clone()).or_insert_with(|| Entry {
            uow: UnitOfWork::default(),
            liveness: Some(owner.liveness()),
        });
        f(&mut entry.uow)
    }

    /// The legacy transaction of `owner`, if one has been created.
    pub fn current_transaction(&self, owner: &SessionIdentity) -> Option<Transaction> {
        self.lock()
            .get(&owner.key)
            .and_then(|entry| entry.uow.current_transaction.clone())
    }

    /// Notes the versioned objects among `changes`.
    pub fn process_before_flush(&self, owner: &SessionIdentity, changes: &[PendingChange<'_>]) {
        let noted = self.unit_of_work(owner, |uow| {
            let mut noted = 0usize;
            for change in changes.iter().filter(|c| c.entity.versioned().is_some()) {
                uow.record(change.handle, change.operation);
                noted += 1;
            }
            noted
        });
        tracing::debug!(owner = %owner.key, noted, "legacy before-flush");
    }

    /// Writes a version row for every noted object.
    ///
    /// Runs after the session's writes so primary keys are available.
    /// Failures are logged and the object is skipped; nothing is returned
    /// to the caller.
    pub fn process_after_flush<C: Deref<Target = Connection>>(
        &self,
        owner: &SessionIdentity,
        session: &Session<C>,
    ) {
        let (pending, mut transaction) = self.unit_of_work(owner, |uow| {
            (
                std::mem::take(&mut uow.pending),
                uow.current_transaction.clone(),
            )
        });
        if pending.is_empty() {
            return;
        }

        let conn = session.connection();
        let mut written = 0usize;
        for (handle, operation) in pending {
            let Some(entity) = session.entity(handle) else {
                tracing::debug!(%handle, "legacy after-flush: object no longer tracked");
                continue;
            };
            let Some(versioned) = entity.versioned() else {
                continue;
            };
            let Some(key) = entity.primary_key() else {
                tracing::warn!(
                    %handle,
                    entity = entity.entity_name(),
                    "legacy after-flush: object has no primary key, version skipped"
                );
                continue;
            };
            let snapshot = match versioned.snapshot() {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    tracing::warn!(%handle, error = %err, "legacy after-flush: snapshot failed");
                    continue;
                }
            };

            let tx_id = match &transaction {
                Some(tx) => tx.id,
                None => match create_transaction(conn) {
                    Ok(tx) => {
                        tracing::debug!(transaction_id = tx.id, owner = %owner.key, "legacy transaction created");
                        let id = tx.id;
                        transaction = Some(tx);
                        id
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "legacy after-flush: cannot create transaction");
                        break;
                    }
                },
            };

            if let Err(err) =
                write_version(conn, entity.entity_name(), key, tx_id, operation, &snapshot)
            {
                tracing::warn!(
                    %handle,
                    entity = entity.entity_name(),
                    error = %err,
                    "legacy after-flush: version write failed"
                );
                continue;
            }
            written += 1;
        }

        self.unit_of_work(owner, |uow| uow.current_transaction = transaction);
        tracing::debug!(owner = %owner.key, written, "legacy after-flush");
    }

    /// Drops the bookkeeping of `owner`, then sweeps the registry.
    ///
    /// The sweep evicts engine-wide keys, keys of unrecognised shape and
    /// keys whose owner or connection is gone. It never fails; a poisoned
    /// registry lock is recovered.
    pub fn clear(&self, owner: &SessionIdentity) {
        let mut units = self.lock();
        units.remove(&owner.key);

        units.retain(|key, entry| {
            let evict = match key {
                UowKey::Engine(_) | UowKey::Unrecognized(_) => true,
                UowKey::Session(_) | UowKey::Connection(_) => entry.is_closed(),
            };
            if evict {
                tracing::debug!(%key, "evicting stale legacy unit of work");
            }
            !evict
        });
    }

    /// Removes the entry of `owner` without sweeping.
    pub fn discard(&self, owner: &SessionIdentity) {
        if self.lock().remove(&owner.key).is_some() {
            tracing::trace!(owner = %owner.key, "legacy unit of work discarded");
        }
    }
}

fn write_version(
    conn: &Connection,
    entity_name: &str,
    entity_key: i64,
    transaction_id: i64,
    operation: Operation,
    snapshot: &Value,
) -> rusqlite::Result<()> {
    let snapshot_json = serde_json::to_string(snapshot)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    let existing: Option<(i64, u8)> = conn
        .query_row(
            "SELECT id, operation_type FROM entity_versions
             WHERE entity_name = ?1 AND entity_key = ?2 AND transaction_id = ?3",
            params![entity_name, entity_key, transaction_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    if let Some((id, code)) = existing {
        // Same transaction: fold into the existing version.
        let operation = match Operation::from_code(code) {
            Some(Operation::Insert) if operation != Operation::Delete => Operation::Insert,
            _ => operation,
        };
        conn.execute(
            "UPDATE entity_versions SET operation_type = ?1, snapshot_json = ?2 WHERE id = ?3",
            params![operation.code(), snapshot_json, id],
        )?;
        return Ok(());
    }

    conn.execute(
        "UPDATE entity_versions SET end_transaction_id = ?1
         WHERE entity_name = ?2 AND entity_key = ?3 AND end_transaction_id IS NULL",
        params![transaction_id, entity_name, entity_key],
    )?;
    conn.execute(
        "INSERT INTO entity_versions (entity_name, entity_key, transaction_id, operation_type, snapshot_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![entity_name, entity_key, transaction_id, operation.code(), snapshot_json],
    )?;
    Ok(())
}

/// A stored legacy version row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionRecord {
    pub id: i64,
    pub entity_name: String,
    pub entity_key: i64,
    pub transaction_id: i64,
    /// Transaction that superseded this version; `None` while current.
    pub end_transaction_id: Option<i64>,
    pub operation: Operation,
    pub snapshot: Value,
}

fn row_to_version(row: &Row<'_>) -> rusqlite::Result<VersionRecord> {
    let code: u8 = row.get(5)?;
    let operation = Operation::from_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            Type::Integer,
            format!("unknown operation type: {code}").into(),
        )
    })?;

    let snapshot_json: String = row.get(6)?;
    let snapshot = serde_json::from_str(&snapshot_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

    Ok(VersionRecord {
        id: row.get(0)?,
        entity_name: row.get(1)?,
        entity_key: row.get(2)?,
        transaction_id: row.get(3)?,
        end_transaction_id: row.get(4)?,
        operation,
        snapshot,
    })
}

/// Lists the versions of one entity, oldest first.
pub fn versions_for_entity(
    conn: &Connection,
    entity_name: &str,
    entity_key: i64,
) -> rusqlite::Result<Vec<VersionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, entity_name, entity_key, transaction_id, end_transaction_id, operation_type, snapshot_json
         FROM entity_versions
         WHERE entity_name = ?1 AND entity_key = ?2
         ORDER BY id",
    )?;
    let versions = stmt
        .query_map(params![entity_name, entity_key], row_to_version)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(versions)
}
