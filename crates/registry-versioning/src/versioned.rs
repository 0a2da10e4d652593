//! Session wrapper that routes history capture to one of two engines.
//!
//! The mode is read from the flag source when the session opens and again
//! before every flush. In new mode history rows are written ahead of the
//! flush against a pending [`Transaction`]; in old mode the
//! [`LegacyEngine`] notes changes before the flush and writes versions
//! after it. Only one engine is active per flush.

use std::ops::Deref;

use registry_types::{Operation, VersioningMode};
use rusqlite::Connection;
use serde::Serialize;

use crate::entity::Entity;
use crate::error::SessionError;
use crate::history::HistoryWriter;
use crate::legacy::{LegacyEngine, SessionIdentity};
use crate::mode::ModeSelector;
use crate::session::{EntityHandle, FlushedChange, Session};
use crate::transaction::{Transaction, TransactionManager};

/// Which engine the session is routing history to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersioningState {
    Uninitialized,
    OldActive,
    NewActive,
}

impl From<VersioningMode> for VersioningState {
    fn from(mode: VersioningMode) -> Self {
        match mode {
            VersioningMode::Old => Self::OldActive,
            VersioningMode::New => Self::NewActive,
        }
    }
}

/// Per-engine switches derived from the state and the enabled flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineOptions {
    pub new_engine: bool,
    pub legacy_engine: bool,
}

/// Outcome of the new engine's before-flush pass.
#[derive(Debug, Default)]
struct Capture {
    captured: usize,
    skipped: usize,
}

/// A [`Session`] with dual-mode history versioning.
pub struct VersionedSession<C: Deref<Target = Connection>> {
    session: Session<C>,
    selector: ModeSelector,
    legacy: LegacyEngine,
    identity: SessionIdentity,
    state: VersioningState,
    enabled: bool,
    options: EngineOptions,
    transactions: TransactionManager,
}

impl<C: Deref<Target = Connection>> VersionedSession<C> {
    /// Wraps `session` and resolves the initial mode.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Flag` if the flag source cannot answer.
    pub fn open(
        session: Session<C>,
        selector: ModeSelector,
        legacy: LegacyEngine,
    ) -> Result<Self, SessionError> {
        let mode = selector.resolve()?;
        let mut versioned = Self {
            session,
            selector,
            legacy,
            identity: SessionIdentity::next(),
            state: VersioningState::Uninitialized,
            enabled: true,
            options: EngineOptions::default(),
            transactions: TransactionManager::new(),
        };
        versioned.enable_versioning(mode);
        tracing::info!(
            owner = %versioned.identity.key(),
            service = versioned.selector.service(),
            %mode,
            "versioned session opened"
        );
        Ok(versioned)
    }

    /// Switches the session to `mode`.
    ///
    /// Entering new mode drops this session's legacy bookkeeping and leaves
    /// the pending transaction alone. Entering old mode only turns the new
    /// engine off.
    pub fn enable_versioning(&mut self, mode: VersioningMode) {
        let next = VersioningState::from(mode);
        if next != self.state {
            tracing::debug!(
                owner = %self.identity.key(),
                from = ?self.state,
                to = ?next,
                "versioning mode changed"
            );
        }
        self.state = next;

        match mode {
            VersioningMode::New => {
                self.legacy.discard(&self.identity);
                self.options = EngineOptions {
                    new_engine: self.enabled,
                    legacy_engine: false,
                };
            }
            VersioningMode::Old => {
                self.options = EngineOptions {
                    new_engine: false,
                    legacy_engine: self.enabled,
                };
            }
        }
    }

    /// Turns history capture off for the rest of the session.
    pub fn disable_versioning(&mut self) {
        self.enabled = false;
        self.options = EngineOptions::default();
        self.legacy.discard(&self.identity);
        tracing::info!(owner = %self.identity.key(), "versioning disabled");
    }

    pub fn is_new_versioning_active(&self) -> bool {
        self.enabled && self.state == VersioningState::NewActive
    }

    pub fn is_old_versioning_active(&self) -> bool {
        self.enabled && self.state == VersioningState::OldActive
    }

    pub fn state(&self) -> VersioningState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Registry identity used for this session's legacy bookkeeping.
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// The new engine's pending transaction.
    pub fn current_transaction(&self) -> Option<&Transaction> {
        self.transactions.current()
    }

    /// The transaction of the active engine.
    ///
    /// In new mode the pending transaction is created if needed. In old mode
    /// the legacy engine's transaction is returned as is; it only exists
    /// once a version has been written.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Database` if the transaction row cannot be
    /// inserted.
    pub fn get_or_create_transaction(&mut self) -> Result<Option<Transaction>, SessionError> {
        if self.is_new_versioning_active() {
            self.session.begin()?;
            let tx = self.transactions.get_or_create(self.session.connection())?;
            Ok(Some(tx))
        } else if self.is_old_versioning_active() {
            Ok(self.legacy.current_transaction(&self.identity))
        } else {
            Ok(None)
        }
    }

    pub fn connection(&self) -> &Connection {
        self.session.connection()
    }

    pub fn add<E: Entity>(&mut self, entity: E) -> EntityHandle {
        self.session.add(entity)
    }

    pub fn attach<E: Entity>(&mut self, entity: E) -> EntityHandle {
        self.session.attach(entity)
    }

    /// See [`Session::get`].
    pub fn get<E: Entity>(&self, handle: EntityHandle) -> Result<&E, SessionError> {
        self.session.get(handle)
    }

    /// See [`Session::modify`].
    pub fn modify<E: Entity, R>(
        &mut self,
        handle: EntityHandle,
        f: impl FnOnce(&mut E) -> R,
    ) -> Result<R, SessionError> {
        self.session.modify(handle, f)
    }

    /// See [`Session::delete`].
    pub fn delete(&mut self, handle: EntityHandle) -> Result<(), SessionError> {
        self.session.delete(handle)
    }

    pub fn has_changes(&self) -> bool {
        self.session.has_changes()
    }

    pub fn tracked(&self) -> usize {
        self.session.tracked()
    }

    /// Re-reads the flag. A failed read keeps the current mode.
    fn refresh_mode(&mut self) {
        match self.selector.resolve() {
            Ok(mode) => self.enable_versioning(mode),
            Err(err) => tracing::warn!(
                owner = %self.identity.key(),
                state = ?self.state,
                error = %err,
                "versioning flag unreadable; keeping current mode"
            ),
        }
    }

    fn before_flush(&mut self) {
        self.refresh_mode();

        if self.is_new_versioning_active() {
            match self.capture_new_history() {
                Ok(capture) => tracing::debug!(
                    captured = capture.captured,
                    skipped = capture.skipped,
                    "new-engine history captured"
                ),
                Err(err) => tracing::warn!(error = %err, "new-engine history capture failed"),
            }
        } else if self.is_old_versioning_active() {
            let changes = self.session.changes();
            self.legacy.process_before_flush(&self.identity, &changes);
        }
    }

    fn capture_new_history(&mut self) -> Result<Capture, SessionError> {
        self.session.begin()?;
        let tx = self.transactions.get_or_create(self.session.connection())?;
        let writer = HistoryWriter::new(self.session.connection(), tx.id);

        let mut capture = Capture::default();
        for change in self.session.changes() {
            let Some(versioned) = change.entity.versioned() else {
                continue;
            };
            match versioned.capture_history(&writer, change.operation) {
                Ok(()) => capture.captured += 1,
                Err(err) => {
                    capture.skipped += 1;
                    tracing::warn!(
                        handle = %change.handle,
                        entity = change.entity.entity_name(),
                        operation = %change.operation,
                        error = %err,
                        "history capture failed; object skipped"
                    );
                }
            }
        }
        Ok(capture)
    }

    fn after_flush(&mut self) {
        if self.is_old_versioning_active() {
            self.legacy.process_after_flush(&self.identity, &self.session);
        }
    }

    /// Runs the before-flush hook, writes pending changes, then runs the
    /// after-flush hook.
    ///
    /// The flag is re-read by the before-flush hook, so a flush with no
    /// pending changes returns early and leaves the mode as it was.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Database` if a row write fails. History
    /// failures are logged only.
    pub fn flush(&mut self) -> Result<Vec<FlushedChange>, SessionError> {
        if !self.session.has_changes() {
            return Ok(Vec::new());
        }

        self.before_flush();
        let flushed = self.session.flush()?;
        self.after_flush();
        Ok(flushed)
    }

    fn commit_inner(&mut self) -> Result<(), SessionError> {
        if self.is_old_versioning_active() {
            let changes = self.session.changes();
            self.legacy.process_before_flush(&self.identity, &changes);
        }

        self.flush()?;
        self.session.commit_storage()?;

        if self.is_old_versioning_active() {
            self.legacy.process_after_flush(&self.identity, &self.session);
        }
        Ok(())
    }

    /// Flushes and commits.
    ///
    /// On failure the session is rolled back and the original error is
    /// returned. Transaction state is cleared either way.
    ///
    /// # Errors
    ///
    /// Returns the write or commit failure unchanged.
    pub fn commit(&mut self) -> Result<(), SessionError> {
        let result = self.commit_inner();
        if let Err(err) = &result {
            tracing::error!(owner = %self.identity.key(), error = %err, "commit failed; rolling back");
            if let Err(rollback_err) = self.session.rollback() {
                tracing::warn!(error = %rollback_err, "rollback after failed commit also failed");
            }
        }
        self.clear_transaction();
        result
    }

    /// Rolls back, then clears transaction state.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Database` if `ROLLBACK` fails.
    pub fn rollback(&mut self) -> Result<(), SessionError> {
        let result = self.session.rollback();
        self.clear_transaction();
        result
    }

    /// Drops per-transaction state. Safe to call with nothing pending.
    ///
    /// The new engine's pending handle is always discarded, so a handle
    /// created before a switch to old mode cannot leak into a later
    /// transaction. In old mode the legacy bookkeeping is cleared too.
    pub fn clear_transaction(&mut self) {
        if let Some(tx) = self.transactions.clear() {
            tracing::debug!(transaction_id = tx.id, "pending transaction cleared");
        }
        if self.is_old_versioning_active() {
            self.legacy.clear(&self.identity);
        }
    }

    /// Operations the next flush would write, by handle.
    pub fn pending_operations(&self) -> Vec<(EntityHandle, Operation)> {
        self.session
            .changes()
            .into_iter()
            .map(|change| (change.handle, change.operation))
            .collect()
    }
}

impl<C: Deref<Target = Connection>> std::fmt::Debug for VersionedSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedSession")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("enabled", &self.enabled)
            .field("options", &self.options)
            .field("pending", &self.transactions.current())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl<C: Deref<Target = Connection>> Drop for VersionedSession<C> {
    /// Forgets this session's legacy entry. The wrapped [`Session`] then
    /// rolls back any storage transaction left open.
    fn drop(&mut self) {
        self.legacy.discard(&self.identity);
    }
}
