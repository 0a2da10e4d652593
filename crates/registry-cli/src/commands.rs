//! Operator commands. Each returns data; printing is left to the binary.

use std::sync::Arc;

use registry_db::{current_revision, list_corp_types, MigrationError, MigrationLedger, Target};
use registry_types::{CorpType, VersioningMode};
use registry_versioning::{FlagError, ModeSelector};
use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;

use crate::config::VersioningConfig;

/// Errors surfaced by operator commands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Flag(#[from] FlagError),
}

/// One ledger step as shown by `history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub revision: &'static str,
    pub down_revision: Option<&'static str>,
    pub description: &'static str,
    pub applied: bool,
    pub current: bool,
    /// Downgrading this step leaves the database untouched.
    pub irreversible: bool,
}

/// Resolved versioning mode for the configured service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeReport {
    pub service: String,
    pub mode: VersioningMode,
}

/// Applies forward steps up to `target` (`head` or a revision id).
pub fn upgrade(conn: &Connection, target: &str) -> Result<usize, CommandError> {
    let ledger = MigrationLedger::embedded()?;
    Ok(ledger.upgrade(conn, Target::parse(target))?)
}

/// Reverts steps down to `target` (`base` or a revision id).
pub fn downgrade(conn: &Connection, target: &str) -> Result<usize, CommandError> {
    let ledger = MigrationLedger::embedded()?;
    Ok(ledger.downgrade(conn, Target::parse(target))?)
}

/// The current revision; `None` at base.
pub fn current(conn: &Connection) -> Result<Option<String>, CommandError> {
    Ok(current_revision(conn)?)
}

/// Every ledger step, base first, with its applied state.
///
/// Fails with `MigrationError::UnknownRevision` when the stored revision is
/// not part of the chain.
pub fn history(conn: &Connection) -> Result<Vec<LedgerEntry>, CommandError> {
    let ledger = MigrationLedger::embedded()?;
    let current = current_revision(conn)?;

    let applied = match current.as_deref() {
        None => 0,
        Some(rev) => ledger
            .history()
            .iter()
            .position(|step| step.revision == rev)
            .map(|idx| idx + 1)
            .ok_or_else(|| MigrationError::UnknownRevision(rev.to_string()))?,
    };

    Ok(ledger
        .history()
        .iter()
        .enumerate()
        .map(|(idx, step)| LedgerEntry {
            revision: step.revision,
            down_revision: step.down_revision,
            description: step.description,
            applied: idx < applied,
            current: idx + 1 == applied,
            irreversible: step.is_irreversible_noop(),
        })
        .collect())
}

/// Resolves the versioning mode from the configured flags.
pub fn mode(versioning: &VersioningConfig) -> Result<ModeReport, CommandError> {
    let selector = ModeSelector::new(
        Arc::new(versioning.flag_source()),
        versioning.service.clone(),
    );
    Ok(ModeReport {
        service: selector.service().to_string(),
        mode: selector.resolve()?,
    })
}

/// The corp type reference rows, ordered by code.
pub fn corp_types(conn: &Connection) -> Result<Vec<CorpType>, CommandError> {
    Ok(list_corp_types(conn)?)
}
