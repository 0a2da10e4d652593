//! Revision-chained SQL migration ledger.
//!
//! Every step names its own `revision` and the `down_revision` it follows,
//! forming a singly linked chain from the base step to the head. The ledger
//! walks that chain forwards (`upgrade`) or backwards (`downgrade`) from the
//! revision recorded in `_registry_version` to any target revision.
//!
//! Each step runs inside its own SQLite transaction together with the update
//! of the tracking row, so a failing step leaves neither schema changes nor a
//! moved pointer behind.

use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

/// A single embedded, reversible migration step.
#[derive(Debug, Clone, Copy)]
pub struct Revision {
    /// Identifier of this step.
    pub revision: &'static str,
    /// Identifier of the step this one follows. `None` for the base step.
    pub down_revision: Option<&'static str>,
    /// Short human-readable description.
    pub description: &'static str,
    upgrade: &'static str,
    /// `None` marks a step whose downgrade intentionally does nothing.
    downgrade: Option<&'static str>,
}

impl Revision {
    /// Declares a migration step.
    pub const fn new(
        revision: &'static str,
        down_revision: Option<&'static str>,
        description: &'static str,
        upgrade: &'static str,
        downgrade: Option<&'static str>,
    ) -> Self {
        Self {
            revision,
            down_revision,
            description,
            upgrade,
            downgrade,
        }
    }

    /// Whether downgrading this step leaves the database untouched.
    pub fn is_irreversible_noop(&self) -> bool {
        self.downgrade.is_none()
    }
}

/// All shipped steps. New steps are appended here and must name the current
/// head as their `down_revision`.
const REVISIONS: &[Revision] = &[
    Revision::new(
        "a1c3e5f70b01",
        None,
        "base schema",
        include_str!("migrations/a1c3e5f70b01_base_schema.up.sql"),
        Some(include_str!("migrations/a1c3e5f70b01_base_schema.down.sql")),
    ),
    // Reference data is never removed on downgrade.
    Revision::new(
        "bffab2daa2c1",
        Some("a1c3e5f70b01"),
        "corp types data",
        include_str!("migrations/bffab2daa2c1_corp_types_data.up.sql"),
        None,
    ),
    Revision::new(
        "c47d2e9a1f06",
        Some("bffab2daa2c1"),
        "transaction registry",
        include_str!("migrations/c47d2e9a1f06_transaction_registry.up.sql"),
        Some(include_str!(
            "migrations/c47d2e9a1f06_transaction_registry.down.sql"
        )),
    ),
    Revision::new(
        "f99e7bda56bb",
        Some("c47d2e9a1f06"),
        "hide in ledger",
        include_str!("migrations/f99e7bda56bb_hide_in_ledger.up.sql"),
        Some(include_str!("migrations/f99e7bda56bb_hide_in_ledger.down.sql")),
    ),
];

/// Direction a step is being applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Forward, towards the head.
    Upgrade,
    /// Backward, towards the base.
    Downgrade,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upgrade => f.write_str("upgrade"),
            Self::Downgrade => f.write_str("downgrade"),
        }
    }
}

/// Where a ledger walk should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    /// The last step of the chain.
    Head,
    /// Before the first step of the chain (nothing applied).
    Base,
    /// A specific revision id.
    Revision(&'a str),
}

impl<'a> Target<'a> {
    /// Parses `head`, `base`, or a revision id.
    pub fn parse(s: &'a str) -> Self {
        match s {
            "head" => Self::Head,
            "base" => Self::Base,
            other => Self::Revision(other),
        }
    }
}

/// Errors that can occur while validating or walking the ledger.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a step failed.
    #[error("{direction} of revision '{revision}' failed: {source}")]
    ExecutionFailed {
        /// The revision that failed.
        revision: String,
        /// Which way the step was being applied.
        direction: Direction,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to read or bootstrap the tracking table.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),

    /// The declared steps do not form a single linear chain.
    #[error("migration chain is broken: {0}")]
    BrokenChain(String),

    /// A target or recorded revision is not part of the chain.
    #[error("unknown revision '{0}'")]
    UnknownRevision(String),

    /// The target lies on the other side of the current revision.
    #[error("cannot {direction} from {current} to {target}")]
    WrongDirection {
        /// The attempted direction.
        direction: Direction,
        /// The revision currently recorded, or `base`.
        current: String,
        /// The requested target.
        target: String,
    },
}

/// An ordered, validated view over a set of revisions.
#[derive(Debug, Clone)]
pub struct MigrationLedger<'a> {
    steps: Vec<&'a Revision>,
}

impl MigrationLedger<'static> {
    /// The ledger of steps compiled into this crate.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::BrokenChain` if the embedded steps are
    /// inconsistent, which is a build defect.
    pub fn embedded() -> Result<Self, MigrationError> {
        Self::from_revisions(REVISIONS)
    }
}

impl<'a> MigrationLedger<'a> {
    /// Orders `revisions` into a chain, base first.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::BrokenChain` unless the revisions form exactly
    /// one linear chain: one base, unique ids, known parents and no branches.
    pub fn from_revisions(revisions: &'a [Revision]) -> Result<Self, MigrationError> {
        let mut seen = HashSet::new();
        for step in revisions {
            if !seen.insert(step.revision) {
                return Err(MigrationError::BrokenChain(format!(
                    "revision '{}' is declared twice",
                    step.revision
                )));
            }
        }

        let mut bases = revisions.iter().filter(|step| step.down_revision.is_none());
        let base = match (bases.next(), bases.next()) {
            (Some(base), None) => base,
            (None, _) if revisions.is_empty() => return Ok(Self { steps: Vec::new() }),
            (None, _) => {
                return Err(MigrationError::BrokenChain(
                    "no base revision".to_string(),
                ))
            }
            (Some(first), Some(second)) => {
                return Err(MigrationError::BrokenChain(format!(
                    "multiple base revisions: '{}' and '{}'",
                    first.revision, second.revision
                )))
            }
        };

        let mut children: HashMap<&str, &'a Revision> = HashMap::new();
        for step in revisions {
            let Some(parent) = step.down_revision else {
                continue;
            };
            if !seen.contains(parent) {
                return Err(MigrationError::BrokenChain(format!(
                    "revision '{}' follows unknown revision '{parent}'",
                    step.revision
                )));
            }
            if let Some(existing) = children.insert(parent, step) {
                return Err(MigrationError::BrokenChain(format!(
                    "revisions '{}' and '{}' both follow '{parent}'",
                    existing.revision, step.revision
                )));
            }
        }

        let mut steps = vec![base];
        while let Some(next) = children.get(steps[steps.len() - 1].revision) {
            steps.push(next);
        }

        if steps.len() != revisions.len() {
            return Err(MigrationError::BrokenChain(format!(
                "{} revision(s) are unreachable from base '{}'",
                revisions.len() - steps.len(),
                base.revision
            )));
        }

        Ok(Self { steps })
    }

    /// Steps in chain order, base first.
    pub fn history(&self) -> &[&'a Revision] {
        &self.steps
    }

    /// The last revision in the chain, if any.
    pub fn head(&self) -> Option<&'a str> {
        self.steps.last().map(|step| step.revision)
    }

    /// Number of steps applied when `revision` is current.
    fn applied_count(&self, revision: Option<&str>) -> Result<usize, MigrationError> {
        match revision {
            None => Ok(0),
            Some(rev) => self
                .steps
                .iter()
                .position(|step| step.revision == rev)
                .map(|idx| idx + 1)
                .ok_or_else(|| MigrationError::UnknownRevision(rev.to_string())),
        }
    }

    fn target_count(&self, target: Target<'_>) -> Result<usize, MigrationError> {
        match target {
            Target::Head => Ok(self.steps.len()),
            Target::Base => Ok(0),
            Target::Revision(rev) => self.applied_count(Some(rev)),
        }
    }

    /// Applies forward steps until `target` is current.
    ///
    /// Returns the number of steps applied.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::WrongDirection` if `target` is behind the
    /// current revision, `MigrationError::UnknownRevision` for revisions
    /// outside the chain, and `MigrationError::ExecutionFailed` if a step
    /// fails (that step is rolled back; earlier steps stay applied).
    pub fn upgrade(&self, conn: &Connection, target: Target<'_>) -> Result<usize, MigrationError> {
        let current = current_revision(conn)?;
        let from = self.applied_count(current.as_deref())?;
        let to = self.target_count(target)?;

        if to < from {
            return Err(MigrationError::WrongDirection {
                direction: Direction::Upgrade,
                current: current.unwrap_or_else(|| "base".to_string()),
                target: target_label(target),
            });
        }

        if to == from {
            tracing::debug!(
                current = current.as_deref().unwrap_or("base"),
                "schema already at target revision"
            );
            return Ok(0);
        }

        for step in &self.steps[from..to] {
            tracing::info!(
                revision = step.revision,
                description = step.description,
                "applying upgrade"
            );
            apply_step(conn, step, Direction::Upgrade, Some(step.revision))?;
        }

        Ok(to - from)
    }

    /// Applies reverse steps until `target` is current.
    ///
    /// Returns the number of steps reverted.
    ///
    /// # Errors
    ///
    /// Same as [`MigrationLedger::upgrade`], mirrored.
    pub fn downgrade(
        &self,
        conn: &Connection,
        target: Target<'_>,
    ) -> Result<usize, MigrationError> {
        let current = current_revision(conn)?;
        let from = self.applied_count(current.as_deref())?;
        let to = self.target_count(target)?;

        if to > from {
            return Err(MigrationError::WrongDirection {
                direction: Direction::Downgrade,
                current: current.unwrap_or_else(|| "base".to_string()),
                target: target_label(target),
            });
        }

        if to == from {
            tracing::debug!(
                current = current.as_deref().unwrap_or("base"),
                "schema already at target revision"
            );
            return Ok(0);
        }

        for step in self.steps[to..from].iter().rev() {
            tracing::info!(
                revision = step.revision,
                description = step.description,
                noop = step.is_irreversible_noop(),
                "applying downgrade"
            );
            apply_step(conn, step, Direction::Downgrade, step.down_revision)?;
        }

        Ok(from - to)
    }
}

fn target_label(target: Target<'_>) -> String {
    match target {
        Target::Head => "head".to_string(),
        Target::Base => "base".to_string(),
        Target::Revision(rev) => rev.to_string(),
    }
}

fn ensure_version_table(conn: &Connection) -> Result<(), MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _registry_version (
            version_num TEXT NOT NULL PRIMARY KEY
        );",
    )
    .map_err(MigrationError::StateQuery)
}

/// Returns the revision currently recorded, or `None` at base.
///
/// # Errors
///
/// Returns `MigrationError::StateQuery` if the tracking table cannot be
/// created or read.
pub fn current_revision(conn: &Connection) -> Result<Option<String>, MigrationError> {
    ensure_version_table(conn)?;
    conn.query_row("SELECT version_num FROM _registry_version", [], |row| {
        row.get(0)
    })
    .optional()
    .map_err(MigrationError::StateQuery)
}

fn apply_step(
    conn: &Connection,
    step: &Revision,
    direction: Direction,
    new_current: Option<&str>,
) -> Result<(), MigrationError> {
    let fail = |source: rusqlite::Error| MigrationError::ExecutionFailed {
        revision: step.revision.to_string(),
        direction,
        source,
    };

    let tx = conn.unchecked_transaction().map_err(fail)?;

    let sql = match direction {
        Direction::Upgrade => Some(step.upgrade),
        Direction::Downgrade => step.downgrade,
    };
    if let Some(sql) = sql {
        tx.execute_batch(sql).map_err(fail)?;
    }

    tx.execute("DELETE FROM _registry_version", []).map_err(fail)?;
    if let Some(rev) = new_current {
        tx.execute(
            "INSERT INTO _registry_version (version_num) VALUES (?1)",
            [rev],
        )
        .map_err(fail)?;
    }

    tx.commit().map_err(fail)
}

/// Upgrades the connection to the head of the embedded ledger.
///
/// Returns the number of steps applied; zero when already at head.
///
/// # Errors
///
/// Returns `MigrationError` if any step fails or the tracking table cannot
/// be queried.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    MigrationLedger::embedded()?.upgrade(conn, Target::Head)
}
