//! Shared types and constants for the business registry persistence layer.
//!
//! This crate provides the small value types used across the workspace:
//! the versioning mode selected per flush, the kind of change a history row
//! records, and the corp type reference-data row. It has no storage
//! dependencies so that every other crate can depend on it without pulling
//! in SQLite.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flag key holding the versioning switches.
pub const DB_VERSIONING_FLAG: &str = "db-versioning";

/// Flag field that must be `true` before any consumer may use new versioning.
pub const INITIALIZE_NEW_VERSIONING: &str = "initialize-new-versioning";

/// Flag field mapping service names to their per-consumer switch.
pub const ENABLE_NEW_VERSIONING: &str = "enable-new-versioning";

/// Service name this persistence layer reports to the flag service.
pub const LEGAL_API_SERVICE: &str = "legal-api";

/// Which history-tracking mechanism is authoritative for a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersioningMode {
    /// The legacy unit-of-work history engine.
    Old,
    /// The explicit transaction-table history engine.
    New,
}

impl VersioningMode {
    /// Returns the canonical string label for this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Old => "old",
            Self::New => "new",
        }
    }
}

impl std::fmt::Display for VersioningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VersioningMode {
    type Err = ParseVersioningModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "old" => Ok(Self::Old),
            "new" => Ok(Self::New),
            _ => Err(ParseVersioningModeError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown versioning mode string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown versioning mode: {0}")]
pub struct ParseVersioningModeError(pub String);

/// The kind of change a history row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// The entity was created in this transaction.
    Insert,
    /// The entity was modified in this transaction.
    Update,
    /// The entity was removed in this transaction.
    Delete,
}

impl Operation {
    /// Returns the label stored by the new history engine.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Parses a label written by [`Operation::as_str`].
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Returns the numeric `operation_type` stored by the legacy engine.
    pub fn code(self) -> u8 {
        match self {
            Self::Insert => 0,
            Self::Update => 1,
            Self::Delete => 2,
        }
    }

    /// Converts a legacy `operation_type` back into an `Operation`.
    ///
    /// Returns `None` for codes the legacy engine never writes.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Insert),
            1 => Some(Self::Update),
            2 => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A business-entity classification row from the `corp_types` lookup table.
///
/// Rows are created only by migrations and are read-only at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpType {
    /// Classification code, e.g. `BC` or `ULC`. Primary key.
    pub corp_type_cd: String,
    /// `Y` when the type is administered in COLIN, `N` otherwise.
    pub colin_ind: String,
    /// Broad class, e.g. `BC`, `XPRO`, `FIRM`, `SOC`, `OT`.
    pub corp_class: String,
    /// Abbreviated description.
    pub short_desc: String,
    /// Full description.
    pub full_desc: String,
    /// Governing legislation. Empty when none applies.
    pub legislation: String,
    /// Row version.
    pub version: i64,
}

impl CorpType {
    /// Whether the classification is administered in COLIN.
    pub fn is_colin(&self) -> bool {
        self.colin_ind == "Y"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioning_mode_parses_its_own_labels() {
        for mode in [VersioningMode::Old, VersioningMode::New] {
            assert_eq!(mode.as_str().parse::<VersioningMode>(), Ok(mode));
        }
        assert_eq!(
            "NEW".parse::<VersioningMode>(),
            Err(ParseVersioningModeError("NEW".to_string()))
        );
    }

    #[test]
    fn versioning_mode_serializes_lowercase() {
        let json = serde_json::to_string(&VersioningMode::New).expect("should serialize");
        assert_eq!(json, "\"new\"");
    }

    #[test]
    fn operation_codes_match_legacy_engine() {
        assert_eq!(Operation::Insert.code(), 0);
        assert_eq!(Operation::Update.code(), 1);
        assert_eq!(Operation::Delete.code(), 2);
        assert_eq!(Operation::from_code(1), Some(Operation::Update));
        assert_eq!(Operation::from_code(7), None);
    }
}
