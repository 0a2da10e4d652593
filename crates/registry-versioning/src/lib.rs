//! History versioning for the business registry.
//!
//! Wraps a unit-of-work [`Session`] so that every write to a versioned
//! entity leaves an audit trail. Two engines compete for that job and the
//! `db-versioning` feature flag picks one per flush:
//!
//! | Mode | Engine | Writes | When |
//! |------|--------|--------|------|
//! | new  | [`TransactionManager`] + [`HistoryWriter`] | `entity_history` | before the flush |
//! | old  | [`LegacyEngine`] | `entity_versions` | after the flush |
//!
//! Both engines anchor their rows on the `"transaction"` table. Only commit
//! and rollback failures reach the caller; history bookkeeping failures
//! are logged and skipped.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use registry_versioning::{
//!     Business, LegacyEngine, ModeSelector, Session, StaticFlags, VersionedSession,
//! };
//!
//! let flags = Arc::new(StaticFlags::new());
//! let selector = ModeSelector::new(flags, "legal-api");
//! let mut session = VersionedSession::open(Session::new(&conn), selector, LegacyEngine::new())?;
//!
//! session.add(Business::new("BC0000001", "Acme Holdings Ltd.", "BC"));
//! session.commit()?;
//! ```

mod entity;
mod error;
mod flags;
mod history;
mod legacy;
mod mode;
mod models;
mod session;
mod transaction;
mod versioned;

pub use entity::{AsAny, Entity, Versioned};
pub use error::{FlagError, HistoryError, MissingPrimaryKey, SessionError};
pub use flags::{FlagSource, StaticFlags};
pub use history::{history_for_entity, history_for_transaction, HistoryRecord, HistoryWriter};
pub use legacy::{
    versions_for_entity, LegacyEngine, SessionIdentity, UnitOfWork, UowKey, VersionRecord,
};
pub use mode::{resolve_mode, ModeSelector};
pub use models::{hidden_in_ledger, Business, Filing};
pub use session::{EntityHandle, FlushedChange, PendingChange, Session};
pub use transaction::{create_transaction, get_transaction, Transaction, TransactionManager};
pub use versioned::{EngineOptions, VersionedSession, VersioningState};
