//! Error types for the versioning layer.

use crate::session::EntityHandle;

/// Errors raised by a [`FlagSource`](crate::FlagSource).
#[derive(Debug, thiserror::Error)]
pub enum FlagError {
    /// The flag service could not be reached or returned garbage.
    #[error("flag service unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while capturing a single object's history.
///
/// These never reach the caller of a flush; they are logged and the
/// object is skipped.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// A database operation failed.
    #[error("history database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The entity snapshot could not be serialised.
    #[error("history serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The entity refused to produce a history row.
    #[error("history capture rejected: {0}")]
    Rejected(String),
}

/// Errors surfaced by [`Session`](crate::Session) and
/// [`VersionedSession`](crate::VersionedSession).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The underlying storage rejected a write, commit or rollback.
    #[error("session database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The versioning flag could not be read when the session was opened.
    #[error("versioning flag error: {0}")]
    Flag(#[from] FlagError),

    /// No object is tracked under the handle.
    #[error("no tracked object for handle {0}")]
    UnknownEntity(EntityHandle),

    /// The object tracked under the handle has a different type.
    #[error("tracked object {handle} is a {actual}, not the requested type")]
    WrongEntityType {
        /// The handle that was looked up.
        handle: EntityHandle,
        /// Entity name of the object actually tracked.
        actual: &'static str,
    },

    /// The object has been marked for deletion.
    #[error("tracked object {0} is deleted")]
    Deleted(EntityHandle),
}

/// Raised by an entity asked to update or delete a row it has no key for.
#[derive(Debug, thiserror::Error)]
#[error("{0} has no primary key; it was never inserted")]
pub struct MissingPrimaryKey(pub &'static str);

impl From<MissingPrimaryKey> for rusqlite::Error {
    fn from(err: MissingPrimaryKey) -> Self {
        rusqlite::Error::ToSqlConversionFailure(Box::new(err))
    }
}
