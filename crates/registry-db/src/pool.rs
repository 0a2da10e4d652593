//! Connection pool creation and per-connection configuration.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// A connection checked out of [`DbPool`].
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Errors that can occur when creating the database pool or a connection.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),

    /// Failed to open or configure a standalone connection.
    #[error("failed to open database connection: {0}")]
    Open(#[from] rusqlite::Error),
}

fn open_flags() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX
}

/// Applies WAL mode, foreign keys and the busy timeout to `conn`.
///
/// In-memory databases report `memory` for the journal mode, which is
/// accepted.
///
/// # Errors
///
/// Returns a SQLite error if a pragma fails or WAL mode is refused.
pub fn configure_connection(
    conn: &Connection,
    settings: &DbRuntimeSettings,
) -> Result<(), rusqlite::Error> {
    let journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    if journal_mode != "wal" && journal_mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!(
                "failed to set WAL journal mode, got: {journal_mode}"
            )),
        ));
    }
    conn.execute_batch(&format!(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {};",
        settings.busy_timeout_ms
    ))
}

/// Creates a new SQLite connection pool with WAL mode and foreign keys enabled.
///
/// # Arguments
///
/// * `db_path` - Path to the SQLite database file. Use `:memory:` for an
///   in-memory database (useful for testing; every pooled connection then
///   sees its own empty database).
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the connection pool cannot be created.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(open_flags())
        .with_init(move |conn| configure_connection(conn, &settings));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?;

    Ok(pool)
}

/// Opens a single configured connection outside the pool.
///
/// Used by the migration runner, which must hold one connection for the
/// whole walk of the ledger.
///
/// # Errors
///
/// Returns `PoolError::Open` if the file cannot be opened or configured.
pub fn open_connection(db_path: &str, settings: &DbRuntimeSettings) -> Result<Connection, PoolError> {
    let conn = Connection::open_with_flags(db_path, open_flags())?;
    configure_connection(&conn, settings)?;
    Ok(conn)
}
