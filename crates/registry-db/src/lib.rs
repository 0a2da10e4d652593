//! Database layer for the business registry.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! the revision-chained migration ledger, and read-only reference-data
//! queries. Every table the registry uses is created through a ledger step
//! managed by this crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: concurrent readers with a single writer,
//!   matching one session per request.
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management.
//! - **Reversible embedded steps**: each step carries its upgrade and
//!   downgrade SQL, compiled in via `include_str!`, and names the step it
//!   follows. The ledger can therefore reach any revision from any other.

mod corp_types;
mod migrations;
mod pool;

pub use corp_types::{get_corp_type, list_corp_types};
pub use migrations::{
    current_revision, run_migrations, Direction, MigrationError, MigrationLedger, Revision,
    Target,
};
pub use pool::{
    configure_connection, create_pool, open_connection, DbPool, DbRuntimeSettings, PoolError,
    PooledConnection,
};
