//! Database layer for the Rehearse platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode
//! initialization, embedded SQL migrations, and the schema every other
//! crate queries. Every table is created through versioned migrations
//! managed by this crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: one server process owns the data; WAL
//!   allows concurrent readers with a single writer, which matches the
//!   session-lifecycle access pattern (many reads, occasional
//!   finalization writes).
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, so migrations ship with the server and cannot drift
//!   from the code that depends on them.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
