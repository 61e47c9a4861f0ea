//! SQLite connection pool with WAL mode.
//!
//! Every webhook task shares this pool. WAL lets readers proceed while one
//! task commits, and the busy timeout serialises concurrent writers instead
//! of failing them.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<Sqlite>;

/// Upper bound on pooled connections.
const MAX_CONNECTIONS: u32 = 8;

/// Create a new connection pool with WAL mode enabled.
///
/// The file is created if missing; its parent directory must already exist.
pub async fn create_pool(db_path: &Path) -> Result<DbPool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        // FULL: a committed coverage value or note id must survive power loss.
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_options)
        .await?;

    let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await?;

    debug_assert!(
        mode.0.eq_ignore_ascii_case("wal"),
        "WAL mode should be enabled, got: {}",
        mode.0
    );

    Ok(pool)
}
