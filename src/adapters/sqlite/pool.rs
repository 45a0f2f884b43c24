use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

use crate::error::ImportError;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Open (or create) the database file, tune it and apply the schema.
pub fn create_pool(db_path: &Path) -> Result<DbPool, ImportError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ImportError::Database(format!("Failed to create db dir: {e}")))?;
    }

    let manager = SqliteConnectionManager::file(db_path)
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;"));

    let pool = Pool::builder()
        .max_size(8)
        .build(manager)?;

    let conn = pool.get()?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;
         PRAGMA temp_store = MEMORY;"
    )?;

    super::schema::initialize_schema(&conn)?;

    Ok(pool)
}

/// Single-connection in-memory database (for testing)
pub fn in_memory() -> Result<DbPool, ImportError> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));

    let pool = Pool::builder().max_size(1).build(manager)?;

    let conn = pool.get()?;
    super::schema::initialize_schema(&conn)?;

    Ok(pool)
}
