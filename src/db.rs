use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::PathBuf;

pub type DbPool = Pool<SqliteConnectionManager>;

/// How long a writer waits on a lock held by another connection or process.
const BUSY_TIMEOUT_MS: u32 = 5_000;

pub fn provwatch_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".provwatch")
}

pub fn create_pool(db_path: &std::path::Path) -> Result<DbPool, Box<dyn std::error::Error>> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout={}; PRAGMA foreign_keys=ON;",
            BUSY_TIMEOUT_MS
        ))
    });
    let pool = Pool::builder().max_size(8).build(manager)?;

    // WAL lets dashboard readers run while another process writes metrics
    let conn = pool.get()?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;

    Ok(pool)
}

pub fn init_db(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get()?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    Ok(())
}

/// Create, initialize and migrate a database in one step.
pub fn open(db_path: &std::path::Path) -> Result<DbPool, Box<dyn std::error::Error>> {
    let pool = create_pool(db_path)?;
    init_db(&pool)?;
    crate::migrations::run_pending(&pool)?;
    Ok(pool)
}

#[cfg(test)]
pub(crate) fn test_pool() -> (tempfile::TempDir, DbPool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = open(&dir.path().join("test.sqlite")).unwrap();
    (dir, pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provwatch_data_dir_ends_with_provwatch() {
        let dir = provwatch_data_dir();
        assert!(dir.ends_with(".provwatch"));
    }

    #[test]
    fn create_pool_returns_valid_pool() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.sqlite");
        let pool = create_pool(&db_path).unwrap();
        let conn = pool.get().unwrap();
        conn.execute_batch("SELECT 1").unwrap();
    }

    #[test]
    fn create_pool_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("deep").join("test.sqlite");
        let pool = create_pool(&db_path).unwrap();
        let conn = pool.get().unwrap();
        conn.execute_batch("SELECT 1").unwrap();
    }

    #[test]
    fn create_pool_enables_wal_and_busy_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(&dir.path().join("test.sqlite")).unwrap();
        let conn = pool.get().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        let timeout: i64 = conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, BUSY_TIMEOUT_MS as i64);
    }

    #[test]
    fn open_creates_tables() {
        let (_dir, pool) = test_pool();

        let conn = pool.get().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"migrations".to_string()));
        assert!(tables.contains(&"credential_health".to_string()));
        assert!(tables.contains(&"alert_log".to_string()));
    }

    #[test]
    fn init_db_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.sqlite");
        let pool = create_pool(&db_path).unwrap();
        init_db(&pool).unwrap();
        init_db(&pool).unwrap(); // second call should not fail
    }
}
