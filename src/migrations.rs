use crate::db::DbPool;

pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            name: "001_credential_health",
            sql: "CREATE TABLE IF NOT EXISTS credential_health (
                      caller_id TEXT NOT NULL,
                      provider_name TEXT NOT NULL,
                      total_calls INTEGER NOT NULL DEFAULT 0,
                      success_count INTEGER NOT NULL DEFAULT 0,
                      average_latency_ms REAL NOT NULL DEFAULT 0,
                      consecutive_failures INTEGER NOT NULL DEFAULT 0,
                      last_outcome_at INTEGER,
                      last_success_at INTEGER,
                      last_error TEXT,
                      status TEXT NOT NULL DEFAULT 'not_verified'
                          CHECK(status IN ('valid','invalid','rate_limited','network_error','unknown_error','not_verified')),
                      updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                      PRIMARY KEY (caller_id, provider_name),
                      CHECK(success_count <= total_calls)
                  );
                  CREATE INDEX IF NOT EXISTS idx_credential_health_status ON credential_health(status);",
        },
        Migration {
            name: "002_alert_log",
            sql: "CREATE TABLE IF NOT EXISTS alert_log (
                      id INTEGER PRIMARY KEY AUTOINCREMENT,
                      caller_id TEXT NOT NULL,
                      provider_name TEXT NOT NULL,
                      consecutive_failures INTEGER NOT NULL,
                      event TEXT NOT NULL,
                      deliveries TEXT NOT NULL,
                      created_at INTEGER NOT NULL
                  );
                  CREATE INDEX IF NOT EXISTS idx_alert_log_created ON alert_log(created_at);",
        },
        Migration {
            name: "003_credential_verification",
            sql: "ALTER TABLE credential_health ADD COLUMN key_hash TEXT;
                  ALTER TABLE credential_health ADD COLUMN last_verified_at INTEGER;",
        },
    ]
}

pub fn run_pending(pool: &DbPool) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut conn = pool.get()?;
    // IMMEDIATE takes the write lock up front so two processes starting at once
    // cannot both apply the same migration.
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    let applied_set: std::collections::HashSet<String> = tx
        .prepare("SELECT name FROM migrations ORDER BY id")?
        .query_map([], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();

    let mut newly_applied = Vec::new();

    for migration in all_migrations() {
        if !applied_set.contains(migration.name) {
            tx.execute_batch(migration.sql)?;
            tx.execute("INSERT INTO migrations (name) VALUES (?1)", [migration.name])?;
            newly_applied.push(migration.name.to_string());
        }
    }
    tx.commit()?;

    if !newly_applied.is_empty() {
        tracing::info!(count = newly_applied.len(), "Applied database migrations");
    }
    Ok(newly_applied)
}

pub fn applied(pool: &DbPool) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let conn = pool.get()?;
    let names: Vec<String> = conn
        .prepare("SELECT name FROM migrations ORDER BY id")?
        .query_map([], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(names)
}
