//! Durable per-credential health metrics.
//!
//! Every write is one `INSERT ... ON CONFLICT DO UPDATE ... RETURNING`
//! statement, so the increment and the running mean are computed inside
//! SQLite under its write lock. Threads and separate processes sharing the
//! database file never lose updates.

use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use crate::db::DbPool;
use crate::types::provider::{CallOutcome, CredentialHealth, ErrorKind, HealthStatus};

const HEALTH_COLUMNS: &str = "caller_id, provider_name, total_calls, success_count, average_latency_ms,
     consecutive_failures, last_outcome_at, last_success_at, last_error, status, key_hash, last_verified_at";

#[derive(Clone)]
pub struct MetricsStore {
    pool: DbPool,
}

impl MetricsStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Fold one attempt into the aggregate and return the updated record.
    pub fn record_outcome(
        &self,
        caller_id: &str,
        provider_name: &str,
        outcome: &CallOutcome,
    ) -> Result<CredentialHealth, String> {
        let status = if outcome.success {
            HealthStatus::Valid
        } else {
            outcome
                .error_kind
                .map(HealthStatus::from)
                .unwrap_or(HealthStatus::UnknownError)
        };
        let error = if outcome.success {
            None
        } else {
            Some(outcome.error.clone().unwrap_or_else(|| status.to_string()))
        };
        let latency = outcome.latency_ms as f64;
        let success_at = outcome.success.then_some(outcome.timestamp as i64);

        let conn = self.pool.get().map_err(|e| e.to_string())?;
        let health = conn
            .query_row(
                &format!(
                    "INSERT INTO credential_health
                        (caller_id, provider_name, total_calls, success_count, average_latency_ms,
                         consecutive_failures, last_outcome_at, last_success_at, last_error, status)
                     VALUES (?1, ?2, 1, CASE WHEN ?3 THEN 1 ELSE 0 END, ?4,
                             CASE WHEN ?3 THEN 0 ELSE 1 END, ?5, ?6, ?7, ?8)
                     ON CONFLICT(caller_id, provider_name) DO UPDATE SET
                        total_calls = total_calls + 1,
                        success_count = success_count + CASE WHEN ?3 THEN 1 ELSE 0 END,
                        average_latency_ms = average_latency_ms + (?4 - average_latency_ms) / (total_calls + 1),
                        consecutive_failures = CASE WHEN ?3 THEN 0 ELSE consecutive_failures + 1 END,
                        last_outcome_at = ?5,
                        last_success_at = COALESCE(?6, last_success_at),
                        last_error = COALESCE(?7, last_error),
                        status = ?8,
                        updated_at = datetime('now')
                     RETURNING {}",
                    HEALTH_COLUMNS
                ),
                params![
                    caller_id,
                    provider_name,
                    outcome.success,
                    latency,
                    outcome.timestamp as i64,
                    success_at,
                    error,
                    status.as_str(),
                ],
                health_from_row,
            )
            .map_err(|e| e.to_string())?;

        debug!(
            caller_id,
            provider = provider_name,
            success = outcome.success,
            consecutive_failures = health.consecutive_failures,
            "Recorded call outcome"
        );
        Ok(health)
    }

    pub fn get_health(
        &self,
        caller_id: &str,
        provider_name: &str,
    ) -> Result<Option<CredentialHealth>, String> {
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        conn.query_row(
            &format!(
                "SELECT {} FROM credential_health WHERE caller_id = ?1 AND provider_name = ?2",
                HEALTH_COLUMNS
            ),
            params![caller_id, provider_name],
            health_from_row,
        )
        .optional()
        .map_err(|e| e.to_string())
    }

    pub fn list_health(&self, caller_id: &str) -> Result<Vec<CredentialHealth>, String> {
        self.query_health(
            &format!(
                "SELECT {} FROM credential_health WHERE caller_id = ?1 ORDER BY provider_name",
                HEALTH_COLUMNS
            ),
            Some(caller_id),
        )
    }

    pub fn list_all(&self) -> Result<Vec<CredentialHealth>, String> {
        self.query_health(
            &format!(
                "SELECT {} FROM credential_health ORDER BY caller_id, provider_name",
                HEALTH_COLUMNS
            ),
            None,
        )
    }

    /// Store the result of a key verification. Status, streak, last error and
    /// the verified fingerprint change; call counts and latency do not, so a
    /// verification never skews ranking.
    pub fn record_verification(
        &self,
        caller_id: &str,
        provider_name: &str,
        result: Result<(), ErrorKind>,
        error: Option<&str>,
        key_hash: &str,
        timestamp: u64,
    ) -> Result<CredentialHealth, String> {
        let valid = result.is_ok();
        let status = match result {
            Ok(()) => HealthStatus::Valid,
            Err(kind) => HealthStatus::from(kind),
        };
        let error = (!valid).then(|| error.map(String::from).unwrap_or_else(|| status.to_string()));

        let conn = self.pool.get().map_err(|e| e.to_string())?;
        let health = conn
            .query_row(
                &format!(
                    "INSERT INTO credential_health
                        (caller_id, provider_name, consecutive_failures, last_error, status,
                         key_hash, last_verified_at)
                     VALUES (?1, ?2, CASE WHEN ?3 THEN 0 ELSE 1 END, ?4, ?5, ?6, ?7)
                     ON CONFLICT(caller_id, provider_name) DO UPDATE SET
                        consecutive_failures = CASE WHEN ?3 THEN 0 ELSE consecutive_failures + 1 END,
                        last_error = COALESCE(?4, last_error),
                        status = ?5,
                        key_hash = ?6,
                        last_verified_at = ?7,
                        updated_at = datetime('now')
                     RETURNING {}",
                    HEALTH_COLUMNS
                ),
                params![
                    caller_id,
                    provider_name,
                    valid,
                    error,
                    status.as_str(),
                    key_hash,
                    timestamp as i64,
                ],
                health_from_row,
            )
            .map_err(|e| e.to_string())?;

        debug!(caller_id, provider = provider_name, status = %status, "Recorded verification");
        Ok(health)
    }

    /// Administrative reset after manual remediation. Counters other than the
    /// streak are kept so history survives. Returns false if the key is unknown.
    pub fn force_reset(&self, caller_id: &str, provider_name: &str) -> Result<bool, String> {
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE credential_health
                 SET consecutive_failures = 0, status = 'not_verified', updated_at = datetime('now')
                 WHERE caller_id = ?1 AND provider_name = ?2",
                params![caller_id, provider_name],
            )
            .map_err(|e| e.to_string())?;
        if changed > 0 {
            tracing::info!(caller_id, provider = provider_name, "Credential health reset");
        }
        Ok(changed > 0)
    }

    fn query_health(
        &self,
        sql: &str,
        caller_id: Option<&str>,
    ) -> Result<Vec<CredentialHealth>, String> {
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        let mut stmt = conn.prepare(sql).map_err(|e| e.to_string())?;
        let rows = match caller_id {
            Some(id) => stmt.query_map([id], health_from_row),
            None => stmt.query_map([], health_from_row),
        }
        .map_err(|e| e.to_string())?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| e.to_string())?);
        }
        Ok(out)
    }
}

fn health_from_row(row: &Row<'_>) -> rusqlite::Result<CredentialHealth> {
    let status_str: String = row.get(9)?;
    let status = status_str.parse::<HealthStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(CredentialHealth {
        caller_id: row.get(0)?,
        provider_name: row.get(1)?,
        total_calls: row.get::<_, i64>(2)? as u64,
        success_count: row.get::<_, i64>(3)? as u64,
        average_latency_ms: row.get(4)?,
        consecutive_failures: row.get::<_, i64>(5)? as u32,
        last_outcome_at: row.get::<_, Option<i64>>(6)?.map(|t| t as u64),
        last_success_at: row.get::<_, Option<i64>>(7)?.map(|t| t as u64),
        last_error: row.get(8)?,
        status,
        key_hash: row.get(10)?,
        last_verified_at: row.get::<_, Option<i64>>(11)?.map(|t| t as u64),
    })
}
