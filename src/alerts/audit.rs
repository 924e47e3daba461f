use rusqlite::params;
use tracing::{debug, warn};

use crate::db::DbPool;
use crate::types::alert::{AlertAuditEntry, AlertEvent, AlertSummary, DeliveryRecord};

/// Row ids between eviction passes.
pub const COMPACT_EVERY: i64 = 20;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Bounded, append-only record of every escalation and its deliveries.
///
/// Appends are single INSERTs. The append whose row id is a multiple of
/// [`COMPACT_EVERY`] evicts down to `capacity` rows. Row ids come from
/// AUTOINCREMENT, so the trigger fires the same way whether appends come from
/// one handle or many processes. Reads are capped at `capacity` so a pending
/// compaction is never visible.
pub struct AlertAuditLog {
    pool: DbPool,
}

impl AlertAuditLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn append(
        &self,
        event: &AlertEvent,
        deliveries: &[DeliveryRecord],
        capacity: u32,
    ) -> Result<i64, String> {
        let event_json = serde_json::to_string(event).map_err(|e| e.to_string())?;
        let deliveries_json = serde_json::to_string(deliveries).map_err(|e| e.to_string())?;
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO alert_log (caller_id, provider_name, consecutive_failures, event, deliveries, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.caller_id,
                event.provider_name,
                event.consecutive_failures,
                event_json,
                deliveries_json,
                event.timestamp as i64,
            ],
        )
        .map_err(|e| e.to_string())?;
        let id = conn.last_insert_rowid();
        drop(conn);

        if id % COMPACT_EVERY == 0 {
            if let Err(e) = self.compact(capacity) {
                warn!(error = %e, "Alert log compaction failed");
            }
        }
        Ok(id)
    }

    /// Delete everything but the newest `capacity` entries.
    pub fn compact(&self, capacity: u32) -> Result<usize, String> {
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        let removed = conn
            .execute(
                "DELETE FROM alert_log WHERE id NOT IN (
                     SELECT id FROM alert_log ORDER BY id DESC LIMIT ?1
                 )",
                [capacity],
            )
            .map_err(|e| e.to_string())?;
        if removed > 0 {
            debug!(removed, capacity, "Compacted alert log");
        }
        Ok(removed)
    }

    /// Newest first, never more than `capacity` entries.
    pub fn recent(&self, limit: u32, capacity: u32) -> Result<Vec<AlertAuditEntry>, String> {
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        let mut stmt = conn
            .prepare("SELECT id, event, deliveries FROM alert_log ORDER BY id DESC LIMIT ?1")
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map([limit.min(capacity)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| e.to_string())?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, event_json, deliveries_json) = row.map_err(|e| e.to_string())?;
            entries.push(AlertAuditEntry {
                id,
                event: serde_json::from_str(&event_json).map_err(|e| e.to_string())?,
                deliveries: serde_json::from_str(&deliveries_json).map_err(|e| e.to_string())?,
            });
        }
        Ok(entries)
    }

    pub fn summary(&self, now: u64, capacity: u32) -> Result<AlertSummary, String> {
        let timestamps: Vec<u64> = self
            .recent(capacity, capacity)?
            .into_iter()
            .map(|e| e.event.timestamp)
            .collect();
        let within = |window: u64| {
            timestamps
                .iter()
                .filter(|&&t| t > now.saturating_sub(window))
                .count() as u64
        };
        Ok(AlertSummary {
            total: timestamps.len() as u64,
            last_24_hours: within(DAY_MS),
            last_7_days: within(7 * DAY_MS),
        })
    }
}
