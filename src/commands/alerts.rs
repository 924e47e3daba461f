use crate::types::alert::{AlertAuditEntry, AlertSummary};
use crate::types::now_millis;
use crate::Monitor;

pub fn alerts_recent(monitor: &Monitor, limit: u32) -> Result<Vec<AlertAuditEntry>, String> {
    let capacity = monitor.alerts().config().get().audit_capacity;
    monitor.alerts().audit().recent(limit, capacity)
}

pub fn alerts_summary(monitor: &Monitor) -> Result<AlertSummary, String> {
    let capacity = monitor.alerts().config().get().audit_capacity;
    monitor.alerts().audit().summary(now_millis(), capacity)
}
