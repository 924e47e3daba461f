pub mod alert;
pub mod config;
pub mod credential;
pub mod provider;
pub mod report;

/// Milliseconds since the Unix epoch; every stored timestamp uses this unit.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
