//! Deciding which credentials need an explicit verification call.
//!
//! A key is re-checked when it was never checked, the secret changed since the
//! last check, its status is not `valid`, or the last check is older than
//! [`VERIFY_MAX_AGE_MS`]. Everything else is skipped unless forced.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::provider::{CredentialHealth, HealthStatus};

pub const VERIFY_MAX_AGE_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Hex digits of the SHA-256 digest kept as the fingerprint.
const FINGERPRINT_LEN: usize = 16;

/// Stable, non-reversible fingerprint of a secret.
pub fn key_fingerprint(secret: &str) -> String {
    let mut digest = hex::encode(Sha256::digest(secret.as_bytes()));
    digest.truncate(FINGERPRINT_LEN);
    digest
}

pub fn needs_verification(existing: Option<&CredentialHealth>, key_hash: &str, now: u64) -> bool {
    let Some(health) = existing else {
        return true;
    };
    if health.key_hash.as_deref() != Some(key_hash) {
        return true;
    }
    if health.status != HealthStatus::Valid {
        return true;
    }
    match health.last_verified_at {
        Some(at) => now.saturating_sub(at) > VERIFY_MAX_AGE_MS,
        None => true,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyVerification {
    pub caller_id: String,
    pub provider_name: String,
    /// False when the stored result was still fresh and no call was made.
    pub checked: bool,
    pub status: HealthStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySummary {
    pub verified: u32,
    pub skipped: u32,
    pub total: u32,
    pub keys: Vec<KeyVerification>,
}

impl VerifySummary {
    pub fn push(&mut self, key: KeyVerification) {
        if key.checked {
            self.verified += 1;
        } else {
            self.skipped += 1;
        }
        self.total += 1;
        self.keys.push(key);
    }

    pub fn message(&self) -> String {
        format!(
            "Smart verification: {} verified, {} skipped",
            self.verified, self.skipped
        )
    }
}
