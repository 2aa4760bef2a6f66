//! `CacheEntry` — the unit `IntentCache` stores (§4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ir::IntentIr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key_hash: String,
    pub ir: IntentIr,
    pub expires_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key_hash: impl Into<String>, ir: IntentIr, ttl_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            key_hash: key_hash.into(),
            ir,
            expires_at: now + chrono::Duration::seconds(ttl_seconds),
            last_used: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn touch(&mut self) {
        self.last_used = Utc::now();
    }
}
