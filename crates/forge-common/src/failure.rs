//! `FailureRecord` — the unit `FailureStore` indexes on (§4.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureRecord {
    pub signature_hash: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrences: u64,
    pub tool: String,
    pub error_kind: String,
    pub suggested_remedy: Option<String>,
    pub remedy_success_count: u64,
    pub remedy_attempt_count: u64,
}

impl FailureRecord {
    pub fn new(signature_hash: impl Into<String>, tool: impl Into<String>, error_kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            signature_hash: signature_hash.into(),
            first_seen: now,
            last_seen: now,
            occurrences: 1,
            tool: tool.into(),
            error_kind: error_kind.into(),
            suggested_remedy: None,
            remedy_success_count: 0,
            remedy_attempt_count: 0,
        }
    }

    /// Remedy success rate used by the ≥0.5 threshold in §4.3's
    /// probability boost; `None` when no remedy has been attempted yet.
    pub fn remedy_success_rate(&self) -> Option<f64> {
        if self.remedy_attempt_count == 0 {
            None
        } else {
            Some(self.remedy_success_count as f64 / self.remedy_attempt_count as f64)
        }
    }
}
