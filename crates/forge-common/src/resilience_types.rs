//! Shared state types for `ResilienceKit` (§4.5) — the mutable state the
//! `CircuitBreaker`/`RetryBudget` machinery in `forge-runtime` reads and
//! writes under its own per-service lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitState {
    pub service: String,
    pub state: CircuitPhase,
    pub failure_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub window_start: DateTime<Utc>,
    pub half_open_successes: u32,
}

impl CircuitState {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            state: CircuitPhase::Closed,
            failure_count: 0,
            last_failure: None,
            window_start: Utc::now(),
            half_open_successes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryBudgetState {
    pub op_class: String,
    pub budget_total: u32,
    pub budget_used: u32,
    pub window_seconds: u64,
    pub window_start: DateTime<Utc>,
}

impl RetryBudgetState {
    pub fn new(op_class: impl Into<String>, budget_total: u32, window_seconds: u64) -> Self {
        Self {
            op_class: op_class.into(),
            budget_total,
            budget_used: 0,
            window_seconds,
            window_start: Utc::now(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.budget_used < self.budget_total
    }
}
