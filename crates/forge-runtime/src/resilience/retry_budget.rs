//! `RetryBudget` (§4.5): bounded exponential backoff with jitter, plus a
//! cross-call budget per named op class so a storm of individually
//! well-behaved retries can't exhaust a downstream service. No teacher
//! analogue; authored fresh.

use std::future::Future;

use chrono::Utc;
use dashmap::DashMap;
use forge_common::{CoreError, RetryBudgetState};
use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryBudgetConfig {
    pub max_attempts: u32,
    pub initial_delay_seconds: f64,
    pub max_delay_seconds: f64,
    pub exponential_base: f64,
    pub jitter: bool,
    /// Cross-call retry budget per window, per op class.
    pub budget_total: u32,
    pub window_seconds: u64,
}

impl Default for RetryBudgetConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_seconds: 1.0,
            max_delay_seconds: 30.0,
            exponential_base: 2.0,
            jitter: true,
            budget_total: 3,
            window_seconds: 300,
        }
    }
}

impl RetryBudgetConfig {
    pub fn with_max_attempts(mut self, v: u32) -> Self {
        self.max_attempts = v;
        self
    }

    pub fn with_initial_delay_seconds(mut self, v: f64) -> Self {
        self.initial_delay_seconds = v;
        self
    }

    pub fn with_max_delay_seconds(mut self, v: f64) -> Self {
        self.max_delay_seconds = v;
        self
    }

    pub fn with_exponential_base(mut self, v: f64) -> Self {
        self.exponential_base = v;
        self
    }

    pub fn with_jitter(mut self, v: bool) -> Self {
        self.jitter = v;
        self
    }

    pub fn with_budget_total(mut self, v: u32) -> Self {
        self.budget_total = v;
        self
    }

    pub fn with_window_seconds(mut self, v: u64) -> Self {
        self.window_seconds = v;
        self
    }

    /// delay(k), k 0-indexed, per §4.5's exact formula. Jitter multiplies
    /// by a uniform factor in [0.5, 1.5] when enabled.
    pub fn delay_seconds(&self, k: u32) -> f64 {
        let base = self.initial_delay_seconds * self.exponential_base.powi(k as i32 - 1);
        let bounded = base.min(self.max_delay_seconds).max(0.0);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.5);
            bounded * factor
        } else {
            bounded
        }
    }
}

pub struct RetryBudget {
    config: RetryBudgetConfig,
    states: DashMap<String, RetryBudgetState>,
}

impl RetryBudget {
    pub fn new(config: RetryBudgetConfig) -> Self {
        Self { config, states: DashMap::new() }
    }

    fn reset_if_window_elapsed(&self, entry: &mut RetryBudgetState) {
        let elapsed = Utc::now().signed_duration_since(entry.window_start).num_seconds();
        if elapsed >= entry.window_seconds as i64 {
            entry.budget_used = 0;
            entry.window_start = Utc::now();
        }
    }

    /// Consume one retry unit for `op_class`; `Err` when the window
    /// budget is exhausted.
    fn try_consume(&self, op_class: &str) -> Result<(), CoreError> {
        let mut entry = self.states.entry(op_class.to_string()).or_insert_with(|| {
            RetryBudgetState::new(op_class, self.config.budget_total, self.config.window_seconds)
        });
        self.reset_if_window_elapsed(&mut entry);
        if !entry.has_capacity() {
            return Err(CoreError::BudgetExhausted { op_class: op_class.to_string() });
        }
        entry.budget_used += 1;
        Ok(())
    }

    pub fn state_of(&self, op_class: &str) -> Option<RetryBudgetState> {
        self.states.get(op_class).map(|s| s.clone())
    }

    /// Every op class that has attempted at least one retry, for
    /// `health()` reporting.
    pub fn all_states(&self) -> Vec<RetryBudgetState> {
        self.states.iter().map(|e| e.value().clone()).collect()
    }

    /// Run `f`, retrying on retriable-kind failures up to
    /// `max_attempts` total attempts, consuming one budget unit before
    /// each retry (not before the first attempt).
    pub async fn execute<F, Fut, T>(&self, op_class: &str, mut f: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = f().await;
            match result {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_retriable() || attempt >= self.config.max_attempts => return Err(e),
                Err(_) => {
                    self.try_consume(op_class)?;
                    let delay = self.config.delay_seconds(attempt);
                    tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let budget = RetryBudget::new(
            RetryBudgetConfig::default().with_initial_delay_seconds(0.0).with_jitter(false),
        );
        let calls = AtomicU32::new(0);
        let result = budget
            .execute("provider.call", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(CoreError::Transient { message: "flaky".into() })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_retriable_kinds() {
        let budget = RetryBudget::new(RetryBudgetConfig::default().with_initial_delay_seconds(0.0));
        let calls = AtomicU32::new(0);
        let result: Result<(), CoreError> = budget
            .execute("provider.call", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CoreError::Permission { message: "nope".into() }) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_exhausted_stops_retrying_within_window() {
        let budget = RetryBudget::new(
            RetryBudgetConfig::default()
                .with_initial_delay_seconds(0.0)
                .with_max_attempts(100)
                .with_budget_total(2)
                .with_window_seconds(300),
        );
        let result: Result<(), CoreError> = budget
            .execute("provider.call", || async { Err(CoreError::Transient { message: "x".into() }) })
            .await;
        assert!(matches!(result, Err(CoreError::BudgetExhausted { .. })));
    }

    #[test]
    fn delay_grows_exponentially_and_is_capped() {
        let cfg = RetryBudgetConfig::default().with_jitter(false);
        assert_eq!(cfg.delay_seconds(1), 1.0);
        assert_eq!(cfg.delay_seconds(2), 2.0);
        assert_eq!(cfg.delay_seconds(3), 4.0);
        let capped = cfg.delay_seconds(10);
        assert_eq!(capped, cfg.max_delay_seconds);
    }
}
