//! `CircuitBreaker` (§4.5). No teacher analogue; authored fresh in the
//! teacher's builder-config idiom (`ExecutorConfig`/`DagConfig`'s
//! `with_*` consuming-self methods).

use std::future::Future;

use chrono::Utc;
use dashmap::DashMap;
use forge_common::{CircuitPhase, CircuitState, CoreError};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: i64,
    pub success_threshold: u32,
    pub window_seconds: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_seconds: 60,
            success_threshold: 2,
            window_seconds: 300,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, v: u32) -> Self {
        self.failure_threshold = v;
        self
    }

    pub fn with_timeout_seconds(mut self, v: i64) -> Self {
        self.timeout_seconds = v;
        self
    }

    pub fn with_success_threshold(mut self, v: u32) -> Self {
        self.success_threshold = v;
        self
    }

    pub fn with_window_seconds(mut self, v: i64) -> Self {
        self.window_seconds = v;
        self
    }
}

/// Per-named-service circuit state, each entry guarded by its own
/// dashmap shard lock (short critical sections — counter updates only,
/// per §5).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    states: DashMap<String, CircuitState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config, states: DashMap::new() }
    }

    pub fn state_of(&self, service: &str) -> Option<CircuitState> {
        self.states.get(service).map(|s| s.clone())
    }

    /// Every tracked service's current state, for `health()` reporting.
    pub fn all_states(&self) -> Vec<CircuitState> {
        self.states.iter().map(|e| e.value().clone()).collect()
    }

    /// Services currently open (tripped), for `health()`'s `open_circuits`.
    pub fn open_services(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|e| e.value().state == CircuitPhase::Open)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Wrap an outbound call. Transitions exactly as §4.5 specifies:
    /// closed→(≥failure_threshold)→open→(after timeout)→half_open→(≥
    /// success_threshold)→closed, or (any failure)→open.
    pub async fn call<F, Fut, T>(&self, service: &str, f: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        {
            let mut entry = self
                .states
                .entry(service.to_string())
                .or_insert_with(|| CircuitState::new(service));
            self.reset_if_window_elapsed(&mut entry);
            if entry.state == CircuitPhase::Open {
                let since = entry.last_failure.unwrap_or(entry.window_start);
                let elapsed = Utc::now().signed_duration_since(since).num_seconds();
                if elapsed < self.config.timeout_seconds {
                    return Err(CoreError::CircuitOpen { service: service.to_string() });
                }
                entry.state = CircuitPhase::HalfOpen;
                entry.half_open_successes = 0;
            }
        }

        let result = f().await;

        let mut entry = self
            .states
            .entry(service.to_string())
            .or_insert_with(|| CircuitState::new(service));
        self.reset_if_window_elapsed(&mut entry);
        match &result {
            Ok(_) => match entry.state {
                CircuitPhase::HalfOpen => {
                    entry.half_open_successes += 1;
                    if entry.half_open_successes >= self.config.success_threshold {
                        entry.state = CircuitPhase::Closed;
                        entry.failure_count = 0;
                    }
                }
                CircuitPhase::Closed => entry.failure_count = 0,
                CircuitPhase::Open => {}
            },
            Err(_) => {
                entry.failure_count += 1;
                entry.last_failure = Some(Utc::now());
                if entry.state == CircuitPhase::HalfOpen {
                    entry.state = CircuitPhase::Open;
                } else if entry.failure_count >= self.config.failure_threshold {
                    entry.state = CircuitPhase::Open;
                }
            }
        }

        result
    }

    /// §4.5: failures only count "within `window_seconds`" — once a closed
    /// breaker has gone quiet for longer than that, forget the count so a
    /// handful of failures separated by long gaps never accumulates into a
    /// trip. Open/half-open breakers track their own `timeout_seconds`
    /// clock separately and are left alone here.
    fn reset_if_window_elapsed(&self, entry: &mut CircuitState) {
        if entry.state != CircuitPhase::Closed {
            return;
        }
        let elapsed = Utc::now().signed_duration_since(entry.window_start).num_seconds();
        if elapsed > self.config.window_seconds {
            entry.failure_count = 0;
            entry.window_start = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn failing() -> Result<(), CoreError> {
        Err(CoreError::Transient { message: "boom".into() })
    }

    async fn succeeding() -> Result<(), CoreError> {
        Ok(())
    }

    #[tokio::test]
    async fn opens_after_failure_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(3));
        for _ in 0..3 {
            let _ = breaker.call("svc", failing).await;
        }
        let state = breaker.state_of("svc").unwrap();
        assert_eq!(state.state, CircuitPhase::Open);
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_immediately() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(1).with_timeout_seconds(60));
        let _ = breaker.call("svc", failing).await;
        let result = breaker.call("svc", succeeding).await;
        assert!(matches!(result, Err(CoreError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_timeout_seconds(0)
                .with_success_threshold(2),
        );
        let _ = breaker.call("svc", failing).await;
        assert_eq!(breaker.state_of("svc").unwrap().state, CircuitPhase::Open);

        // timeout_seconds = 0, so the very next call immediately goes half_open.
        let _ = breaker.call("svc", succeeding).await;
        assert_eq!(breaker.state_of("svc").unwrap().state, CircuitPhase::HalfOpen);

        let _ = breaker.call("svc", succeeding).await;
        assert_eq!(breaker.state_of("svc").unwrap().state, CircuitPhase::Closed);
    }

    #[tokio::test]
    async fn any_failure_in_half_open_reopens() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::default().with_failure_threshold(1).with_timeout_seconds(0),
        );
        let _ = breaker.call("svc", failing).await;
        let _ = breaker.call("svc", failing).await; // half_open then fails again
        assert_eq!(breaker.state_of("svc").unwrap().state, CircuitPhase::Open);
    }

    #[tokio::test]
    async fn independent_services_have_independent_state() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(1));
        let _ = breaker.call("svc-a", failing).await;
        assert_eq!(breaker.state_of("svc-a").unwrap().state, CircuitPhase::Open);
        assert!(breaker.state_of("svc-b").is_none());
    }
}
