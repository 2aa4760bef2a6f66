//! ResilienceKit (§4.5): circuit breaker, retry budget, and fallback
//! chain, each a component-local `dashmap`-backed structure per §5's
//! "short critical sections, no cross-component locking" rule.

mod circuit_breaker;
mod fallback_chain;
mod retry_budget;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use fallback_chain::{FallbackChain, FallbackOption};
pub use retry_budget::{RetryBudget, RetryBudgetConfig};
