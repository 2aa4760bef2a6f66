//! `FallbackChain` (§4.5, CASCADE strategy): try a priority-ordered list
//! of alternative ways to satisfy one step; the first option that
//! doesn't error wins. No teacher analogue; authored fresh.

use std::future::Future;

use forge_common::CoreError;

/// One fallback option: a name for observability plus the thunk that
/// attempts it.
pub struct FallbackOption<T> {
    pub name: String,
    attempt: Box<dyn Fn() -> std::pin::Pin<Box<dyn Future<Output = Result<T, CoreError>> + Send>> + Send + Sync>,
}

impl<T> FallbackOption<T> {
    pub fn new<F, Fut>(name: impl Into<String>, attempt: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
    {
        Self { name: name.into(), attempt: Box::new(move || Box::pin(attempt())) }
    }
}

/// Priority-ordered list of options, tried in order until one succeeds.
/// Tracks the name of the last option that actually succeeded, for
/// reporting which path satisfied the step.
pub struct FallbackChain<T> {
    options: Vec<FallbackOption<T>>,
    last_successful: std::sync::Mutex<Option<String>>,
}

impl<T> FallbackChain<T> {
    pub fn new(options: Vec<FallbackOption<T>>) -> Self {
        Self { options, last_successful: std::sync::Mutex::new(None) }
    }

    pub fn last_successful(&self) -> Option<String> {
        self.last_successful.lock().expect("fallback chain poisoned").clone()
    }

    /// Try each option in priority order. Returns the first success, or
    /// the last option's error if every option fails.
    pub async fn run(&self) -> Result<T, CoreError> {
        let mut last_err = None;
        for option in &self.options {
            match (option.attempt)().await {
                Ok(v) => {
                    *self.last_successful.lock().expect("fallback chain poisoned") = Some(option.name.clone());
                    return Ok(v);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(CoreError::Fatal { message: "fallback chain had no options".into() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_successful_option_wins_and_is_recorded() {
        let chain = FallbackChain::new(vec![
            FallbackOption::new("primary", || async { Err(CoreError::Transient { message: "down".into() }) }),
            FallbackOption::new("secondary", || async { Ok::<_, CoreError>(7) }),
            FallbackOption::new("tertiary", || async { Ok::<_, CoreError>(9) }),
        ]);
        let result = chain.run().await.unwrap();
        assert_eq!(result, 7);
        assert_eq!(chain.last_successful(), Some("secondary".to_string()));
    }

    #[tokio::test]
    async fn all_options_failing_returns_last_error() {
        let chain: FallbackChain<()> = FallbackChain::new(vec![
            FallbackOption::new("a", || async { Err(CoreError::Transient { message: "a down".into() }) }),
            FallbackOption::new("b", || async { Err(CoreError::NotFound { message: "b missing".into() }) }),
        ]);
        let result = chain.run().await;
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
        assert!(chain.last_successful().is_none());
    }

    #[tokio::test]
    async fn empty_chain_is_fatal() {
        let chain: FallbackChain<()> = FallbackChain::new(vec![]);
        let result = chain.run().await;
        assert!(matches!(result, Err(CoreError::Fatal { .. })));
    }
}
