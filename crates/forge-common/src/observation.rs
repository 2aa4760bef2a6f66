//! `Observation`: what `StepExecutor::execute` always returns, win or lose.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Ok,
    Failed,
    Skipped,
}

/// The result of attempting exactly one `Step`. Every attempted step
/// produces exactly one of these (invariant §3/§8-1) — never a bare
/// exception across the `StepExecutor` boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Index of the `Step` within its `IntentIr::steps` this observes.
    pub step_ref: usize,
    pub outcome: OutcomeKind,
    /// Last ≤300 chars of stdout.
    pub truncated_stdout: String,
    pub stderr: String,
    pub error_kind: Option<CoreError>,
    pub elapsed_ms: u64,
    /// Stable digest of the step's args, for compact logging (§4.8 step 2).
    pub args_digest: String,
}

pub const STDOUT_TRUNCATE_LIMIT: usize = 300;

impl Observation {
    pub fn ok(step_ref: usize, stdout: &str, stderr: String, elapsed_ms: u64, args_digest: String) -> Self {
        Self {
            step_ref,
            outcome: OutcomeKind::Ok,
            truncated_stdout: truncate_tail(stdout, STDOUT_TRUNCATE_LIMIT),
            stderr,
            error_kind: None,
            elapsed_ms,
            args_digest,
        }
    }

    pub fn failed(
        step_ref: usize,
        stdout: &str,
        stderr: String,
        error_kind: CoreError,
        elapsed_ms: u64,
        args_digest: String,
    ) -> Self {
        Self {
            step_ref,
            outcome: OutcomeKind::Failed,
            truncated_stdout: truncate_tail(stdout, STDOUT_TRUNCATE_LIMIT),
            stderr,
            error_kind: Some(error_kind),
            elapsed_ms,
            args_digest,
        }
    }

    pub fn skipped(step_ref: usize, reason: CoreError, args_digest: String) -> Self {
        Self {
            step_ref,
            outcome: OutcomeKind::Skipped,
            truncated_stdout: String::new(),
            stderr: String::new(),
            error_kind: Some(reason),
            elapsed_ms: 0,
            args_digest,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == OutcomeKind::Ok
    }
}

/// Keep the last `limit` chars, not the first — stdout tails carry the
/// most diagnostically relevant content for long-running tools.
fn truncate_tail(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let skip = s.chars().count() - limit;
    s.chars().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_to_last_300_chars() {
        let long = "a".repeat(500) + "TAIL";
        let obs = Observation::ok(0, &long, String::new(), 10, "digest".into());
        assert_eq!(obs.truncated_stdout.chars().count(), STDOUT_TRUNCATE_LIMIT);
        assert!(obs.truncated_stdout.ends_with("TAIL"));
    }

    #[test]
    fn short_stdout_is_untouched() {
        let obs = Observation::ok(0, "short", String::new(), 1, "d".into());
        assert_eq!(obs.truncated_stdout, "short");
    }

    #[test]
    fn failed_carries_error_kind() {
        let obs = Observation::failed(
            2,
            "",
            "boom".into(),
            CoreError::Transient { message: "conn reset".into() },
            5,
            "d".into(),
        );
        assert!(!obs.is_ok());
        assert_eq!(obs.outcome, OutcomeKind::Failed);
        assert!(obs.error_kind.unwrap().is_retriable());
    }
}
