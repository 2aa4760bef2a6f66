//! The error taxonomy (§7): one shared set of kinds, not one enum per
//! subsystem — §7 defines a single taxonomy every subsystem tags its
//! failures with, unlike the teacher's per-subsystem `OrchestratorError`/
//! `PhaseError`/`FactoryError` split.

use thiserror::Error;

/// Classified error kind. Carries just enough structured context to
/// render remediation text and to drive retry/circuit decisions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("schema error: {message}")]
    Schema { message: String },

    #[error("permission denied: {message}")]
    Permission { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("transient failure: {message}")]
    Transient { message: String },

    #[error("timeout after {elapsed_ms}ms: {message}")]
    Timeout { message: String, elapsed_ms: u64 },

    #[error("retry budget exhausted for {op_class}")]
    BudgetExhausted { op_class: String },

    #[error("circuit open for {service}")]
    CircuitOpen { service: String },

    #[error("syntax error: {message}")]
    Syntax { message: String },

    #[error("fatal error: {message}")]
    Fatal { message: String },
}

impl CoreError {
    pub fn kind_name(&self) -> &'static str {
        match self {
            CoreError::Schema { .. } => "schema",
            CoreError::Permission { .. } => "permission",
            CoreError::NotFound { .. } => "not_found",
            CoreError::Transient { .. } => "transient",
            CoreError::Timeout { .. } => "timeout",
            CoreError::BudgetExhausted { .. } => "budget_exhausted",
            CoreError::CircuitOpen { .. } => "circuit_open",
            CoreError::Syntax { .. } => "syntax",
            CoreError::Fatal { .. } => "fatal",
        }
    }

    /// Retriable kinds per §7: transient, timeout.
    pub fn is_retriable(&self) -> bool {
        matches!(self, CoreError::Transient { .. } | CoreError::Timeout { .. })
    }

    /// Fatal kinds short-circuit remaining Planner levels (§4.7 step 3).
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Fatal { .. })
    }
}
