//! Shared domain types and external-collaborator contracts for the
//! zenus execution core. No I/O lives here — persistence, scheduling,
//! and process orchestration belong to `forge-runtime`.

pub mod action;
pub mod cache;
pub mod error;
pub mod failure;
pub mod ir;
pub mod observation;
pub mod resilience_types;
pub mod traits;

pub use action::{ActionRecord, RollbackStrategy, Transaction, TxnStatus};
pub use cache::CacheEntry;
pub use error::CoreError;
pub use failure::FailureRecord;
pub use ir::{IntentIr, Risk, Step};
pub use observation::{Observation, OutcomeKind};
pub use resilience_types::{CircuitPhase, CircuitState, RetryBudgetState};
pub use traits::{
    AlwaysConfirm, AuditSink, ConfigProvider, Interact, NullAuditSink, Reflection,
    ResourceTouch, StreamChunk, ToolInvocationResult, ToolRegistry, Translator,
};
