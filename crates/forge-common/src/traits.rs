//! External-collaborator contracts (§1). The core depends only on these
//! traits — concrete implementations (a real LLM-backed translator, the
//! production tool catalog, file-based config, a telemetry sink) live
//! outside the core, per the teacher's "fixed-shape plugin, runtime
//! registry keyed by symbolic name, no inheritance hierarchy" idiom
//! (§9).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::ir::IntentIr;

/// Reflection result from a `Translator::reflect` call (§6 wire format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    pub achieved: bool,
    pub confidence: f64,
    pub reasoning: String,
    pub next_steps: Vec<String>,
}

/// One streamed chunk of a translate/reflect call. Translate/reflect
/// calls MUST be streamed (§5) to avoid server-side timeouts and to
/// enable cancellation.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Token(String),
    Done,
}

/// Natural-language → IR, and IR trail → reflection. Out of scope per
/// §1 — prompting strategy and model provider choice are non-goals; the
/// core only calls through this trait.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        input: &str,
        context: &str,
    ) -> Result<IntentIr, CoreError>;

    async fn reflect(
        &self,
        goal: &str,
        observation_trail: &str,
    ) -> Result<Reflection, CoreError>;
}

/// Result of invoking one `(tool, action)` pair directly, before the
/// `StepExecutor` wraps it into an `Observation`.
#[derive(Debug, Clone)]
pub struct ToolInvocationResult {
    pub stdout: String,
    pub stderr: String,
    pub rollback_strategy: crate::action::RollbackStrategy,
}

/// Resolves `(tool, action)` pairs to executable behavior. Out of scope
/// per §1 — specific tool implementations are a non-goal; the reference
/// implementation in the CLI front-end exists only to exercise the core.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn invoke(
        &self,
        tool: &str,
        action: &str,
        args: &BTreeMap<String, serde_json::Value>,
    ) -> Result<ToolInvocationResult, CoreError>;

    /// Whether this tool class serializes all its own operations against
    /// each other regardless of argument overlap (§4.1 step 1: package
    /// manager, VCS state).
    fn is_serializing_class(&self, tool: &str) -> bool;

    /// Resource identifiers this `(tool, action, args)` call touches, for
    /// `DependencyAnalyzer`'s conflict inference (§4.1). `writes` means a
    /// mutating touch; otherwise it's a read.
    fn resource_touches(
        &self,
        tool: &str,
        action: &str,
        args: &BTreeMap<String, serde_json::Value>,
    ) -> Vec<ResourceTouch>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTouch {
    pub resource_id: String,
    pub writes: bool,
}

/// Typed, validated configuration contract (§9's "configuration as an
/// enumerated contract"). Out of scope per §1 — config file loading is
/// a non-goal; the core only ever sees `&dyn ConfigProvider`.
pub trait ConfigProvider: Send + Sync {
    fn llm_provider(&self) -> String;
    fn llm_model(&self) -> String;
    fn llm_timeout_seconds(&self) -> u64;

    fn fallback_enabled(&self) -> bool;
    fn fallback_providers(&self) -> Vec<String>;

    fn circuit_breaker_failure_threshold(&self) -> u32;
    fn circuit_breaker_timeout_seconds(&self) -> u64;

    fn retry_max_attempts(&self) -> u32;
    fn retry_initial_delay_seconds(&self) -> f64;
    fn retry_max_delay_seconds(&self) -> f64;
    fn retry_exponential_base(&self) -> f64;
    fn retry_jitter(&self) -> bool;

    fn cache_ttl_seconds(&self) -> i64;
    fn cache_max_entries(&self) -> usize;

    fn safety_sandbox_enabled(&self) -> bool;
    fn safety_allowed_paths(&self) -> Vec<String>;

    fn planner_worker_pool(&self) -> usize;

    fn goal_loop_max_iterations(&self) -> u32;
    fn goal_loop_batch_size(&self) -> u32;
    fn goal_loop_stuck_threshold(&self) -> u32;

    /// Root directory for persisted state, default `~/.zenus/`.
    fn state_root(&self) -> std::path::PathBuf;
}

/// Optional forwarding hook notified after every `AuditLog` append — a
/// pretty-printer, a future telemetry exporter. `AuditLog` itself (core
/// component #1) is the core's own mandatory persistence; `AuditSink` is
/// the external collaborator named in §1. See DESIGN.md Open Question 1.
pub trait AuditSink: Send + Sync {
    fn on_audit_event(&self, line: &str);
}

/// Default sink: does nothing. The core never requires a real one.
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn on_audit_event(&self, _line: &str) {}
}

/// Interaction callback for confirmation/stuck/batch-boundary prompts
/// (§4.7 step 1, §4.8 steps 7-8). Out of scope per §1 (interactive
/// shell/TUI chrome); the core only calls through this trait.
#[async_trait]
pub trait Interact: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Always answers yes — used by non-interactive/batch callers and tests.
pub struct AlwaysConfirm;

#[async_trait]
impl Interact for AlwaysConfirm {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}
