//! `StepExecutor` (§4.2): invoke one step via `ToolRegistry`, classify
//! the result, and record it. Mirrors the teacher's
//! `orchestrator::runner::ClaudeRunner::run_iteration` shape, generalized
//! from "invoke the Claude CLI" to "invoke a `ToolRegistry` entry" — the
//! subprocess-vs-in-process decision belongs to the registry
//! implementation, not here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use forge_common::{ActionRecord, Observation, RollbackStrategy, Step, ToolRegistry};
use sha2::{Digest, Sha256};
use tracing::instrument;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLog};
use crate::ledger::ActionLedger;
use crate::resilience::{FallbackChain, FallbackOption};
use forge_common::{CoreError, ToolInvocationResult};

pub struct StepExecutor {
    registry: Arc<dyn ToolRegistry>,
    audit: Arc<AuditLog>,
    ledger: Arc<ActionLedger>,
}

fn args_digest(args: &BTreeMap<String, serde_json::Value>) -> String {
    let json = serde_json::to_string(args).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}

impl StepExecutor {
    pub fn new(registry: Arc<dyn ToolRegistry>, audit: Arc<AuditLog>, ledger: Arc<ActionLedger>) -> Self {
        Self { registry, audit, ledger }
    }

    /// Public entry point: execute `step`, always recording a reversible
    /// mutation to the ledger.
    #[instrument(skip(self, step), fields(tool = %step.tool, action = %step.action))]
    pub async fn execute(&self, step: &Step, txn_id: Uuid, step_index: usize) -> Observation {
        self.execute_inner(step, txn_id, step_index, true).await
    }

    /// Rollback-only entry point: run the inverse step without creating a
    /// new ledger record (§4.4 step 3 — the caller marks the original
    /// `rolled_back=true` itself).
    pub async fn execute_without_recording(&self, step: &Step, txn_id: Uuid, step_index: usize) -> Observation {
        self.execute_inner(step, txn_id, step_index, false).await
    }

    async fn execute_inner(&self, step: &Step, txn_id: Uuid, step_index: usize, record: bool) -> Observation {
        let start = Instant::now();
        let digest = args_digest(&step.args);

        let result = self.invoke_with_fallback(step).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let observation = match result {
            Ok(invocation) => {
                if record && invocation.rollback_strategy.is_reversible() {
                    if let Err(e) = self.ledger.record(
                        txn_id,
                        &step.tool,
                        &step.action,
                        step.args.clone(),
                        &invocation.stdout,
                        invocation.rollback_strategy.clone(),
                        step_index,
                    ) {
                        tracing::warn!(error = %e, "failed to persist action record");
                    }
                }
                Observation::ok(step_index, &invocation.stdout, invocation.stderr.clone(), elapsed_ms, digest.clone())
            }
            Err(e) => Observation::failed(step_index, "", String::new(), e, elapsed_ms, digest.clone()),
        };

        self.append_audit(step, txn_id, &observation);
        observation
    }

    /// `network_ops.download` is the one tool class the spec's `FallbackChain`
    /// (CASCADE: priority-ordered options, first non-erroring wins, §4.5) has
    /// somewhere real to attach to — a step carrying a `mirrors` array tries
    /// the primary `url` first, then each mirror in order, via the registry
    /// it already has. Every other `(tool, action)` pair bypasses the chain
    /// entirely and goes straight through.
    async fn invoke_with_fallback(&self, step: &Step) -> Result<ToolInvocationResult, CoreError> {
        if step.tool == "network_ops" && step.action == "download" {
            if let Some(mirrors) = step.args.get("mirrors").and_then(|v| v.as_array()) {
                if !mirrors.is_empty() {
                    let mut options = vec![self.download_option("primary", step.args.clone())];
                    for (i, mirror) in mirrors.iter().enumerate() {
                        if let Some(url) = mirror.as_str() {
                            let mut args = step.args.clone();
                            args.insert("url".to_string(), serde_json::Value::String(url.to_string()));
                            options.push(self.download_option(format!("mirror-{i}"), args));
                        }
                    }
                    return FallbackChain::new(options).run().await;
                }
            }
        }
        self.registry.invoke(&step.tool, &step.action, &step.args).await
    }

    fn download_option(&self, name: impl Into<String>, args: BTreeMap<String, serde_json::Value>) -> FallbackOption<ToolInvocationResult> {
        let registry = self.registry.clone();
        FallbackOption::new(name, move || {
            let registry = registry.clone();
            let args = args.clone();
            async move { registry.invoke("network_ops", "download", &args).await }
        })
    }

    fn append_audit(&self, step: &Step, txn_id: Uuid, observation: &Observation) {
        let entry = AuditEntry {
            seq: 0,
            ts: Utc::now(),
            txn_id,
            tool: step.tool.clone(),
            action: step.action.clone(),
            args: serde_json::to_value(&step.args).unwrap_or(serde_json::Value::Null),
            outcome: format!("{:?}", observation.outcome).to_lowercase(),
            error_kind: observation.error_kind.as_ref().map(|e| e.kind_name().to_string()),
            stdout_tail: observation.truncated_stdout.clone(),
            stderr: observation.stderr.clone(),
            elapsed_ms: observation.elapsed_ms,
        };
        if let Err(e) = self.audit.append(entry) {
            tracing::warn!(error = %e, "failed to append audit entry");
        }
    }
}

/// Used only by `ledger::row_to_record`'s record(); kept here so
/// `executor.rs` doesn't need to reach into `ledger` internals to build
/// an `ActionRecord` preview for `rollback::preview`.
pub fn preview_record(record: &ActionRecord) -> String {
    format!("{} {} (txn {})", record.tool, record.action, record.txn_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use forge_common::{CoreError, NullAuditSink, Risk, ToolInvocationResult};
    use tempfile::TempDir;

    struct EchoRegistry;

    #[async_trait]
    impl ToolRegistry for EchoRegistry {
        async fn invoke(
            &self,
            tool: &str,
            action: &str,
            args: &BTreeMap<String, serde_json::Value>,
        ) -> Result<ToolInvocationResult, CoreError> {
            if tool == "broken" {
                return Err(CoreError::NotFound { message: format!("no such tool {tool}") });
            }
            if tool == "network_ops" && action == "download" {
                let url = args.get("url").and_then(|v| v.as_str()).unwrap_or_default();
                if url.contains("unreachable") {
                    return Err(CoreError::Transient { message: format!("{url} unreachable") });
                }
            }
            Ok(ToolInvocationResult {
                stdout: format!("{tool}.{action} ok"),
                stderr: String::new(),
                rollback_strategy: RollbackStrategy::Delete { path: "/tmp/x".into() },
            })
        }

        fn is_serializing_class(&self, _tool: &str) -> bool {
            false
        }

        fn resource_touches(
            &self,
            _tool: &str,
            _action: &str,
            _args: &BTreeMap<String, serde_json::Value>,
        ) -> Vec<forge_common::ResourceTouch> {
            vec![]
        }
    }

    fn harness() -> (StepExecutor, TempDir) {
        let dir = TempDir::new().unwrap();
        let audit = Arc::new(AuditLog::open(dir.path(), Box::new(NullAuditSink)).unwrap());
        let ledger = Arc::new(ActionLedger::open(dir.path()).unwrap());
        (StepExecutor::new(Arc::new(EchoRegistry), audit, ledger), dir)
    }

    #[tokio::test]
    async fn successful_step_is_recorded_to_ledger_and_audit() {
        let (exec, _dir) = harness();
        let txn = Uuid::new_v4();
        let step = Step::new("file_ops", "write_file", Risk::Modify);
        let obs = exec.execute(&step, txn, 0).await;
        assert!(obs.is_ok());
        let history = exec.ledger.history(None).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_yields_failed_observation_without_panicking() {
        let (exec, _dir) = harness();
        let txn = Uuid::new_v4();
        let step = Step::new("broken", "anything", Risk::ReadOnly);
        let obs = exec.execute(&step, txn, 0).await;
        assert!(!obs.is_ok());
        assert!(obs.error_kind.is_some());
    }

    #[tokio::test]
    async fn download_falls_back_to_mirror_when_primary_url_is_unreachable() {
        let (exec, _dir) = harness();
        let txn = Uuid::new_v4();
        let mut step = Step::new("network_ops", "download", Risk::Modify)
            .with_arg("url", "https://unreachable.example.com/x".into());
        step = step.with_arg("mirrors", serde_json::json!(["https://mirror.example.com/x"]));
        let obs = exec.execute(&step, txn, 0).await;
        assert!(obs.is_ok());
    }

    #[tokio::test]
    async fn download_without_mirrors_skips_fallback_chain() {
        let (exec, _dir) = harness();
        let txn = Uuid::new_v4();
        let step = Step::new("network_ops", "download", Risk::Modify)
            .with_arg("url", "https://unreachable.example.com/x".into());
        let obs = exec.execute(&step, txn, 0).await;
        assert!(!obs.is_ok());
    }

    #[tokio::test]
    async fn rollback_invocations_do_not_create_new_ledger_records() {
        let (exec, _dir) = harness();
        let txn = Uuid::new_v4();
        let step = Step::new("file_ops", "delete", Risk::Modify);
        exec.execute_without_recording(&step, txn, 0).await;
        assert!(exec.ledger.history(None).unwrap().is_empty());
    }
}
