//! Rollback orchestration (§4.4): turns recorded `ActionRecord`s back
//! into inverse `Step`s and runs them through `StepExecutor` without
//! re-recording them as new reversible actions.

use std::sync::Arc;

use forge_common::ActionRecord;
use uuid::Uuid;

use crate::executor::StepExecutor;
use crate::ledger::{inverse_step, ActionLedger};

#[derive(Debug, Clone)]
pub struct RollbackOutcome {
    pub record_id: u64,
    pub tool: String,
    pub action: String,
    pub inverted: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct RollbackSummary {
    pub outcomes: Vec<RollbackOutcome>,
}

impl RollbackSummary {
    pub fn all_inverted(&self) -> bool {
        self.outcomes.iter().all(|o| o.inverted)
    }
}

pub struct Rollback {
    ledger: Arc<ActionLedger>,
    executor: Arc<StepExecutor>,
}

impl Rollback {
    pub fn new(ledger: Arc<ActionLedger>, executor: Arc<StepExecutor>) -> Self {
        Self { ledger, executor }
    }

    /// Planned inverse ops for the last `n` reversible records, without
    /// executing them (§4.4: required before interactive rollback).
    pub fn preview(&self, n: usize) -> anyhow::Result<Vec<(ActionRecord, Option<forge_common::Step>)>> {
        let records = self.ledger.last_n_reversible(n)?;
        Ok(records
            .into_iter()
            .map(|r| {
                let step = inverse_step(&r.rollback_strategy);
                (r, step)
            })
            .collect())
    }

    /// Roll back the last `n` reversible, not-yet-rolled-back actions,
    /// newest first. Continues past individual failures and reports a
    /// summary (§4.4 step 4).
    pub async fn rollback(&self, n: usize) -> anyhow::Result<RollbackSummary> {
        let records = self.ledger.last_n_reversible(n)?;
        self.apply(records).await
    }

    /// Roll back every reversible record belonging to one transaction,
    /// newest first ("rollback last transaction").
    pub async fn rollback_transaction(&self, txn_id: Uuid) -> anyhow::Result<RollbackSummary> {
        let records = self.ledger.reversible_for_txn(txn_id)?;
        self.apply(records).await
    }

    async fn apply(&self, records: Vec<ActionRecord>) -> anyhow::Result<RollbackSummary> {
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            let Some(step) = inverse_step(&record.rollback_strategy) else {
                outcomes.push(RollbackOutcome {
                    record_id: record.id,
                    tool: record.tool.clone(),
                    action: record.action.clone(),
                    inverted: false,
                    detail: "rollback strategy is `none`; cannot invert".to_string(),
                });
                continue;
            };

            let observation = self
                .executor
                .execute_without_recording(&step, record.txn_id, record.step_index)
                .await;

            if observation.is_ok() {
                self.ledger.mark_rolled_back(record.id)?;
                outcomes.push(RollbackOutcome {
                    record_id: record.id,
                    tool: record.tool.clone(),
                    action: record.action.clone(),
                    inverted: true,
                    detail: "inverted successfully".to_string(),
                });
            } else {
                outcomes.push(RollbackOutcome {
                    record_id: record.id,
                    tool: record.tool.clone(),
                    action: record.action.clone(),
                    inverted: false,
                    detail: observation
                        .error_kind
                        .map(|e| e.kind_name().to_string())
                        .unwrap_or_else(|| "unknown failure".to_string()),
                });
            }
        }
        Ok(RollbackSummary { outcomes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use forge_common::{CoreError, NullAuditSink, Risk, RollbackStrategy, Step, ToolInvocationResult, ToolRegistry};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct FakeRegistry;

    #[async_trait]
    impl ToolRegistry for FakeRegistry {
        async fn invoke(
            &self,
            tool: &str,
            _action: &str,
            _args: &BTreeMap<String, serde_json::Value>,
        ) -> Result<ToolInvocationResult, CoreError> {
            if tool == "fails_to_undo" {
                return Err(CoreError::Fatal { message: "cannot undo".into() });
            }
            Ok(ToolInvocationResult {
                stdout: "undone".into(),
                stderr: String::new(),
                rollback_strategy: RollbackStrategy::None,
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

    fn harness() -> (Rollback, Arc<ActionLedger>, TempDir) {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(ActionLedger::open(dir.path()).unwrap());
        let audit = Arc::new(crate::audit::AuditLog::open(dir.path(), Box::new(NullAuditSink)).unwrap());
        let executor = Arc::new(StepExecutor::new(Arc::new(FakeRegistry), audit, ledger.clone()));
        (Rollback::new(ledger.clone(), executor), ledger, dir)
    }

    #[tokio::test]
    async fn rollback_inverts_and_marks_original_rolled_back() {
        let (rollback, ledger, _dir) = harness();
        let txn = Uuid::new_v4();
        let step = Step::new("file_ops", "write_file", Risk::Modify);
        ledger
            .record(txn, &step.tool, &step.action, step.args.clone(), "ok", RollbackStrategy::Delete { path: "/a".into() }, 0)
            .unwrap();

        let summary = rollback.rollback(1).await.unwrap();
        assert!(summary.all_inverted());
        assert!(ledger.last_n_reversible(5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn none_strategy_is_skipped_and_reported() {
        let (rollback, ledger, _dir) = harness();
        let txn = Uuid::new_v4();
        ledger
            .record(txn, "file_ops", "read_file", BTreeMap::new(), "ok", RollbackStrategy::None, 0)
            .unwrap();
        // RollbackStrategy::None records aren't reversible so they never
        // surface from last_n_reversible; simulate the edge case directly
        // via preview instead.
        let preview = rollback.preview(5).unwrap();
        assert!(preview.is_empty(), "None-strategy records are filtered at the reversible query");
    }

    #[tokio::test]
    async fn failed_inverse_leaves_original_not_rolled_back() {
        let (rollback, ledger, _dir) = harness();
        let txn = Uuid::new_v4();
        ledger
            .record(txn, "fails_to_undo", "write_file", BTreeMap::new(), "ok", RollbackStrategy::Delete { path: "/a".into() }, 0)
            .unwrap();
        let summary = rollback.rollback(1).await.unwrap();
        assert!(!summary.all_inverted());
        assert_eq!(ledger.last_n_reversible(5).unwrap().len(), 1, "failed inverse must stay pending");
    }
}
