//! `ActionRecord`, `RollbackStrategy`, `Transaction` — the data model
//! backing `ActionLedger` (§4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Tagged inverse-operation strategy. `None` means "cannot be rolled
/// back" — distinct from simply not attempting rollback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RollbackStrategy {
    Delete { path: String },
    Restore { backup_path: String },
    MoveBack { from: String, to: String },
    Uninstall { pkg: String },
    Reinstall { pkg: String },
    GitReset { hash: String },
    ServiceStop { name: String },
    ServiceStart { name: String },
    ContainerStopAndRemove { id: String },
    None,
}

impl RollbackStrategy {
    pub fn is_reversible(&self) -> bool {
        !matches!(self, RollbackStrategy::None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Monotonic in-process id (assigned by `ActionLedger`, not the
    /// caller — never reused even across rollback).
    pub id: u64,
    pub txn_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub action: String,
    pub args: BTreeMap<String, serde_json::Value>,
    pub result: String,
    pub reversible: bool,
    pub rollback_strategy: RollbackStrategy,
    pub rolled_back: bool,
    /// Position of the originating `Step` within its `IntentIr`, kept
    /// because completion order under concurrency need not match IR
    /// order (§5).
    pub step_index: usize,
}

impl ActionRecord {
    pub fn new(
        id: u64,
        txn_id: Uuid,
        tool: impl Into<String>,
        action: impl Into<String>,
        args: BTreeMap<String, serde_json::Value>,
        result: impl Into<String>,
        rollback_strategy: RollbackStrategy,
        step_index: usize,
    ) -> Self {
        let reversible = rollback_strategy.is_reversible();
        Self {
            id,
            txn_id,
            timestamp: Utc::now(),
            tool: tool.into(),
            action: action.into(),
            args,
            result: result.into(),
            reversible,
            rollback_strategy,
            rolled_back: false,
            step_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnStatus {
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl TxnStatus {
    /// Transitions only in_progress→{completed,failed}→(optionally)
    /// rolled_back, never reversed (§3 invariant).
    pub fn can_transition_to(self, next: TxnStatus) -> bool {
        use TxnStatus::*;
        matches!(
            (self, next),
            (InProgress, Completed)
                | (InProgress, Failed)
                | (Completed, RolledBack)
                | (Failed, RolledBack)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub user_input: String,
    pub goal: String,
    pub status: TxnStatus,
}

impl Transaction {
    pub fn start(user_input: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            start: Utc::now(),
            end: None,
            user_input: user_input.into(),
            goal: goal.into(),
            status: TxnStatus::InProgress,
        }
    }

    /// Returns an error string (not panicking) on an illegal transition,
    /// leaving `self` unchanged, so callers can surface this to the user
    /// instead of corrupting ledger state.
    pub fn transition(&mut self, next: TxnStatus) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!("illegal transition {:?} -> {:?}", self.status, next));
        }
        if matches!(next, TxnStatus::Completed | TxnStatus::Failed) {
            self.end = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_strategy_is_not_reversible() {
        assert!(!RollbackStrategy::None.is_reversible());
        assert!(RollbackStrategy::Delete { path: "/a".into() }.is_reversible());
    }

    #[test]
    fn action_record_reversible_derives_from_strategy() {
        let rec = ActionRecord::new(
            1,
            Uuid::new_v4(),
            "file_ops",
            "write_file",
            BTreeMap::new(),
            "wrote 10 bytes",
            RollbackStrategy::Delete { path: "/tmp/a".into() },
            0,
        );
        assert!(rec.reversible);
        assert!(!rec.rolled_back);
    }

    #[test]
    fn transaction_status_transitions_never_reverse() {
        let mut txn = Transaction::start("do a thing", "goal");
        assert!(txn.transition(TxnStatus::Completed).is_ok());
        assert!(txn.transition(TxnStatus::InProgress).is_err());
        assert!(txn.transition(TxnStatus::RolledBack).is_ok());
        assert!(txn.transition(TxnStatus::Completed).is_err());
    }

    #[test]
    fn failed_transaction_can_still_roll_back() {
        let mut txn = Transaction::start("x", "g");
        txn.transition(TxnStatus::Failed).unwrap();
        assert!(txn.transition(TxnStatus::RolledBack).is_ok());
    }
}
