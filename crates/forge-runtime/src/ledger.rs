//! `ActionLedger` (§4.4): transaction-grouped reversible operations,
//! persisted to `actions.db` (SQLite), supporting range scans by
//! insertion order and by `txn_id`.
//!
//! Grounded on the teacher's `dag::scheduler::DagScheduler` mutation-
//! method density (`mark_running`/`mark_completed`/...) generalized to
//! ledger row mutations, and `tracker::git::GitTracker` for the
//! `git_reset` inverse strategy.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use forge_common::{ActionRecord, RollbackStrategy, Risk, Step, Transaction, TxnStatus};
use rusqlite::{Connection, params};
use uuid::Uuid;

pub struct ActionLedger {
    conn: Mutex<Connection>,
    next_id: AtomicU64,
}

impl ActionLedger {
    pub fn open(state_root: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(state_root)?;
        let conn = Connection::open(state_root.join("actions.db"))?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS actions (
                id INTEGER PRIMARY KEY,
                txn_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                tool TEXT NOT NULL,
                action TEXT NOT NULL,
                args TEXT NOT NULL,
                result TEXT NOT NULL,
                reversible INTEGER NOT NULL,
                rollback_strategy TEXT NOT NULL,
                rolled_back INTEGER NOT NULL,
                step_index INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_actions_txn ON actions(txn_id);
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                start TEXT NOT NULL,
                end_ts TEXT,
                user_input TEXT NOT NULL,
                goal TEXT NOT NULL,
                status TEXT NOT NULL
            );",
        )?;
        let next_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(id), -1) + 1 FROM actions",
            [],
            |r| r.get(0),
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            next_id: AtomicU64::new(next_id as u64),
        })
    }

    /// Record one action. Only called by `StepExecutor` for mutating,
    /// successful steps (§3 invariant); reads never produce records.
    pub fn record(
        &self,
        txn_id: Uuid,
        tool: &str,
        action: &str,
        args: std::collections::BTreeMap<String, serde_json::Value>,
        result: &str,
        rollback_strategy: RollbackStrategy,
        step_index: usize,
    ) -> anyhow::Result<ActionRecord> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = ActionRecord::new(id, txn_id, tool, action, args, result, rollback_strategy, step_index);
        let conn = self.conn.lock().expect("actions db poisoned");
        conn.execute(
            "INSERT INTO actions (id, txn_id, timestamp, tool, action, args, result, reversible,
             rollback_strategy, rolled_back, step_index)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id as i64,
                record.txn_id.to_string(),
                record.timestamp.to_rfc3339(),
                record.tool,
                record.action,
                serde_json::to_string(&record.args)?,
                record.result,
                record.reversible as i64,
                serde_json::to_string(&record.rollback_strategy)?,
                record.rolled_back as i64,
                record.step_index as i64,
            ],
        )?;
        Ok(record)
    }

    /// Last `n` reversible, not-yet-rolled-back records, newest first.
    pub fn last_n_reversible(&self, n: usize) -> anyhow::Result<Vec<ActionRecord>> {
        let conn = self.conn.lock().expect("actions db poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, txn_id, timestamp, tool, action, args, result, reversible,
             rollback_strategy, rolled_back, step_index
             FROM actions WHERE reversible = 1 AND rolled_back = 0
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![n as i64], row_to_record)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// All reversible, not-rolled-back records for a transaction, newest
    /// first — "rollback last transaction".
    pub fn reversible_for_txn(&self, txn_id: Uuid) -> anyhow::Result<Vec<ActionRecord>> {
        let conn = self.conn.lock().expect("actions db poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, txn_id, timestamp, tool, action, args, result, reversible,
             rollback_strategy, rolled_back, step_index
             FROM actions WHERE txn_id = ?1 AND reversible = 1 AND rolled_back = 0
             ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![txn_id.to_string()], row_to_record)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn mark_rolled_back(&self, id: u64) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("actions db poisoned");
        conn.execute(
            "UPDATE actions SET rolled_back = 1 WHERE id = ?1",
            params![id as i64],
        )?;
        Ok(())
    }

    pub fn history(&self, tool_filter: Option<&str>) -> anyhow::Result<Vec<ActionRecord>> {
        let conn = self.conn.lock().expect("actions db poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, txn_id, timestamp, tool, action, args, result, reversible,
             rollback_strategy, rolled_back, step_index
             FROM actions WHERE ?1 IS NULL OR tool = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![tool_filter], row_to_record)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Persist a freshly `Transaction::start`-ed transaction, `in_progress`
    /// (§3/§4.9 — every exit path later calls `update_transaction`).
    pub fn begin_transaction(&self, txn: &Transaction) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("actions db poisoned");
        conn.execute(
            "INSERT INTO transactions (id, start, end_ts, user_input, goal, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                txn.id.to_string(),
                txn.start.to_rfc3339(),
                txn.end.map(|e| e.to_rfc3339()),
                txn.user_input,
                txn.goal,
                status_str(txn.status),
            ],
        )?;
        Ok(())
    }

    /// Persist the transition already applied in-memory via
    /// `Transaction::transition` — called on every `execute_*` exit path.
    pub fn update_transaction(&self, txn: &Transaction) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("actions db poisoned");
        conn.execute(
            "UPDATE transactions SET end_ts = ?1, status = ?2 WHERE id = ?3",
            params![txn.end.map(|e| e.to_rfc3339()), status_str(txn.status), txn.id.to_string()],
        )?;
        Ok(())
    }

    pub fn get_transaction(&self, id: Uuid) -> anyhow::Result<Option<Transaction>> {
        let conn = self.conn.lock().expect("actions db poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, start, end_ts, user_input, goal, status FROM transactions WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_transaction(row)?)),
            None => Ok(None),
        }
    }

    /// All transactions, newest first — backs `health()`/`history()`'s
    /// transaction view.
    pub fn list_transactions(&self) -> anyhow::Result<Vec<Transaction>> {
        let conn = self.conn.lock().expect("actions db poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, start, end_ts, user_input, goal, status FROM transactions ORDER BY start DESC",
        )?;
        let rows = stmt.query_map([], row_to_transaction)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

fn status_str(status: TxnStatus) -> &'static str {
    match status {
        TxnStatus::InProgress => "in_progress",
        TxnStatus::Completed => "completed",
        TxnStatus::Failed => "failed",
        TxnStatus::RolledBack => "rolled_back",
    }
}

fn parse_status(s: &str) -> TxnStatus {
    match s {
        "completed" => TxnStatus::Completed,
        "failed" => TxnStatus::Failed,
        "rolled_back" => TxnStatus::RolledBack,
        _ => TxnStatus::InProgress,
    }
}

fn row_to_transaction(r: &rusqlite::Row) -> rusqlite::Result<Transaction> {
    let start: String = r.get(1)?;
    let end: Option<String> = r.get(2)?;
    let status: String = r.get(5)?;
    Ok(Transaction {
        id: Uuid::parse_str(&r.get::<_, String>(0)?).unwrap(),
        start: DateTime::parse_from_rfc3339(&start).unwrap().with_timezone(&Utc),
        end: end.map(|e| DateTime::parse_from_rfc3339(&e).unwrap().with_timezone(&Utc)),
        user_input: r.get(3)?,
        goal: r.get(4)?,
        status: parse_status(&status),
    })
}

fn row_to_record(r: &rusqlite::Row) -> rusqlite::Result<ActionRecord> {
    let ts: String = r.get(2)?;
    let args_json: String = r.get(5)?;
    let strategy_json: String = r.get(8)?;
    Ok(ActionRecord {
        id: r.get::<_, i64>(0)? as u64,
        txn_id: Uuid::parse_str(&r.get::<_, String>(1)?).unwrap(),
        timestamp: DateTime::parse_from_rfc3339(&ts).unwrap().with_timezone(&Utc),
        tool: r.get(3)?,
        action: r.get(4)?,
        args: serde_json::from_str(&args_json).unwrap(),
        result: r.get(6)?,
        reversible: r.get::<_, i64>(7)? != 0,
        rollback_strategy: serde_json::from_str(&strategy_json).unwrap(),
        rolled_back: r.get::<_, i64>(9)? != 0,
        step_index: r.get::<_, i64>(10)? as usize,
    })
}

/// Map a `RollbackStrategy` to the ordinary `Step` that inverts it.
/// Inverses go through `StepExecutor` like any other step (§4.4 step 3)
/// but are not themselves recorded as new reversible `ActionRecord`s.
pub fn inverse_step(strategy: &RollbackStrategy) -> Option<Step> {
    match strategy {
        RollbackStrategy::Delete { path } => Some(
            Step::new("file_ops", "delete", Risk::Modify).with_arg("path", serde_json::json!(path)),
        ),
        RollbackStrategy::Restore { backup_path } => Some(
            Step::new("file_ops", "restore", Risk::Modify)
                .with_arg("backup_path", serde_json::json!(backup_path)),
        ),
        RollbackStrategy::MoveBack { from, to } => Some(
            Step::new("file_ops", "move", Risk::Modify)
                .with_arg("from", serde_json::json!(to))
                .with_arg("to", serde_json::json!(from)),
        ),
        RollbackStrategy::Uninstall { pkg } => Some(
            Step::new("package_manager", "uninstall", Risk::Significant)
                .with_arg("pkg", serde_json::json!(pkg)),
        ),
        RollbackStrategy::Reinstall { pkg } => Some(
            Step::new("package_manager", "install", Risk::Significant)
                .with_arg("pkg", serde_json::json!(pkg)),
        ),
        RollbackStrategy::GitReset { hash } => Some(
            Step::new("vcs", "git_reset", Risk::Significant).with_arg("hash", serde_json::json!(hash)),
        ),
        RollbackStrategy::ServiceStop { name } => Some(
            Step::new("service_ctl", "stop", Risk::Significant).with_arg("name", serde_json::json!(name)),
        ),
        RollbackStrategy::ServiceStart { name } => Some(
            Step::new("service_ctl", "start", Risk::Significant).with_arg("name", serde_json::json!(name)),
        ),
        RollbackStrategy::ContainerStopAndRemove { id } => Some(
            Step::new("container_ctl", "stop_and_remove", Risk::Significant)
                .with_arg("id", serde_json::json!(id)),
        ),
        RollbackStrategy::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn record_and_query_last_n_reversible() {
        let ledger = ActionLedger::in_memory().unwrap();
        let txn = Uuid::new_v4();
        ledger
            .record(txn, "file_ops", "write_file", BTreeMap::new(), "ok", RollbackStrategy::Delete { path: "/a".into() }, 0)
            .unwrap();
        ledger
            .record(txn, "file_ops", "write_file", BTreeMap::new(), "ok", RollbackStrategy::None, 1)
            .unwrap();
        ledger
            .record(txn, "file_ops", "write_file", BTreeMap::new(), "ok", RollbackStrategy::Delete { path: "/b".into() }, 2)
            .unwrap();

        let reversible = ledger.last_n_reversible(5).unwrap();
        // The RollbackStrategy::None record must never appear.
        assert_eq!(reversible.len(), 2);
        assert_eq!(reversible[0].step_index, 2, "newest first");
        assert_eq!(reversible[1].step_index, 0);
    }

    #[test]
    fn mark_rolled_back_excludes_from_future_queries() {
        let ledger = ActionLedger::in_memory().unwrap();
        let txn = Uuid::new_v4();
        let rec = ledger
            .record(txn, "file_ops", "write_file", BTreeMap::new(), "ok", RollbackStrategy::Delete { path: "/a".into() }, 0)
            .unwrap();
        ledger.mark_rolled_back(rec.id).unwrap();
        assert!(ledger.last_n_reversible(5).unwrap().is_empty());
    }

    #[test]
    fn inverse_step_none_for_none_strategy() {
        assert!(inverse_step(&RollbackStrategy::None).is_none());
    }

    #[test]
    fn inverse_step_move_back_swaps_from_and_to() {
        let step = inverse_step(&RollbackStrategy::MoveBack { from: "/a".into(), to: "/b".into() }).unwrap();
        assert_eq!(step.arg_str("from"), Some("/b"));
        assert_eq!(step.arg_str("to"), Some("/a"));
    }

    #[test]
    fn transaction_round_trips_through_storage() {
        let ledger = ActionLedger::in_memory().unwrap();
        let mut txn = Transaction::start("mkdir /tmp/x", "create a directory");
        ledger.begin_transaction(&txn).unwrap();
        txn.transition(TxnStatus::Completed).unwrap();
        ledger.update_transaction(&txn).unwrap();

        let fetched = ledger.get_transaction(txn.id).unwrap().unwrap();
        assert_eq!(fetched.status, TxnStatus::Completed);
        assert!(fetched.end.is_some());
        assert_eq!(fetched.user_input, "mkdir /tmp/x");
    }

    #[test]
    fn list_transactions_returns_every_stored_transaction() {
        let ledger = ActionLedger::in_memory().unwrap();
        let a = Transaction::start("a", "g");
        let b = Transaction::start("b", "g");
        ledger.begin_transaction(&a).unwrap();
        ledger.begin_transaction(&b).unwrap();
        assert_eq!(ledger.list_transactions().unwrap().len(), 2);
    }

    #[test]
    fn reversible_for_txn_scopes_to_transaction() {
        let ledger = ActionLedger::in_memory().unwrap();
        let txn_a = Uuid::new_v4();
        let txn_b = Uuid::new_v4();
        ledger
            .record(txn_a, "file_ops", "write_file", BTreeMap::new(), "ok", RollbackStrategy::Delete { path: "/a".into() }, 0)
            .unwrap();
        ledger
            .record(txn_b, "file_ops", "write_file", BTreeMap::new(), "ok", RollbackStrategy::Delete { path: "/b".into() }, 0)
            .unwrap();
        let scoped = ledger.reversible_for_txn(txn_a).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].txn_id, txn_a);
    }
}
