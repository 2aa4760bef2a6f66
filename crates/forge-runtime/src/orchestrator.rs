//! `Orchestrator` (§4.9): public entry point binding components 1-9 to
//! one session. Session lifecycle (`open_session` inits every
//! singleton; each top-level call opens and closes a transaction on
//! every exit path) follows the teacher's `DagExecutor` construction
//! style generalized from "one executor per repo checkout" to "one
//! orchestrator per intent-driven-shell session".

use std::path::PathBuf;
use std::sync::Arc;

use forge_common::{ActionRecord, AuditSink, ConfigProvider, Interact, Observation, Step, ToolRegistry, Translator, TxnStatus};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::cache::{cache_key, IntentCache, IntentCacheConfig};
use crate::executor::StepExecutor;
use crate::failure_store::FailureStore;
use crate::goal_loop::{GoalLoop, GoalLoopConfig, GoalOutcome};
use crate::ledger::ActionLedger;
use crate::planner::{Planner, PlannerConfig};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RetryBudget, RetryBudgetConfig};
use crate::rollback::{Rollback, RollbackSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Direct,
    Iterative,
}

#[derive(Debug, Clone)]
pub struct AutodetectScore {
    pub score: i32,
    pub mode: ExecutionMode,
}

/// Score `input` per §4.9's heuristic table and decide direct vs.
/// iterative execution when the caller hasn't forced a mode.
pub fn autodetect(input: &str) -> AutodetectScore {
    let lower = input.to_lowercase();
    let mut score = 0i32;

    const ITERATIVE_KEYWORDS: [&str; 7] =
        ["analyze", "understand", "improve", "refactor", "optimize", "organize by", "re-organize"];
    const DIRECT_KEYWORDS: [&str; 4] = ["list", "show", "display", "status of"];
    const CLAUSE_SEPARATORS: [&str; 3] = ["then", "after", "and"];

    for kw in ITERATIVE_KEYWORDS {
        if lower.contains(kw) {
            score += 3;
        }
    }
    for sep in CLAUSE_SEPARATORS {
        if lower.split_whitespace().any(|w| w == sep) {
            score += 1;
        }
    }
    for kw in DIRECT_KEYWORDS {
        if lower.contains(kw) {
            score -= 3;
        }
    }
    if input.split_whitespace().count() > 15 {
        score += 2;
    }

    let mode = if score >= 2 { ExecutionMode::Iterative } else { ExecutionMode::Direct };
    AutodetectScore { score, mode }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub txn_id: Uuid,
    pub mode: ExecutionMode,
    pub observations: Vec<Observation>,
    pub goal_outcome: Option<GoalOutcome>,
}

/// One `RetryBudget` op class's live usage within its current window.
#[derive(Debug, Clone)]
pub struct BudgetStatus {
    pub op_class: String,
    pub used: u32,
    pub total: u32,
}

pub struct HealthReport {
    pub state_root: PathBuf,
    pub cache_entries: usize,
    pub open_circuits: Vec<String>,
    pub budgets: Vec<BudgetStatus>,
}

/// Binds every core component for one session. `Orchestrator` itself is
/// single-threaded per session (§5): callers serialize their own
/// `execute`/`rollback` calls; multiple `Orchestrator`s in one process
/// are independent.
pub struct Orchestrator {
    translator: Arc<dyn Translator>,
    registry: Arc<dyn ToolRegistry>,
    interact: Arc<dyn Interact>,

    audit: Arc<AuditLog>,
    ledger: Arc<ActionLedger>,
    failure_store: Arc<FailureStore>,
    cache: Arc<IntentCache>,
    circuit_breaker: Arc<CircuitBreaker>,
    retry_budget: Arc<RetryBudget>,

    state_root: PathBuf,
    planner_config: PlannerConfig,
    goal_loop_config: GoalLoopConfig,
    cancellation: CancellationToken,
}

impl Orchestrator {
    /// `open_session`: init every singleton from `config`. The
    /// `ToolRegistry`'s own serializing calls go through
    /// `circuit_breaker`/`retry_budget` inside `StepExecutor`'s caller
    /// (`Planner`), not here — `Orchestrator` only owns the shared
    /// state, not the dispatch loop.
    pub fn open_session(
        config: &dyn ConfigProvider,
        translator: Arc<dyn Translator>,
        registry: Arc<dyn ToolRegistry>,
        audit_sink: Box<dyn AuditSink>,
        interact: Arc<dyn Interact>,
    ) -> anyhow::Result<Self> {
        let state_root = config.state_root();
        std::fs::create_dir_all(&state_root)?;

        let audit = Arc::new(AuditLog::open(&state_root, audit_sink)?);
        let ledger = Arc::new(ActionLedger::open(&state_root)?);
        let failure_store = Arc::new(FailureStore::open(&state_root)?);
        let cache = Arc::new(IntentCache::open(
            &state_root,
            IntentCacheConfig { ttl_seconds: config.cache_ttl_seconds(), max_entries: config.cache_max_entries() },
        )?);
        let circuit_breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(config.circuit_breaker_failure_threshold())
                .with_timeout_seconds(config.circuit_breaker_timeout_seconds() as i64),
        ));
        let retry_budget = Arc::new(RetryBudget::new(
            RetryBudgetConfig::default()
                .with_max_attempts(config.retry_max_attempts())
                .with_initial_delay_seconds(config.retry_initial_delay_seconds())
                .with_max_delay_seconds(config.retry_max_delay_seconds())
                .with_exponential_base(config.retry_exponential_base())
                .with_jitter(config.retry_jitter()),
        ));

        Ok(Self {
            translator,
            registry,
            interact,
            audit,
            ledger,
            failure_store,
            cache,
            circuit_breaker,
            retry_budget,
            state_root,
            planner_config: PlannerConfig { worker_pool_size: config.planner_worker_pool() },
            goal_loop_config: GoalLoopConfig {
                max_iterations: config.goal_loop_max_iterations(),
                batch_size: config.goal_loop_batch_size(),
                stuck_threshold: config.goal_loop_stuck_threshold(),
            },
            cancellation: CancellationToken::new(),
        })
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    fn build_planner(&self) -> Planner {
        let executor = Arc::new(StepExecutor::new(self.registry.clone(), self.audit.clone(), self.ledger.clone()));
        Planner::new(
            executor,
            self.failure_store.clone(),
            self.retry_budget.clone(),
            self.circuit_breaker.clone(),
            self.interact.clone(),
            self.planner_config.clone(),
        )
    }

    /// `execute(input) -> ExecutionResult`: translate-then-plan,
    /// autodetecting `GoalLoop` unless `force_mode` is given.
    #[instrument(skip(self, input))]
    pub async fn execute(&self, input: &str, context_fingerprint: &str, force_mode: Option<ExecutionMode>) -> anyhow::Result<ExecutionResult> {
        let mode = force_mode.unwrap_or_else(|| autodetect(input).mode);
        match mode {
            ExecutionMode::Direct => self.execute_direct(input, context_fingerprint).await,
            ExecutionMode::Iterative => self.execute_iterative(input, None).await,
        }
    }

    async fn execute_direct(&self, input: &str, context_fingerprint: &str) -> anyhow::Result<ExecutionResult> {
        let mut txn = Transaction::start(input, input);
        let txn_id = txn.id;
        self.ledger.begin_transaction(&txn)?;

        if self.cancellation.is_cancelled() {
            self.close_transaction(&mut txn, TxnStatus::Failed);
            return Ok(ExecutionResult { txn_id, mode: ExecutionMode::Direct, observations: vec![], goal_outcome: None });
        }

        let key = cache_key(input, context_fingerprint);
        let translator = self.translator.clone();
        let input_owned = input.to_string();
        let ir = match self
            .cache
            .get_or_compute(&key, || async move {
                translator.translate(&input_owned, "").await.map_err(anyhow::Error::from)
            })
            .await
        {
            Ok(ir) => ir,
            Err(e) => {
                self.close_transaction(&mut txn, TxnStatus::Failed);
                return Err(e);
            }
        };

        let planner = self.build_planner();
        let observations = match planner.run(&ir, txn_id, self.registry.as_ref()).await {
            Ok(obs) => obs,
            Err(e) => {
                self.close_transaction(&mut txn, TxnStatus::Failed);
                return Err(e);
            }
        };

        let status = if observations.iter().all(|o| o.is_ok()) { TxnStatus::Completed } else { TxnStatus::Failed };
        self.close_transaction(&mut txn, status);
        Ok(ExecutionResult { txn_id, mode: ExecutionMode::Direct, observations, goal_outcome: None })
    }

    /// Transition `txn` and persist it — every `execute_*` exit path
    /// (including cancellation) runs through here so no transaction is
    /// ever left `in_progress` (§3/§4.9).
    fn close_transaction(&self, txn: &mut Transaction, status: TxnStatus) {
        if let Err(e) = txn.transition(status) {
            tracing::warn!(error = %e, "illegal transaction transition");
            return;
        }
        if let Err(e) = self.ledger.update_transaction(txn) {
            tracing::warn!(error = %e, "failed to persist transaction transition");
        }
    }

    /// `execute_iterative(input, max_iter?)`: force `GoalLoop`.
    #[instrument(skip(self, input))]
    pub async fn execute_iterative(&self, input: &str, max_iter: Option<u32>) -> anyhow::Result<ExecutionResult> {
        let mut txn = Transaction::start(input, input);
        let txn_id = txn.id;
        self.ledger.begin_transaction(&txn)?;

        if self.cancellation.is_cancelled() {
            self.close_transaction(&mut txn, TxnStatus::Failed);
            return Ok(ExecutionResult { txn_id, mode: ExecutionMode::Iterative, observations: vec![], goal_outcome: None });
        }

        let mut config = self.goal_loop_config.clone();
        if let Some(max_iter) = max_iter {
            config.max_iterations = max_iter;
        }

        let goal_loop = GoalLoop::new(self.translator.clone(), self.interact.clone(), config);
        let registry = self.registry.clone();
        let planner_config = self.planner_config.clone();
        let executor = Arc::new(StepExecutor::new(self.registry.clone(), self.audit.clone(), self.ledger.clone()));
        let failure_store = self.failure_store.clone();
        let retry_budget = self.retry_budget.clone();
        let circuit_breaker = self.circuit_breaker.clone();
        let interact = self.interact.clone();
        let cancellation = self.cancellation.clone();

        let result = goal_loop
            .run(input, txn_id, move |ir, txn| {
                let planner = Planner::new(
                    executor.clone(),
                    failure_store.clone(),
                    retry_budget.clone(),
                    circuit_breaker.clone(),
                    interact.clone(),
                    planner_config.clone(),
                );
                let registry = registry.clone();
                let cancellation = cancellation.clone();
                async move {
                    if cancellation.is_cancelled() {
                        return Ok(vec![]);
                    }
                    planner.run(&ir, txn, registry.as_ref()).await
                }
            })
            .await;

        let (outcome, observations) = match result {
            Ok(v) => v,
            Err(e) => {
                self.close_transaction(&mut txn, TxnStatus::Failed);
                return Err(e);
            }
        };

        let status = if matches!(outcome, GoalOutcome::Complete { .. }) { TxnStatus::Completed } else { TxnStatus::Failed };
        self.close_transaction(&mut txn, status);
        Ok(ExecutionResult { txn_id, mode: ExecutionMode::Iterative, observations, goal_outcome: Some(outcome) })
    }

    pub async fn rollback(&self, n: usize) -> anyhow::Result<RollbackSummary> {
        let executor = Arc::new(StepExecutor::new(self.registry.clone(), self.audit.clone(), self.ledger.clone()));
        let rollback = Rollback::new(self.ledger.clone(), executor);
        rollback.rollback(n).await
    }

    pub fn rollback_preview(&self, n: usize) -> anyhow::Result<Vec<(ActionRecord, Option<Step>)>> {
        let executor = Arc::new(StepExecutor::new(self.registry.clone(), self.audit.clone(), self.ledger.clone()));
        let rollback = Rollback::new(self.ledger.clone(), executor);
        rollback.preview(n)
    }

    pub fn history(&self, tool_filter: Option<&str>) -> anyhow::Result<Vec<ActionRecord>> {
        self.ledger.history(tool_filter)
    }

    /// Reads live `ResilienceKit` state: `self.circuit_breaker`'s tracked
    /// services and `self.retry_budget`'s tracked op classes, not a
    /// placeholder (spec.md §4.9's `{circuits, budgets, cache}` contract).
    pub fn health(&self) -> HealthReport {
        let budgets = self
            .retry_budget
            .all_states()
            .into_iter()
            .map(|s| BudgetStatus { op_class: s.op_class, used: s.budget_used, total: s.budget_total })
            .collect();
        HealthReport {
            state_root: self.state_root.clone(),
            cache_entries: self.cache.len(),
            open_circuits: self.circuit_breaker.open_services(),
            budgets,
        }
    }

    /// Every transaction recorded this session's ledger, newest first
    /// (§3/§4.9 Transaction entity — backs `history`/`health`).
    pub fn transactions(&self) -> anyhow::Result<Vec<Transaction>> {
        self.ledger.list_transactions()
    }
}

/// Re-exported so callers of `orchestrator` don't need a separate
/// `forge_common::Transaction` import to read `transactions()`'s results.
pub use forge_common::Transaction;

pub fn transaction_failed(status: TxnStatus) -> bool {
    matches!(status, TxnStatus::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterative_keywords_raise_score_above_threshold() {
        let result = autodetect("analyze the codebase and refactor the auth module");
        assert_eq!(result.mode, ExecutionMode::Iterative);
    }

    #[test]
    fn direct_keywords_lower_score_below_threshold() {
        let result = autodetect("list files");
        assert_eq!(result.mode, ExecutionMode::Direct);
    }

    #[test]
    fn long_input_without_keywords_still_counts_toward_iterative() {
        let long = "please go through each of the twenty modules in this repository one at a time";
        let result = autodetect(long);
        assert!(result.score >= 2);
    }
}
