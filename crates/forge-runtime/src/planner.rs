//! `Planner` (§4.7): pre-flight confirmation gating, dependency
//! analysis, then level-by-level bounded-concurrency dispatch.
//!
//! The semaphore-permits + `tokio::spawn` + `mpsc` result channel,
//! block-on-current-level-before-next dispatch loop is grounded
//! directly on `dag::executor::DagExecutor::execute`, simplified from
//! its fully dynamic ready-queue (the source recomputes readiness after
//! every completion) to strict level-by-level waves, since
//! `DependencyAnalyzer` already computes the full level partition
//! up front (§4.1).

use std::sync::Arc;

use forge_common::{CoreError, Interact, IntentIr, Observation};
use tokio::sync::{mpsc, Semaphore};
use tracing::instrument;
use uuid::Uuid;

use crate::dependency_analyzer::{self, Plan};
use crate::executor::StepExecutor;
use crate::failure_store::FailureStore;
use crate::resilience::{CircuitBreaker, RetryBudget};

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub worker_pool_size: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { worker_pool_size: 4 }
    }
}

pub struct Planner {
    executor: Arc<StepExecutor>,
    failure_store: Arc<FailureStore>,
    retry_budget: Arc<RetryBudget>,
    circuit_breaker: Arc<CircuitBreaker>,
    interact: Arc<dyn Interact>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(
        executor: Arc<StepExecutor>,
        failure_store: Arc<FailureStore>,
        retry_budget: Arc<RetryBudget>,
        circuit_breaker: Arc<CircuitBreaker>,
        interact: Arc<dyn Interact>,
        config: PlannerConfig,
    ) -> Self {
        Self { executor, failure_store, retry_budget, circuit_breaker, interact, config }
    }

    /// Pre-flight per §4.7 step 1: query `FailureStore` for every step,
    /// compute an aggregate success probability, and ask for
    /// confirmation when it's low and the plan is risky enough to
    /// warrant asking.
    async fn preflight_allows(&self, ir: &IntentIr) -> anyhow::Result<bool> {
        let mut product = 1.0_f64;
        for step in &ir.steps {
            let p = self.failure_store.success_probability(&step.tool, &step.action)?;
            product *= p;
        }
        let risky = ir.requires_confirmation || ir.steps.iter().any(|s| (s.risk as u8) >= 2);
        if product < 0.5 && risky {
            let prompt = format!(
                "This plan has historically succeeded only {:.0}% of the time and touches risky operations. Proceed?",
                product * 100.0
            );
            return Ok(self.interact.confirm(&prompt).await);
        }
        Ok(true)
    }

    /// Run `ir` end to end: pre-flight, dependency analysis, then
    /// level-by-level dispatch. Returns observations in IR order
    /// regardless of completion order (§5).
    #[instrument(skip(self, ir), fields(goal = %ir.goal, steps = ir.steps.len()))]
    pub async fn run(&self, ir: &IntentIr, txn_id: Uuid, registry: &dyn forge_common::ToolRegistry) -> anyhow::Result<Vec<Observation>> {
        if !self.preflight_allows(ir).await? {
            return Ok(ir
                .steps
                .iter()
                .enumerate()
                .map(|(i, _)| Observation::skipped(i, CoreError::Permission { message: "declined at pre-flight confirmation".into() }, String::new()))
                .collect());
        }

        let Plan { levels, .. } = dependency_analyzer::analyze(ir, registry)?;

        let mut observations: Vec<Option<Observation>> = (0..ir.steps.len()).map(|_| None).collect();
        let semaphore = Arc::new(Semaphore::new(self.config.worker_pool_size.max(1)));

        let handles = self.clone_for_task();

        'levels: for level in levels {
            if level.len() == 1 {
                let index = level[0];
                let obs = handles.execute_step_with_retry(&ir.steps[index], index, txn_id).await;
                let fatal = obs.error_kind.as_ref().map(|e| e.is_fatal()).unwrap_or(false);
                observations[index] = Some(obs);
                if fatal {
                    break 'levels;
                }
                continue;
            }

            let (tx, mut rx) = mpsc::channel::<(usize, Observation)>(level.len().max(1));
            for &index in &level {
                let permit = semaphore.clone().acquire_owned().await?;
                let tx = tx.clone();
                let step = ir.steps[index].clone();
                let handles = handles.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let obs = handles.execute_step_with_retry(&step, index, txn_id).await;
                    let _ = tx.send((index, obs)).await;
                });
            }
            drop(tx);

            let mut fatal_seen = false;
            for _ in 0..level.len() {
                if let Some((index, obs)) = rx.recv().await {
                    if obs.error_kind.as_ref().map(|e| e.is_fatal()).unwrap_or(false) {
                        fatal_seen = true;
                    }
                    observations[index] = Some(obs);
                }
            }
            if fatal_seen {
                break 'levels;
            }
        }

        for (index, slot) in observations.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Observation::skipped(index, CoreError::Fatal { message: "short-circuited by an earlier fatal failure".into() }, String::new()));
            }
        }

        Ok(observations.into_iter().map(|o| o.unwrap()).collect())
    }

    /// Planner itself is never cloned across tasks (its `interact`
    /// handle is single-owner); only the `Arc`-held pieces a spawned
    /// task actually needs are cloned.
    fn clone_for_task(&self) -> TaskHandles {
        TaskHandles {
            executor: self.executor.clone(),
            retry_budget: self.retry_budget.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
            failure_store: self.failure_store.clone(),
        }
    }
}

#[derive(Clone)]
struct TaskHandles {
    executor: Arc<StepExecutor>,
    retry_budget: Arc<RetryBudget>,
    circuit_breaker: Arc<CircuitBreaker>,
    failure_store: Arc<FailureStore>,
}

impl TaskHandles {
    /// §4.5's composition order: `retry_with_budget(breaker.call(call))` —
    /// the circuit breaker guards each individual attempt, the retry budget
    /// wraps the whole retry loop around it.
    async fn execute_step_with_retry(&self, step: &forge_common::Step, index: usize, txn_id: Uuid) -> Observation {
        let executor = self.executor.clone();
        let circuit_breaker = self.circuit_breaker.clone();
        let op_class = step.tool.clone();
        let step_owned = step.clone();
        let result = self
            .retry_budget
            .execute(&op_class, || {
                let executor = executor.clone();
                let circuit_breaker = circuit_breaker.clone();
                let step = step_owned.clone();
                let service = step.tool.clone();
                async move {
                    circuit_breaker
                        .call(&service, || async {
                            let obs = executor.execute(&step, txn_id, index).await;
                            if obs.is_ok() {
                                Ok(obs)
                            } else {
                                Err(obs.error_kind.clone().unwrap_or(CoreError::Fatal { message: "unknown failure".into() }))
                            }
                        })
                        .await
                }
            })
            .await;

        match result {
            Ok(obs) => obs,
            Err(e) => {
                let _ = self.failure_store.record_failure(&step_owned.tool, e.kind_name(), &e.to_string());
                Observation::failed(index, "", String::new(), e, 0, String::new())
            }
        }
    }
}
