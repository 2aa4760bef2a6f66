//! `GoalLoop` (§4.8): the outer iterative loop for complex goals —
//! translate, plan, reflect, repeat until the goal is reached or a
//! safety bound triggers.
//!
//! Grounded on `dag::executor::execute_single_phase`'s budget-loop
//! pattern (`for iter in 1..=phase.budget { ... if promise_found { break
//! } }`), generalized from "one phase, one Claude session" to "one
//! goal, repeated translate/plan/reflect".

use std::sync::Arc;

use forge_common::{Interact, Observation, Translator};
use tracing::instrument;
use uuid::Uuid;

const DEFAULT_MAX_ITER: u32 = 50;
const DEFAULT_BATCH_SIZE: u32 = 12;
const DEFAULT_STUCK_THRESHOLD: u32 = 3;
const OBSERVATION_TRAIL_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct GoalLoopConfig {
    pub max_iterations: u32,
    pub batch_size: u32,
    pub stuck_threshold: u32,
}

impl Default for GoalLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITER,
            batch_size: DEFAULT_BATCH_SIZE,
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GoalOutcome {
    Complete { confidence: f64, reasoning: String },
    IncompleteMaxReached,
    IncompleteTranslationFailure,
    Aborted { reason: String },
}

/// Build the augmented translate-prompt context: goal + serialized summary
/// of the most recent observations (§4.8 step 2/9 trimming rule: keep
/// first + most recent 19 once the trail exceeds the configured size).
fn summarize_observations(goal: &str, observations: &[Observation]) -> String {
    let trail: Vec<&Observation> = if observations.len() > OBSERVATION_TRAIL_LIMIT {
        let mut kept = vec![&observations[0]];
        kept.extend(observations[observations.len() - (OBSERVATION_TRAIL_LIMIT - 1)..].iter());
        kept
    } else {
        observations.iter().collect()
    };

    render_trail(goal, trail.into_iter())
}

/// The full, untrimmed observation trail for `reflect()` (§4.8 step 5 —
/// unlike the translate-prompt context, reflection needs every
/// observation, not just the first-plus-recent window).
fn full_observation_trail(goal: &str, observations: &[Observation]) -> String {
    render_trail(goal, observations.iter())
}

fn render_trail<'a>(goal: &str, trail: impl Iterator<Item = &'a Observation>) -> String {
    let mut summary = String::new();
    summary.push_str(goal);
    summary.push('\n');
    for obs in trail {
        summary.push_str(&format!(
            "step[{}]({})->{}\n",
            obs.step_ref, obs.args_digest, obs.truncated_stdout
        ));
    }
    summary
}

pub struct GoalLoop {
    translator: Arc<dyn Translator>,
    interact: Arc<dyn Interact>,
    config: GoalLoopConfig,
}

impl GoalLoop {
    pub fn new(translator: Arc<dyn Translator>, interact: Arc<dyn Interact>, config: GoalLoopConfig) -> Self {
        Self { translator, interact, config }
    }

    /// Run the goal loop. `run_plan` is supplied by the caller
    /// (`Orchestrator`) so `GoalLoop` doesn't need to know about
    /// `Planner`'s registry/txn wiring directly.
    #[instrument(skip(self, run_plan), fields(goal = %goal))]
    pub async fn run<F, Fut>(&self, goal: &str, txn_id: Uuid, mut run_plan: F) -> anyhow::Result<(GoalOutcome, Vec<Observation>)>
    where
        F: FnMut(forge_common::IntentIr, Uuid) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<Vec<Observation>>>,
    {
        let mut observations: Vec<Observation> = Vec::new();
        let mut last_goal: Option<String> = None;
        let mut stuck_count = 0u32;
        let mut translation_failures = 0u32;
        let mut iteration = 0u32;

        loop {
            if iteration >= self.config.max_iterations {
                return Ok((GoalOutcome::IncompleteMaxReached, observations));
            }

            let context = summarize_observations(goal, &observations);
            let ir = match self.translator.translate(goal, &context).await {
                Ok(ir) => {
                    translation_failures = 0;
                    ir
                }
                Err(_) => {
                    translation_failures += 1;
                    if translation_failures >= 2 {
                        return Ok((GoalOutcome::IncompleteTranslationFailure, observations));
                    }
                    iteration += 1;
                    continue;
                }
            };

            let new_observations = run_plan(ir.clone(), txn_id).await?;
            observations.extend(new_observations);

            let trail = full_observation_trail(goal, &observations);
            let reflection = self.translator.reflect(goal, &trail).await;

            let Ok(reflection) = reflection else {
                iteration += 1;
                continue;
            };

            if reflection.achieved && reflection.confidence >= 0.7 {
                return Ok((
                    GoalOutcome::Complete { confidence: reflection.confidence, reasoning: reflection.reasoning },
                    observations,
                ));
            }

            if last_goal.as_deref() == Some(ir.goal.as_str()) && reflection.confidence < 0.4 {
                stuck_count += 1;
            } else {
                stuck_count = 0;
            }
            last_goal = Some(ir.goal.clone());

            if stuck_count >= self.config.stuck_threshold {
                let proceed = self.interact.confirm("This goal may be stuck making no progress. Continue anyway?").await;
                if !proceed {
                    return Ok((GoalOutcome::Aborted { reason: "user declined to continue a stuck goal".into() }, observations));
                }
                stuck_count = 0;
            }

            iteration += 1;
            if iteration > 0 && iteration % self.config.batch_size == 0 {
                let proceed = self.interact.confirm(&format!("Completed {iteration} iterations. Continue?")).await;
                if !proceed {
                    return Ok((GoalOutcome::Aborted { reason: "user declined to continue past a batch boundary".into() }, observations));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use forge_common::{CoreError, IntentIr, Reflection, Risk, Step};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedTranslator {
        reflect_confidence: Mutex<Vec<(bool, f64)>>,
    }

    #[async_trait]
    impl Translator for ScriptedTranslator {
        async fn translate(&self, _input: &str, _context: &str) -> Result<IntentIr, CoreError> {
            Ok(IntentIr::new("goal", false, vec![Step::new("file_ops", "noop", Risk::ReadOnly)]))
        }

        async fn reflect(&self, _goal: &str, _trail: &str) -> Result<Reflection, CoreError> {
            let mut scripted = self.reflect_confidence.lock().unwrap();
            let (achieved, confidence) = if scripted.len() > 1 { scripted.remove(0) } else { scripted[0] };
            Ok(Reflection { achieved, confidence, reasoning: "scripted".into(), next_steps: vec![] })
        }
    }

    #[tokio::test]
    async fn completes_when_achieved_and_confident() {
        let translator = Arc::new(ScriptedTranslator { reflect_confidence: Mutex::new(vec![(true, 0.9)]) });
        let goal_loop = GoalLoop::new(translator, Arc::new(forge_common::AlwaysConfirm), GoalLoopConfig::default());
        let calls = AtomicU32::new(0);
        let (outcome, _) = goal_loop
            .run("do the thing", Uuid::new_v4(), |_ir, _txn| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(vec![]) }
            })
            .await
            .unwrap();
        assert!(matches!(outcome, GoalOutcome::Complete { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn max_iterations_reached_returns_incomplete() {
        let translator = Arc::new(ScriptedTranslator { reflect_confidence: Mutex::new(vec![(false, 0.5)]) });
        let config = GoalLoopConfig { max_iterations: 2, batch_size: 100, stuck_threshold: 100 };
        let goal_loop = GoalLoop::new(translator, Arc::new(forge_common::AlwaysConfirm), config);
        let (outcome, _) = goal_loop.run("goal", Uuid::new_v4(), |_ir, _txn| async { Ok(vec![]) }).await.unwrap();
        assert_eq!(outcome, GoalOutcome::IncompleteMaxReached);
    }

    #[tokio::test]
    async fn observation_trail_keeps_first_plus_recent_nineteen() {
        let observations: Vec<Observation> = (0..25)
            .map(|i| Observation::ok(i, "out", String::new(), 1, format!("d{i}")))
            .collect();
        let summary = summarize_observations("g", &observations);
        assert!(summary.contains("step[0]"), "first observation must be kept");
        assert!(summary.contains("step[24]"), "most recent observation must be kept");
        assert!(!summary.contains("step[5]("), "middle observations must be dropped once over the limit");
    }

    #[test]
    fn full_trail_keeps_every_observation_unlike_the_trimmed_summary() {
        let observations: Vec<Observation> = (0..25)
            .map(|i| Observation::ok(i, "out", String::new(), 1, format!("d{i}")))
            .collect();
        let full = full_observation_trail("g", &observations);
        for i in 0..25 {
            assert!(full.contains(&format!("step[{i}](")), "step[{i}] must survive the full trail");
        }
    }
}
