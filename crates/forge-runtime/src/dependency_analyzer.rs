//! `DependencyAnalyzer` (§4.1): IR steps → ordered levels (parallel-safe
//! index sets).
//!
//! Resource-conflict edge inference (step 1) has no teacher analogue —
//! the teacher's `DagBuilder` consumes explicit `depends_on` lists.
//! The Kahn layering and cycle detection (steps 2-3) are carried over
//! directly from `dag::scheduler::DagScheduler::compute_waves` and
//! `dag::builder::DagBuilder::validate_no_cycles`'s in-degree counting.

use std::collections::HashSet;

use forge_common::{CoreError, IntentIr, ToolRegistry};

/// Levels[k] only contains indices whose predecessors all lie in
/// levels[0..k-1] (§4.1 output guarantee).
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub levels: Vec<Vec<usize>>,
    /// `|steps| / len(levels) < 1.3` — below this the fan-out isn't
    /// worth the concurrency machinery and callers may prefer a plain
    /// sequential walk.
    pub sequential_fallback: bool,
}

/// Pairwise conflict edges, i→j meaning step i must run before step j.
fn conflict_edges(ir: &IntentIr, registry: &dyn ToolRegistry) -> Vec<(usize, usize)> {
    let touches: Vec<_> = ir
        .steps
        .iter()
        .map(|s| registry.resource_touches(&s.tool, &s.action, &s.args))
        .collect();

    let mut edges = Vec::new();
    for i in 0..ir.steps.len() {
        for j in (i + 1)..ir.steps.len() {
            let step_i = &ir.steps[i];
            let step_j = &ir.steps[j];

            let serializing = registry.is_serializing_class(&step_i.tool)
                && registry.is_serializing_class(&step_j.tool)
                && step_i.tool == step_j.tool;

            let resource_conflict = touches[i].iter().any(|a| {
                touches[j]
                    .iter()
                    .any(|b| a.resource_id == b.resource_id && (a.writes || b.writes))
            });

            if serializing || resource_conflict {
                edges.push((i, j));
            }
        }
    }
    edges
}

/// Build the execution plan for one validated `IntentIr`. Mirrors
/// `DagBuilder::validate_no_cycles`'s in-degree counting, generalized
/// from explicit dependency edges to the conflict edges computed above.
pub fn analyze(ir: &IntentIr, registry: &dyn ToolRegistry) -> Result<Plan, CoreError> {
    let n = ir.steps.len();
    let edges = conflict_edges(ir, registry);

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree: Vec<usize> = vec![0; n];
    for &(from, to) in &edges {
        dependents[from].push(to);
        in_degree[to] += 1;
    }

    let mut levels = Vec::new();
    let mut satisfied: HashSet<usize> = HashSet::new();
    let mut remaining_in_degree = in_degree.clone();

    while satisfied.len() < n {
        let mut ready: Vec<usize> = (0..n)
            .filter(|i| !satisfied.contains(i) && remaining_in_degree[*i] == 0)
            .collect();
        if ready.is_empty() {
            let stuck: Vec<usize> = (0..n).filter(|i| !satisfied.contains(i)).collect();
            return Err(CoreError::Schema {
                message: format!("plan cycle detected among step indices {stuck:?}"),
            });
        }
        ready.sort_unstable();

        for &i in &ready {
            satisfied.insert(i);
        }
        for &i in &ready {
            for &dependent in &dependents[i] {
                remaining_in_degree[dependent] -= 1;
            }
        }
        levels.push(ready);
    }

    let speedup = n as f64 / levels.len() as f64;
    Ok(Plan { sequential_fallback: speedup < 1.3, levels })
}
