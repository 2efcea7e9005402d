//! The planner: recursive cheapest-path dependency resolution, sequence
//! replay, and best-insertion-point search.
//!
//! Everything here is deterministic. Candidate enumeration follows store
//! insertion order and every comparison keeps the earliest alternative on
//! ties, so two calls with the same inputs return identical plans.

use crate::attributes::AttributeSet;
use crate::step::TestStep;
use crate::store::{StepId, StepStore};
use std::fmt;
use thiserror::Error;

/// Planner tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct Cfg {
    /// Maximum dependency-resolution recursion depth before a branch is
    /// declared infeasible. The bound only fires on cyclic step definitions;
    /// well-formed libraries shrink the outstanding difference set on every
    /// recursion.
    pub max_depth: u32,
    /// Score competing dependency resolutions against the remainder of the
    /// sequence instead of taking the locally cheapest one. This is what
    /// lets an expensive reusable setup amortise across repeated steps.
    pub lookahead: bool,
}

impl Default for Cfg {
    fn default() -> Cfg {
        Cfg {
            max_depth: 32,
            lookahead: true,
        }
    }
}

/// A sequence of steps achieving some target, with its accumulated cost.
/// An empty solution with cost 0 means the target already holds.
#[derive(Debug, Clone, Default)]
struct Solution {
    cost: u32,
    steps: Vec<StepId>,
}

/// Attributes for which no producing step could be found.
#[derive(Debug, Clone)]
struct Missing(AttributeSet);

/// A sequence replay that hit a dead end at `step`.
#[derive(Debug, Clone)]
struct SeqFailure {
    step: StepId,
    missing: AttributeSet,
}

#[derive(Debug, Error)]
pub enum PlannerError {
    /// No sequence of steps satisfies a step's declared dependencies from
    /// the state it would run in.
    #[error("unable to satisfy dependencies of `{step}`: missing {missing}")]
    InfeasibleDependencies { step: String, missing: AttributeSet },
    /// A required step cannot be placed anywhere feasibly.
    #[error("unable to place required step `{step}`: missing {missing}")]
    Unsatisfiable { step: String, missing: AttributeSet },
}

/// Ordered outcome of [`Planner::calculate`]: step handles into the store,
/// helpers interspersed, plus the accumulated cost.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    steps: Vec<StepId>,
    cost: u32,
}

impl Plan {
    pub fn steps(&self) -> &[StepId] {
        &self.steps
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Resolve the plan against the store it was produced from.
    pub fn iter<'s>(&'s self, store: &'s StepStore) -> impl Iterator<Item = &'s TestStep> + 's {
        self.steps.iter().map(move |&id| store.get(id))
    }

    /// Numbered listing of the plan for human consumption.
    pub fn display<'s>(&'s self, store: &'s StepStore) -> impl fmt::Display + 's {
        PlanListing { plan: self, store }
    }
}

struct PlanListing<'s> {
    plan: &'s Plan,
    store: &'s StepStore,
}

impl fmt::Display for PlanListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (item, step) in self.plan.iter(self.store).enumerate() {
            writeln!(f, "{}. {}: {}", item + 1, step.short, step.description)?;
        }
        Ok(())
    }
}

/// The planning engine. Pure: holds only its configuration.
#[derive(Debug, Default, Clone)]
pub struct Planner {
    cfg: Cfg,
}

impl Planner {
    pub fn new(cfg: Cfg) -> Planner {
        Planner { cfg }
    }

    /// Produce the cheapest plan containing every required step of `store`,
    /// starting from `initial`.
    ///
    /// The store must already be expanded (see
    /// [`StepStore::required_steps`]); `calculate` itself never mutates it,
    /// so concurrent read-only planning over one store is sound.
    pub fn calculate(&self, store: &StepStore, initial: &AttributeSet) -> Result<Plan, PlannerError> {
        let required = store.required_ids();
        let total = required.len();
        let mut skeleton: Vec<StepId> = Vec::with_capacity(total);
        for (placed, id) in required.into_iter().enumerate() {
            let position = self.best_insertion_point(store, initial, &skeleton, id)?;
            skeleton.insert(position, id);
            tracing::debug!(placed = placed + 1, total, "required step placed");
        }
        let solution = self
            .solve_for_sequence(store, initial, &skeleton)
            .map_err(|failure| PlannerError::Unsatisfiable {
                step: store.get(failure.step).short.clone(),
                missing: failure.missing,
            })?;
        Ok(Plan {
            steps: solution.steps,
            cost: solution.cost,
        })
    }

    /// The change-set that would turn `state` into one containing `target`:
    /// discards first, requirements upserting over them on key collisions.
    fn needed_changes(state: &AttributeSet, target: &AttributeSet) -> AttributeSet {
        let (required, discard) = state.differences(target);
        let mut changes = discard;
        for attr in required.iter() {
            changes.insert(attr);
        }
        changes
    }

    /// All candidate resolutions for `target` from `state`, in store order.
    ///
    /// Each resolution is a full transformation: the candidate step, any
    /// steps needed to satisfy its own dependencies before it, and a tail
    /// completing whatever of `target` the candidate left unreached. A
    /// single empty resolution is returned when `target` already holds.
    fn resolutions(
        &self,
        store: &StepStore,
        state: &AttributeSet,
        target: &AttributeSet,
        depth: u32,
    ) -> Result<Vec<Solution>, Missing> {
        let changes = Self::needed_changes(state, target);
        if changes.is_empty() {
            return Ok(vec![Solution::default()]);
        }
        if depth >= self.cfg.max_depth {
            return Err(Missing(changes));
        }

        let mut out = Vec::new();
        let mut missing = AttributeSet::new();
        'candidates: for (id, step) in store.iter() {
            if !step.op.changes.contains_any(&changes) {
                continue;
            }
            let (mut cost, mut steps) = if step.op.valid(state) {
                (step.cost, vec![id])
            } else {
                match self.solve(store, state, &step.op.dependencies, depth + 1) {
                    Ok(sub) => {
                        let mut steps = sub.steps;
                        steps.push(id);
                        (sub.cost + step.cost, steps)
                    }
                    Err(Missing(unmet)) => {
                        for attr in unmet.iter() {
                            missing.insert(attr);
                        }
                        continue 'candidates;
                    }
                }
            };
            let mut after = state.clone();
            for &sid in &steps {
                store.get(sid).op.modify(&mut after);
            }
            if !after.contains_all(target) {
                match self.solve(store, &after, target, depth + 1) {
                    Ok(tail) => {
                        cost += tail.cost;
                        steps.extend(tail.steps);
                    }
                    Err(Missing(unmet)) => {
                        for attr in unmet.iter() {
                            missing.insert(attr);
                        }
                        continue 'candidates;
                    }
                }
            }
            out.push(Solution { cost, steps });
        }

        if out.is_empty() {
            Err(Missing(if missing.is_empty() { changes } else { missing }))
        } else {
            Ok(out)
        }
    }

    /// Cheapest sequence of steps transforming `state` into a state that
    /// contains `target`; first-wins on cost ties.
    fn solve(
        &self,
        store: &StepStore,
        state: &AttributeSet,
        target: &AttributeSet,
        depth: u32,
    ) -> Result<Solution, Missing> {
        let solutions = self.resolutions(store, state, target, depth)?;
        Ok(Self::cheapest(solutions))
    }

    fn cheapest(solutions: Vec<Solution>) -> Solution {
        solutions
            .into_iter()
            .reduce(|best, next| if next.cost < best.cost { next } else { best })
            .expect("resolutions never returns an empty list")
    }

    fn cheapest_index(solutions: &[Solution]) -> usize {
        let mut best = 0;
        for (index, solution) in solutions.iter().enumerate() {
            if solution.cost < solutions[best].cost {
                best = index;
            }
        }
        best
    }

    /// Replay `seq` from `state`, synthesising helper steps for each entry's
    /// dependencies and accumulating the cost.
    fn solve_for_sequence(
        &self,
        store: &StepStore,
        state: &AttributeSet,
        seq: &[StepId],
    ) -> Result<Solution, SeqFailure> {
        let mut state = state.clone();
        let mut plan = Solution::default();
        for (index, &sid) in seq.iter().enumerate() {
            let step = store.get(sid);
            let options = self
                .resolutions(store, &state, &step.op.dependencies, 0)
                .map_err(|Missing(missing)| SeqFailure { step: sid, missing })?;
            let chosen = if options.len() > 1 && self.cfg.lookahead {
                self.pick_with_lookahead(store, &state, step, &options, &seq[index + 1..])
            } else {
                Self::cheapest_index(&options)
            };
            let resolution = &options[chosen];
            for &hid in &resolution.steps {
                store.get(hid).op.modify(&mut state);
            }
            plan.cost += resolution.cost;
            plan.steps.extend_from_slice(&resolution.steps);
            step.op.modify(&mut state);
            plan.cost += step.cost;
            plan.steps.push(sid);
        }
        Ok(plan)
    }

    /// Score each resolution by its own cost plus a greedy replay of the
    /// rest of the sequence, so a locally dearer resolution whose leftovers
    /// cheapen later steps can win. Falls back to the locally cheapest
    /// resolution when every remainder is infeasible (the replay will then
    /// surface the failure at the step that owns it).
    fn pick_with_lookahead(
        &self,
        store: &StepStore,
        state: &AttributeSet,
        step: &TestStep,
        options: &[Solution],
        rest: &[StepId],
    ) -> usize {
        let mut best: Option<(u32, usize)> = None;
        for (index, resolution) in options.iter().enumerate() {
            let mut sim = state.clone();
            for &hid in &resolution.steps {
                store.get(hid).op.modify(&mut sim);
            }
            step.op.modify(&mut sim);
            let Some(tail_cost) = self.greedy_tail(store, sim, rest) else {
                continue;
            };
            let score = resolution.cost + step.cost + tail_cost;
            if best.map_or(true, |(cost, _)| score < cost) {
                best = Some((score, index));
            }
        }
        best.map(|(_, index)| index)
            .unwrap_or_else(|| Self::cheapest_index(options))
    }

    /// Cost of greedily replaying `rest` from `state`, or `None` if any step
    /// becomes unreachable.
    fn greedy_tail(&self, store: &StepStore, mut state: AttributeSet, rest: &[StepId]) -> Option<u32> {
        let mut cost = 0;
        for &sid in rest {
            let step = store.get(sid);
            let solution = self.solve(store, &state, &step.op.dependencies, 0).ok()?;
            for &hid in &solution.steps {
                store.get(hid).op.modify(&mut state);
            }
            step.op.modify(&mut state);
            cost += solution.cost + step.cost;
        }
        Some(cost)
    }

    /// Position in `skeleton` at which inserting `new_id` yields the
    /// cheapest full replay; earliest position on ties.
    ///
    /// Sweeps the skeleton left to right. At each position the insertion is
    /// simulated as a replay of `[new_id] ++ skeleton[i..]` from the
    /// accumulated state (branch A), then the swept step itself is advanced
    /// over (branch B). The skeleton was placed by earlier calls, so a
    /// branch B failure means the library lost a dependency and is an error.
    fn best_insertion_point(
        &self,
        store: &StepStore,
        initial: &AttributeSet,
        skeleton: &[StepId],
        new_id: StepId,
    ) -> Result<usize, PlannerError> {
        let mut accumulated = initial.clone();
        let mut prefix_cost = 0u32;
        let mut best: Option<(u32, usize)> = None;
        let mut last_missing = AttributeSet::new();

        for position in 0..=skeleton.len() {
            let mut trial = Vec::with_capacity(1 + skeleton.len() - position);
            trial.push(new_id);
            trial.extend_from_slice(&skeleton[position..]);
            match self.solve_for_sequence(store, &accumulated, &trial) {
                Ok(solution) => {
                    let total = prefix_cost + solution.cost;
                    if best.map_or(true, |(cost, _)| total < cost) {
                        best = Some((total, position));
                    }
                }
                Err(failure) => last_missing = failure.missing,
            }

            if position < skeleton.len() {
                let step = store.get(skeleton[position]);
                let solution = self
                    .solve(store, &accumulated, &step.op.dependencies, 0)
                    .map_err(|Missing(missing)| PlannerError::InfeasibleDependencies {
                        step: step.short.clone(),
                        missing,
                    })?;
                for &hid in &solution.steps {
                    store.get(hid).op.modify(&mut accumulated);
                }
                step.op.modify(&mut accumulated);
                prefix_cost += solution.cost + step.cost;
            }
        }

        match best {
            Some((_, position)) => Ok(position),
            None => Err(PlannerError::Unsatisfiable {
                step: store.get(new_id).short.clone(),
                missing: last_missing,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(text: &str) -> AttributeSet {
        text.parse().unwrap()
    }

    fn store_with(records: &[&str]) -> StepStore {
        let mut store = StepStore::new();
        for record in records {
            store.add_text(record).unwrap();
        }
        store
    }

    fn planner() -> Planner {
        Planner::new(Cfg::default())
    }

    fn shorts(store: &StepStore, solution: &Solution) -> Vec<String> {
        solution.steps.iter().map(|&id| store.get(id).short.clone()).collect()
    }

    #[test]
    fn needed_changes_merges_discards_and_requirements() {
        let changes = Planner::needed_changes(&set("apple=sweet,extra"), &set("apple=sour,!extra,new"));
        // the apple discard collapses under the apple requirement
        assert_eq!(set("apple=sour,!extra,new"), changes);
    }

    #[test]
    fn solve_on_a_satisfied_target_is_empty() {
        let store = store_with(&["short: a\nchanges: x\ncost: 1\n"]);
        let solution = planner().solve(&store, &set("x"), &set("x"), 0).unwrap();
        assert_eq!(0, solution.cost);
        assert!(solution.steps.is_empty());
    }

    #[test]
    fn solve_chains_dependencies() {
        let store = store_with(&[
            "short: a\nchanges: x\ncost: 1\n",
            "short: b\ndependencies: x\nchanges: y\ncost: 1\n",
        ]);
        let solution = planner().solve(&store, &AttributeSet::new(), &set("y"), 0).unwrap();
        assert_eq!(vec!["a", "b"], shorts(&store, &solution));
        assert_eq!(2, solution.cost);
    }

    #[test]
    fn a_step_that_removes_a_wanted_fact_is_not_a_candidate() {
        // `undo` touches x but only to remove it; it must never be chosen to produce x
        let store = store_with(&[
            "short: undo\nchanges: !x\ncost: 0\n",
            "short: make\nchanges: x\ncost: 5\n",
        ]);
        let solution = planner().solve(&store, &AttributeSet::new(), &set("x"), 0).unwrap();
        assert_eq!(vec!["make"], shorts(&store, &solution));
    }

    #[test]
    fn unproducible_targets_report_the_missing_attributes() {
        let store = store_with(&["short: a\nchanges: x\ncost: 1\n"]);
        let err = planner().solve(&store, &AttributeSet::new(), &set("z"), 0).unwrap_err();
        assert_eq!(set("z"), err.0);
    }

    #[test]
    fn cyclic_definitions_hit_the_depth_bound() {
        // each step requires what only the other provides, and consumes it
        let store = store_with(&[
            "short: ping\ndependencies: pong\nchanges: ping,!pong\ncost: 1\n",
            "short: pong\ndependencies: ping\nchanges: pong,!ping\ncost: 1\n",
        ]);
        let err = planner().solve(&store, &AttributeSet::new(), &set("ping"), 0).unwrap_err();
        assert!(!err.0.is_empty());
    }

    #[test]
    fn sequence_replay_restores_consumed_dependencies() {
        let store = store_with(&[
            "short: consume\ndependencies: fuel\nchanges: !fuel\ncost: 1\nrequired: yes\n",
            "short: refuel\nchanges: fuel\ncost: 2\n",
        ]);
        let ids = store.required_ids();
        let seq = vec![ids[0], ids[0]];
        let solution = planner().solve_for_sequence(&store, &AttributeSet::new(), &seq).unwrap();
        assert_eq!(
            vec!["refuel", "consume", "refuel", "consume"],
            shorts(&store, &solution)
        );
        assert_eq!(6, solution.cost);
    }

    #[test]
    fn insertion_prefers_the_earliest_position_on_ties() {
        let mut store = store_with(&[
            "short: a\nchanges: done_a\ncost: 1\nrequired: yes\n",
            "short: b\nchanges: done_b\ncost: 1\nrequired: yes\n",
        ]);
        let required = store.required_steps();
        let planner = planner();
        let position = planner
            .best_insertion_point(&store, &AttributeSet::new(), &[required[0]], required[1])
            .unwrap();
        assert_eq!(0, position);
    }
}
