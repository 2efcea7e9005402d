//! The step library: an append-only arena with stable handles.
//!
//! Deletions (dedup on re-add, compound expansion) are logical: the entry is
//! tombstoned, never compacted, so a [`StepId`] handed out earlier stays
//! valid for the lifetime of the store. Iteration skips tombstones and
//! follows insertion order, which is what makes planning deterministic.

use crate::attributes::Attribute;
use crate::parsing::{parse_step, ParseError, StepRecord};
use crate::step::TestStep;
use crate::Operation;
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroU32;

/// Stable handle to a step in a [`StepStore`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StepId(NonZeroU32);

impl StepId {
    fn from_index(index: usize) -> StepId {
        StepId(NonZeroU32::new(index as u32 + 1).unwrap())
    }

    fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// Owns every [`TestStep`] and knows which keys are *compound* (seen with
/// several values across the library's change lists).
#[derive(Default)]
pub struct StepStore {
    entries: Vec<Option<TestStep>>,
    /// Every value seen for a key in any step's changes.
    compound: BTreeMap<String, BTreeSet<String>>,
    expanded: bool,
}

impl StepStore {
    pub fn new() -> StepStore {
        StepStore::default()
    }

    /// Number of live steps.
    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live steps in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (StepId, &TestStep)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.as_ref().map(|step| (StepId::from_index(index), step)))
    }

    /// Resolve a handle.
    ///
    /// Panics if the handle points at a tombstoned entry; plans only hold
    /// handles that were live when the plan was produced.
    pub fn get(&self, id: StepId) -> &TestStep {
        self.entries[id.index()].as_ref().expect("step was replaced")
    }

    /// Insert a step, replacing any live step with the same
    /// `(short, dependencies)` identity. The replacement appends: a re-added
    /// step moves to the end of the iteration order.
    pub fn add(&mut self, step: TestStep) -> StepId {
        self.expanded = false;
        self.note_compound_values(&step);
        self.push_dedup(step)
    }

    /// Insert every step a record denotes.
    ///
    /// A record whose dependency list names the same key with several atoms
    /// is fanned out into one step per combination (cartesian across such
    /// keys), since a single attribute set would collapse them.
    pub fn add_record(&mut self, record: StepRecord) -> Vec<StepId> {
        self.expanded = false;
        for attr in &record.changes {
            if let Some(value) = attr.value() {
                self.compound
                    .entry(attr.key().to_string())
                    .or_default()
                    .insert(value.to_string());
            }
        }

        // group dependency atoms by key, keeping first-occurrence key order
        let mut groups: Vec<(&str, Vec<&Attribute>)> = Vec::new();
        for attr in &record.dependencies {
            match groups.iter_mut().find(|(key, _)| *key == attr.key()) {
                Some((_, atoms)) => atoms.push(attr),
                None => groups.push((attr.key(), vec![attr])),
            }
        }

        let mut dep_sets = vec![crate::AttributeSet::new()];
        for (_, atoms) in &groups {
            if let [single] = atoms.as_slice() {
                for set in &mut dep_sets {
                    set.insert((*single).clone());
                }
            } else {
                let mut next = Vec::with_capacity(dep_sets.len() * atoms.len());
                for set in &dep_sets {
                    for atom in atoms {
                        let mut copy = set.clone();
                        copy.insert((*atom).clone());
                        next.push(copy);
                    }
                }
                dep_sets = next;
            }
        }

        let changes: crate::AttributeSet = record.changes.iter().cloned().collect();
        dep_sets
            .into_iter()
            .map(|dependencies| {
                self.push_dedup(TestStep {
                    short: record.short.clone(),
                    description: record.description.clone(),
                    script: record.script.clone(),
                    cost: record.cost,
                    required: record.required,
                    op: Operation::new(dependencies, changes.clone()),
                })
            })
            .collect()
    }

    /// Parse a step record and add it.
    pub fn add_text(&mut self, text: &str) -> Result<Vec<StepId>, ParseError> {
        Ok(self.add_record(parse_step(text)?))
    }

    /// First live step with the given short identifier.
    pub fn lookup(&self, short: &str) -> Option<&TestStep> {
        self.iter().map(|(_, step)| step).find(|step| step.short == short)
    }

    /// Flip the required flag on every live step with this short identifier.
    /// Returns whether any step matched.
    pub fn mark_required(&mut self, short: &str, required: bool) -> bool {
        let mut matched = false;
        for entry in self.entries.iter_mut().flatten() {
            if entry.short == short {
                entry.required = required;
                matched = true;
            }
        }
        matched
    }

    /// Required steps in insertion order, expanding compound dependencies
    /// first (idempotently).
    pub fn required_steps(&mut self) -> Vec<StepId> {
        self.expand_compounds();
        self.required_ids()
    }

    /// Required steps in insertion order, without touching expansion state.
    pub fn required_ids(&self) -> Vec<StepId> {
        self.iter().filter(|(_, step)| step.required).map(|(id, _)| id).collect()
    }

    /// Replace every step with a bare dependency on a compound key by one
    /// copy per value of that key (cartesian across keys, polarity
    /// preserved). Idempotent: expanded copies carry valued dependencies and
    /// are never expanded again.
    pub fn expand_compounds(&mut self) {
        if self.expanded {
            return;
        }
        self.expanded = true;
        for index in 0..self.entries.len() {
            let combos = {
                let Some(step) = self.entries[index].as_ref() else {
                    continue;
                };
                let bare: Vec<Attribute> = step
                    .op
                    .dependencies
                    .iter()
                    .filter(|attr| attr.value().is_none() && self.compound.contains_key(attr.key()))
                    .collect();
                if bare.is_empty() {
                    continue;
                }
                let mut combos: Vec<Vec<Attribute>> = vec![Vec::new()];
                for attr in &bare {
                    let values = &self.compound[attr.key()];
                    let mut next = Vec::with_capacity(combos.len() * values.len());
                    for combo in &combos {
                        for value in values {
                            let mut copy = combo.clone();
                            copy.push(Attribute::valued(attr.key(), value, attr.is_forbidden()));
                            next.push(copy);
                        }
                    }
                    combos = next;
                }
                combos
            };
            let template = self.entries[index].take().unwrap();
            for combo in combos {
                let mut copy = template.clone();
                for attr in combo {
                    // same key: the upsert replaces the bare dependency
                    copy.op.dependencies.insert(attr);
                }
                self.push_dedup(copy);
            }
        }
    }

    fn note_compound_values(&mut self, step: &TestStep) {
        for attr in step.op.changes.iter() {
            if let Some(value) = attr.value() {
                self.compound
                    .entry(attr.key().to_string())
                    .or_default()
                    .insert(value.to_string());
            }
        }
    }

    fn push_dedup(&mut self, step: TestStep) -> StepId {
        for entry in self.entries.iter_mut() {
            if let Some(existing) = entry {
                if existing.same_identity(&step) {
                    *entry = None;
                    break;
                }
            }
        }
        let id = StepId::from_index(self.entries.len());
        self.entries.push(Some(step));
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(records: &[&str]) -> StepStore {
        let mut store = StepStore::new();
        for record in records {
            store.add_text(record).unwrap();
        }
        store
    }

    fn shorts(store: &StepStore) -> Vec<&str> {
        store.iter().map(|(_, step)| step.short.as_str()).collect()
    }

    #[test]
    fn re_adding_replaces_and_appends() {
        let mut store = store_with(&[
            "short: a\nchanges: x\ncost: 1\n",
            "short: b\nchanges: y\ncost: 1\n",
        ]);
        assert_eq!(vec!["a", "b"], shorts(&store));

        store.add_text("short: a\nchanges: x,z\ncost: 5\n").unwrap();
        assert_eq!(2, store.len());
        assert_eq!(vec!["b", "a"], shorts(&store));
        assert_eq!(5, store.lookup("a").unwrap().cost);
    }

    #[test]
    fn different_dependencies_are_different_steps() {
        let store = store_with(&[
            "short: a\ndependencies: one\nchanges: x\n",
            "short: a\ndependencies: two\nchanges: x\n",
        ]);
        assert_eq!(2, store.len());
    }

    #[test]
    fn mark_required_touches_every_copy() {
        let mut store = store_with(&[
            "short: a\ndependencies: one\nchanges: x\nrequired: yes\n",
            "short: a\ndependencies: two\nchanges: x\nrequired: yes\n",
        ]);
        assert_eq!(2, store.required_steps().len());
        assert!(store.mark_required("a", false));
        assert!(store.required_steps().is_empty());
        assert!(!store.mark_required("missing", true));
    }

    #[test]
    fn explicit_values_multiplex_on_add() {
        let store = store_with(&["short: one\ndependencies: two=apple,two=banana\ncost: 1\n"]);
        assert_eq!(2, store.len());
        let deps: Vec<String> = store.iter().map(|(_, s)| s.op.dependencies.to_string()).collect();
        assert_eq!(vec!["two=apple", "two=banana"], deps);
    }

    #[test]
    fn bare_compound_dependencies_expand_per_value() {
        let mut store = store_with(&[
            "short: one\ndependencies: two,three,four\nchanges: !three\ncost: 1\nrequired: yes\n",
            "short: two_one\nchanges: two=1\ncost: 1\n",
            "short: two_two\nchanges: two=2\ncost: 1\n",
            "short: three_one\nchanges: three=1\ncost: 1\n",
            "short: three_two\nchanges: three=2\ncost: 1\n",
            "short: four\nchanges: four\ncost: 1\n",
        ]);

        let required = store.required_steps();
        assert_eq!(4, required.len(), "one copy per two/three value combination");
        for id in &required {
            let step = store.get(*id);
            assert_eq!("one", step.short);
            for attr in step.op.dependencies.iter() {
                if attr.key() != "four" {
                    assert!(attr.value().is_some(), "compound dependency was rewritten");
                }
            }
        }

        // `four` is not compound: no value was ever seen for it
        let deps: BTreeSet<String> = required
            .iter()
            .map(|id| store.get(*id).op.dependencies.to_string())
            .collect();
        let expected: BTreeSet<String> = [
            "four,three=1,two=1",
            "four,three=1,two=2",
            "four,three=2,two=1",
            "four,three=2,two=2",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(expected, deps);
    }

    #[test]
    fn expansion_is_idempotent() {
        let mut store = store_with(&[
            "short: eat\ndependencies: fruit\ncost: 1\nrequired: yes\n",
            "short: apple\nchanges: fruit=apple\n",
            "short: pear\nchanges: fruit=pear\n",
        ]);
        let first = store.required_steps();
        assert_eq!(2, first.len());
        let second = store.required_steps();
        assert_eq!(first, second);
        store.expand_compounds();
        assert_eq!(first, store.required_ids());
    }

    #[test]
    fn forbidden_bare_compound_keeps_polarity() {
        let mut store = store_with(&[
            "short: fresh\ndependencies: !fruit\ncost: 1\nrequired: yes\n",
            "short: apple\nchanges: fruit=apple\n",
        ]);
        let required = store.required_steps();
        assert_eq!(1, required.len());
        let attr = store.get(required[0]).op.dependencies.iter().next().unwrap();
        assert!(attr.is_forbidden());
        assert_eq!(Some("apple"), attr.value());
    }
}
