use std::collections::{BTreeMap, BTreeSet};
use std::collections::btree_map::Entry;

use crate::node;
use crate::report::{StateReport, Value};

// Nodes that agree on one block hash at one height, and what each of them
// said about every key.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct HashGroup {
    pub nodes: BTreeSet<node::Id>,
    pub keys: BTreeMap<String, BTreeMap<Value, BTreeSet<node::Id>>>
}

impl HashGroup {
    fn add(&mut self, id: node::Id, report: &StateReport) {
        self.nodes.insert(id);
        for (key, value) in &report.entries {
            self.keys
                .entry(key.clone())
                .or_default()
                .entry(*value)
                .or_default()
                .insert(id);
        }
    }

    fn remove(&mut self, id: node::Id) {
        self.nodes.remove(&id);
        self.keys.retain(|_, values| {
            values.retain(|_, ids| {
                ids.remove(&id);
                !ids.is_empty()
            });
            !values.is_empty()
        });
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct RoundState {
    pub height: u64,
    // hash -> group
    pub groups: BTreeMap<String, HashGroup>,
    // node -> the one hash it reported at this height
    reporters: BTreeMap<node::Id, String>
}

impl RoundState {
    pub fn new(height: u64) -> Self {
        Self {
            height,
            groups: BTreeMap::default(),
            reporters: BTreeMap::default()
        }
    }

    pub fn reporters(&self) -> impl Iterator<Item = &node::Id> {
        self.reporters.keys()
    }

    pub fn num_reporters(&self) -> usize {
        self.reporters.len()
    }

    // A second report from the same node replaces the first.
    pub(crate) fn fold(&mut self, id: node::Id, report: &StateReport) {
        debug_assert_eq!(report.height, self.height);
        self.remove(id);
        self.groups
            .entry(report.hash.clone())
            .or_default()
            .add(id, report);
        self.reporters.insert(id, report.hash.clone());
    }

    pub(crate) fn remove(&mut self, id: node::Id) {
        if let Some(old) = self.reporters.remove(&id) {
            if let Entry::Occupied(mut group) = self.groups.entry(old) {
                group.get_mut().remove(id);
                if group.get().nodes.is_empty() {
                    group.remove();
                }
            }
        }
    }
}

// The in-window rounds after a cycle, lowest height first.
#[derive(Debug)]
pub struct Window<'a> {
    pub min_height: Option<u64>,
    pub rounds: Vec<&'a RoundState>,
    pub lagging: Vec<(node::Id, u64)>
}

// How far below the cycle's highest report a node may be before it counts
// as lagging.
pub const DEFAULT_MAX_LAG: u64 = 16;

#[derive(Debug)]
pub struct Aggregator {
    rounds: BTreeMap<u64, RoundState>,
    // Height each node reported this cycle.
    cycle: BTreeMap<node::Id, u64>,
    max_lag: u64
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::with_max_lag(DEFAULT_MAX_LAG)
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_lag(max_lag: u64) -> Self {
        Self {
            rounds: BTreeMap::default(),
            cycle: BTreeMap::default(),
            max_lag
        }
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn get(&self, height: u64) -> Option<&RoundState> {
        self.rounds.get(&height)
    }

    pub fn observe(&mut self, id: node::Id, report: StateReport) {
        // One report per node per cycle: a node that already answered at a
        // different height this cycle is moved, not duplicated.
        if let Some(prev) = self.cycle.insert(id, report.height) {
            if prev != report.height {
                self.unfold(id, prev);
            }
        }
        self.rounds
            .entry(report.height)
            .or_insert_with(|| RoundState::new(report.height))
            .fold(id, &report);
    }

    fn unfold(&mut self, id: node::Id, height: u64) {
        if let Some(round) = self.rounds.get_mut(&height) {
            round.remove(id);
            if round.reporters.is_empty() {
                self.rounds.remove(&height);
            }
        }
    }

    // Closes the cycle. Nodes more than `max_lag` below the highest report
    // are lagging; the fleet minimum height is taken over the rest. Only
    // nodes that reported this cycle and are not lagging keep contributions,
    // and only heights between the fleet minimum and the highest report stay.
    pub fn finalize(&mut self) -> Window<'_> {
        let cycle = std::mem::take(&mut self.cycle);
        let top = cycle.values().max().copied();
        let (lagging, healthy): (Vec<(node::Id, u64)>, Vec<(node::Id, u64)>) = cycle
            .into_iter()
            .partition(|(_, height)| top.map_or(false, |top| height.saturating_add(self.max_lag) < top));
        let min_height = healthy.iter().map(|(_, height)| *height).min();
        let keep: BTreeSet<node::Id> = healthy.iter().map(|(id, _)| *id).collect();

        for round in self.rounds.values_mut() {
            let stale: Vec<node::Id> = round.reporters
                .keys()
                .filter(|id| !keep.contains(id))
                .copied()
                .collect();
            for id in stale {
                round.remove(id);
            }
        }
        self.rounds.retain(|height, round| {
            !round.reporters.is_empty()
                && min_height.map_or(false, |min| *height >= min)
                && top.map_or(false, |top| *height <= top)
        });

        Window {
            min_height,
            rounds: self.rounds.values().collect(),
            lagging
        }
    }
}
