use std::fmt;
use serde::{Serialize, Deserialize};

use crate::node;
use crate::report::Value;
use crate::round::{HashGroup, RoundState};

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct ValueGroup {
    pub value: Value,
    pub nodes: Vec<node::Id>
}

// One key that nodes on the same hash disagree about.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct KeyDivergence {
    pub key: String,
    pub values: Vec<ValueGroup>
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Group {
    pub hash: String,
    pub nodes: Vec<node::Id>,
    // State divergence inside this group, if any.
    pub divergences: Vec<KeyDivergence>
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Consistent {
        hash: String,
        nodes: Vec<node::Id>
    },
    // Only one node reported this height: nothing to compare against.
    UnderObserved {
        hash: String,
        node: node::Id
    },
    Fork {
        groups: Vec<Group>
    },
    StateDivergence {
        hash: String,
        nodes: Vec<node::Id>,
        keys: Vec<KeyDivergence>
    }
}

impl Verdict {
    pub fn is_consistent(&self) -> bool {
        matches!(self, Verdict::Consistent { .. })
    }

    // Fork or state divergence.
    pub fn is_finding(&self) -> bool {
        matches!(self, Verdict::Fork { .. } | Verdict::StateDivergence { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Verdict::Consistent { .. } => "consistent",
            Verdict::UnderObserved { .. } => "under_observed",
            Verdict::Fork { .. } => "fork",
            Verdict::StateDivergence { .. } => "state_divergence"
        }
    }
}

fn divergences(group: &HashGroup) -> Vec<KeyDivergence> {
    group.keys
        .iter()
        .filter(|(_, values)| values.len() > 1)
        .map(|(key, values)| KeyDivergence {
            key: key.clone(),
            values: values
                .iter()
                .map(|(value, ids)| ValueGroup {
                    value: *value,
                    nodes: ids.iter().copied().collect()
                })
                .collect()
        })
        .collect()
}

// Classifies one finalized height. None for a round nobody reported.
pub fn detect(round: &RoundState) -> Option<Verdict> {
    let mut groups: Vec<Group> = round.groups
        .iter()
        .map(|(hash, group)| Group {
            hash: hash.clone(),
            nodes: group.nodes.iter().copied().collect(),
            divergences: divergences(group)
        })
        .collect();
    if groups.len() > 1 {
        return Some(Verdict::Fork { groups });
    }
    let Group { hash, nodes, divergences } = groups.pop()?;
    Some(match nodes.len() {
        0 => return None,
        1 => Verdict::UnderObserved { hash, node: nodes[0] },
        _ if !divergences.is_empty() => Verdict::StateDivergence { hash, nodes, keys: divergences },
        _ => Verdict::Consistent { hash, nodes }
    })
}

fn fmt_values(f: &mut fmt::Formatter<'_>, div: &KeyDivergence) -> fmt::Result {
    write!(f, "{:?} {{", div.key)?;
    for (i, group) in div.values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}: {:?}", group.value, group.nodes)?;
    }
    write!(f, "}}")
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Consistent { hash, nodes } => {
                write!(f, "consistent on {} across {:?}", hash, nodes)
            },
            Verdict::UnderObserved { hash, node } => {
                write!(f, "under-observed: only node {} reported {}", node, hash)
            },
            Verdict::Fork { groups } => {
                write!(f, "fork:")?;
                for group in groups {
                    write!(f, " {} {:?}", group.hash, group.nodes)?;
                    for div in &group.divergences {
                        write!(f, " diverged ")?;
                        fmt_values(f, div)?;
                    }
                }
                Ok(())
            },
            Verdict::StateDivergence { hash, keys, .. } => {
                write!(f, "state divergence on {}:", hash)?;
                for div in keys {
                    write!(f, " ")?;
                    fmt_values(f, div)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::report::tests::report;
    use crate::round::Aggregator;

    fn value(x: f64) -> Value {
        Value::new(x).unwrap()
    }

    fn verdict(reports: &[(node::Id, crate::report::StateReport)]) -> Verdict {
        let mut agg = Aggregator::new();
        for (id, r) in reports {
            agg.observe(*id, r.clone());
        }
        let window = agg.finalize();
        assert_eq!(window.rounds.len(), 1);
        detect(window.rounds[0]).unwrap()
    }

    #[test]
    fn consistent() {
        let v = verdict(&[
            (1, report(100, "h1", &[("x", 5.0), ("y", 1.5)])),
            (2, report(100, "h1", &[("x", 5.0), ("y", 1.5)])),
            (3, report(100, "h1", &[("y", 1.5), ("x", 5.0)])),
        ]);
        assert_eq!(v, Verdict::Consistent { hash: String::from("h1"), nodes: vec![1, 2, 3] });
        assert!(v.is_consistent());
        assert!(!v.is_finding());
    }

    #[test]
    fn fork() {
        let v = verdict(&[
            (1, report(100, "X", &[("x", 5.0)])),
            (2, report(100, "Y", &[("x", 5.0)])),
            (3, report(100, "X", &[("x", 5.0)])),
        ]);
        assert_eq!(v, Verdict::Fork { groups: vec![
            Group { hash: String::from("X"), nodes: vec![1, 3], divergences: vec![] },
            Group { hash: String::from("Y"), nodes: vec![2], divergences: vec![] },
        ]});
        assert_eq!(v.kind(), "fork");
    }

    #[test]
    fn fork_with_divergence_inside_group() {
        let v = verdict(&[
            (1, report(100, "X", &[("x", 5.0)])),
            (2, report(100, "X", &[("x", 6.0)])),
            (3, report(100, "Y", &[("x", 9.0)])),
        ]);
        let Verdict::Fork { groups } = v else { panic!("expected fork") };
        assert_eq!(groups[0].divergences, vec![KeyDivergence {
            key: String::from("x"),
            values: vec![
                ValueGroup { value: value(5.0), nodes: vec![1] },
                ValueGroup { value: value(6.0), nodes: vec![2] },
            ]
        }]);
        assert!(groups[1].divergences.is_empty());
    }

    #[test]
    fn state_divergence() {
        let v = verdict(&[
            (1, report(100, "h1", &[("alice", 10.0)])),
            (2, report(100, "h1", &[("alice", 20.0)])),
        ]);
        assert_eq!(v, Verdict::StateDivergence {
            hash: String::from("h1"),
            nodes: vec![1, 2],
            keys: vec![KeyDivergence {
                key: String::from("alice"),
                values: vec![
                    ValueGroup { value: value(10.0), nodes: vec![1] },
                    ValueGroup { value: value(20.0), nodes: vec![2] },
                ]
            }]
        });
    }

    #[test]
    fn three_nodes_one_off() {
        let v = verdict(&[
            (1, report(100, "h1", &[("x", 5.0)])),
            (2, report(100, "h1", &[("x", 5.0)])),
            (3, report(100, "h1", &[("x", 7.0)])),
        ]);
        let Verdict::StateDivergence { keys, .. } = v else { panic!("expected divergence") };
        assert_eq!(keys, vec![KeyDivergence {
            key: String::from("x"),
            values: vec![
                ValueGroup { value: value(5.0), nodes: vec![1, 2] },
                ValueGroup { value: value(7.0), nodes: vec![3] },
            ]
        }]);
    }

    #[test]
    fn near_equal_is_divergent() {
        let v = verdict(&[
            (1, report(100, "h1", &[("x", 0.3)])),
            (2, report(100, "h1", &[("x", 0.1 + 0.2)])),
        ]);
        assert_eq!(v.kind(), "state_divergence");
    }

    #[test]
    fn under_observed() {
        let v = verdict(&[(4, report(100, "h1", &[("x", 5.0)]))]);
        assert_eq!(v, Verdict::UnderObserved { hash: String::from("h1"), node: 4 });
        assert!(!v.is_consistent());
        assert!(!v.is_finding());
    }

    #[test]
    fn empty_round() {
        assert_eq!(detect(&RoundState::new(7)), None);
    }

    #[test]
    fn lagging_node_is_not_a_fork() {
        let mut agg = Aggregator::with_max_lag(1);
        for id in 1..=3 {
            agg.observe(id, report(100, "h100", &[("x", 1.0)]));
        }
        agg.finalize();
        agg.observe(1, report(101, "h101", &[("x", 2.0)]));
        agg.observe(2, report(101, "h101", &[("x", 2.0)]));
        // Node 3 answers from further behind than the fleet tolerates.
        agg.observe(3, report(99, "stale", &[("x", 0.0)]));
        let window = agg.finalize();
        assert_eq!(window.lagging, vec![(3, 99)]);
        let verdicts: Vec<Verdict> = window.rounds.iter().filter_map(|r| detect(r)).collect();
        assert_eq!(verdicts, vec![Verdict::Consistent { hash: String::from("h101"), nodes: vec![1, 2] }]);
    }

    #[test]
    fn display() {
        let v = verdict(&[
            (1, report(100, "h1", &[("x", 5.0)])),
            (2, report(100, "h1", &[("x", 7.0)])),
        ]);
        assert_eq!(v.to_string(), "state divergence on h1: \"x\" {5: [1], 7: [2]}");
    }
}
