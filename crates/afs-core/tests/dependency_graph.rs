use std::collections::BTreeMap;

use afs_core::{AddOutcome, DependencyGraph};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Add(u8, u8, u8),
    Remove(u8, u8, u8),
    RemoveNode(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..6u8, 0..3u8, 0..6u8).prop_map(|(s, n, t)| Op::Add(s, n, t)),
        2 => (0..6u8, 0..3u8, 0..6u8).prop_map(|(s, n, t)| Op::Remove(s, n, t)),
        1 => (0..6u8).prop_map(Op::RemoveNode),
    ]
}

fn name(n: u8) -> String {
    format!("dep{}", n)
}

proptest! {
    /// The graph agrees with a plain map of `(source, name) -> target`
    /// after any sequence of operations.
    #[test]
    fn graph_matches_model(ops in prop::collection::vec(op(), 0..64)) {
        let mut graph = DependencyGraph::new();
        let mut model: BTreeMap<(u8, String), u8> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Add(s, n, t) => {
                    let previous = model.insert((s, name(n)), t);
                    let expected = match previous {
                        None => AddOutcome::Added,
                        Some(old) if old == t => AddOutcome::Unchanged,
                        Some(old) => AddOutcome::Replaced(old),
                    };
                    prop_assert_eq!(graph.add(&s, &name(n), &t), expected);
                }
                Op::Remove(s, n, t) => {
                    let present = model.get(&(s, name(n))) == Some(&t);
                    if present {
                        model.remove(&(s, name(n)));
                    }
                    prop_assert_eq!(graph.remove(&s, &name(n), &t), present);
                }
                Op::RemoveNode(node) => {
                    let before = model.len();
                    model.retain(|(s, _), t| *s != node && *t != node);
                    prop_assert_eq!(graph.remove_node(&node).len(), before - model.len());
                }
            }

            prop_assert!(graph.is_consistent());
            prop_assert_eq!(graph.len(), model.len());
        }

        for node in 0..6u8 {
            let mut sources: Vec<u8> = model
                .iter()
                .filter(|(_, t)| **t == node)
                .map(|((s, _), _)| *s)
                .collect();
            sources.sort();
            sources.dedup();
            let mut actual = graph.backward(&node);
            actual.sort();
            prop_assert_eq!(actual, sources);

            for ((s, n), t) in model.iter().filter(|((s, _), _)| *s == node) {
                prop_assert_eq!(graph.target(s, n), Some(t));
            }
        }
    }
}
