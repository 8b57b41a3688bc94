//! Critical-path scheduling priorities.
//!
//! A module's priority is the length of the longest chain of dependents it
//! unblocks within the working set. Running high-priority modules first keeps
//! the longest remaining chains moving under bounded concurrency.

use std::collections::{BTreeMap, BTreeSet};

use forge_core::graph::{ModuleDag, dependents_map};

/// Longest-downstream-chain length per working-set module.
///
/// Traversal is restricted to the working set's induced dependents graph, so
/// cycles elsewhere in the full DAG cannot cause runaway recursion. Computed
/// with an explicit stack; dependency chains can be deep.
#[must_use]
pub fn critical_path_priorities(
    working_set: &BTreeSet<String>,
    dag: &ModuleDag,
) -> BTreeMap<String, usize> {
    let all_dependents = dependents_map(dag);
    let dependents_of = |name: &str| -> Vec<&String> {
        all_dependents
            .get(name)
            .map(|deps| deps.iter().filter(|d| working_set.contains(*d)).collect())
            .unwrap_or_default()
    };

    let mut priorities: BTreeMap<String, usize> = BTreeMap::new();
    for start in working_set {
        if priorities.contains_key(start) {
            continue;
        }
        // Post-order walk: a node is finalized once all its dependents are.
        let mut stack: Vec<(&String, bool)> = vec![(start, false)];
        let mut in_progress: BTreeSet<&String> = BTreeSet::new();
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                in_progress.remove(node);
                let best = dependents_of(node)
                    .into_iter()
                    .filter_map(|d| priorities.get(d))
                    .max()
                    .copied();
                priorities.insert(node.clone(), best.map_or(0, |p| p + 1));
                continue;
            }
            if priorities.contains_key(node) || !in_progress.insert(node) {
                continue;
            }
            stack.push((node, true));
            for dependent in dependents_of(node) {
                if !priorities.contains_key(dependent) && !in_progress.contains(dependent) {
                    stack.push((dependent, false));
                }
            }
        }
    }
    priorities
}
