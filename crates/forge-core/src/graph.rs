//! Spec-level and module-level dependency graphs.
//!
//! The spec graph is built from declared dependency refs, then collapsed to
//! module granularity for scheduling. Cycle detection runs on the module DAG
//! before any work is dispatched; `find_cycles` enumerates simple cycles for
//! diagnostics only.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::{Context, Result};

use crate::error::ForgeError;
use crate::spec::{SpecRef, SpecSet};

/// Spec-level dependency graph: ref → refs it depends on.
pub type SpecGraph = BTreeMap<SpecRef, BTreeSet<SpecRef>>;

/// Module-level dependency graph: module → modules it depends on.
pub type ModuleDag = BTreeMap<String, BTreeSet<String>>;

/// Resolve declared dependency refs into a spec-level graph.
///
/// # Errors
///
/// Fails when an entry declares a dependency on a ref that is not in the set.
pub fn build_spec_graph(set: &SpecSet) -> Result<SpecGraph> {
    let mut graph = SpecGraph::new();
    for (spec_ref, entry) in &set.by_ref {
        let mut deps = BTreeSet::new();
        for dep in &entry.deps {
            if !set.by_ref.contains_key(dep) {
                return Err(anyhow::anyhow!("unknown dependency {dep}"))
                    .with_context(|| format!("spec {spec_ref} declares an unresolvable dep"));
            }
            deps.insert(dep.clone());
        }
        graph.insert(spec_ref.clone(), deps);
    }
    Ok(graph)
}

/// Collapse a spec graph to module granularity, dropping self-edges.
///
/// Every module owning at least one spec appears as a key, even with no deps.
#[must_use]
pub fn module_dag(spec_graph: &SpecGraph) -> ModuleDag {
    let mut dag = ModuleDag::new();
    for (spec_ref, deps) in spec_graph {
        let entry = dag.entry(spec_ref.module.clone()).or_default();
        for dep in deps {
            if dep.module != spec_ref.module {
                entry.insert(dep.module.clone());
            }
        }
    }
    dag
}

/// Invert a DAG into a dependents map: module → modules that depend on it.
#[must_use]
pub fn dependents_map(dag: &ModuleDag) -> BTreeMap<String, BTreeSet<String>> {
    let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (module, deps) in dag {
        for dep in deps {
            dependents
                .entry(dep.clone())
                .or_default()
                .insert(module.clone());
        }
    }
    dependents
}

/// Kahn's-algorithm topological order over a module graph.
///
/// The tie-break among simultaneously-ready nodes is lexicographic, which
/// keeps the enumeration deterministic. Scheduling does its own priority
/// ordering; this order is used for validation and reporting.
///
/// # Errors
///
/// Returns [`ForgeError::DependencyCycle`] naming one cycle's participants,
/// in cycle order, when the graph is not acyclic.
pub fn topological_order(graph: &ModuleDag) -> Result<Vec<String>, ForgeError> {
    let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (module, deps) in graph {
        indegree.entry(module).or_insert(0);
        for dep in deps {
            // Edges to nodes outside the graph do not gate readiness.
            if !graph.contains_key(dep) {
                continue;
            }
            *indegree.entry(module).or_insert(0) += 1;
            dependents.entry(dep).or_default().insert(module);
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(m, _)| *m)
        .collect();
    let mut order = Vec::with_capacity(graph.len());

    while let Some(&module) = ready.iter().next() {
        ready.remove(module);
        order.push(module.to_string());
        if let Some(deps) = dependents.get(module) {
            for &dependent in deps {
                let n = indegree
                    .get_mut(dependent)
                    .expect("dependent is tracked in indegree map");
                *n -= 1;
                if *n == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() == graph.len() {
        return Ok(order);
    }

    // Some nodes never became ready: extract one cycle for the error.
    let remaining: BTreeSet<&str> = graph
        .keys()
        .map(String::as_str)
        .filter(|m| !order.iter().any(|o| o == m))
        .collect();
    Err(ForgeError::DependencyCycle {
        participants: extract_cycle(graph, &remaining),
    })
}

/// Walk forward through dependency edges among `remaining` until a node
/// repeats; the repeated segment is a cycle, reported in cycle order.
fn extract_cycle(graph: &ModuleDag, remaining: &BTreeSet<&str>) -> Vec<String> {
    let start = remaining
        .iter()
        .next()
        .expect("cycle extraction requires at least one remaining node");
    let mut path: Vec<&str> = vec![start];
    let mut seen: HashSet<&str> = HashSet::from([*start]);
    loop {
        let current = *path.last().expect("path is never empty");
        let next = graph
            .get(current)
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|d| remaining.contains(d));
        let Some(next) = next else {
            // Every remaining node keeps at least one remaining dep, so this
            // is unreachable for a true residual cycle; fall back to the set.
            return remaining.iter().map(|m| (*m).to_string()).collect();
        };
        if seen.contains(next) {
            let pos = path
                .iter()
                .position(|m| *m == next)
                .expect("seen nodes are on the path");
            let mut cycle: Vec<String> = path[pos..].iter().map(|m| (*m).to_string()).collect();
            cycle.push(next.to_string());
            return cycle;
        }
        seen.insert(next);
        path.push(next);
    }
}

/// Enumerate every simple cycle in the graph, for diagnostics.
///
/// Cycles are deduplicated by rotating each to start at its smallest member,
/// so the output is deterministic for a fixed graph.
#[must_use]
pub fn find_cycles(graph: &ModuleDag) -> Vec<Vec<String>> {
    let mut cycles: Vec<Vec<String>> = Vec::new();
    let mut seen_keys: HashSet<Vec<String>> = HashSet::new();

    for start in graph.keys() {
        let mut path: Vec<&str> = Vec::new();
        let mut on_path: HashSet<&str> = HashSet::new();
        dfs_cycles(
            graph,
            start,
            start,
            &mut path,
            &mut on_path,
            &mut cycles,
            &mut seen_keys,
        );
    }
    cycles
}

fn dfs_cycles<'a>(
    graph: &'a ModuleDag,
    start: &'a str,
    current: &'a str,
    path: &mut Vec<&'a str>,
    on_path: &mut HashSet<&'a str>,
    cycles: &mut Vec<Vec<String>>,
    seen_keys: &mut HashSet<Vec<String>>,
) {
    path.push(current);
    on_path.insert(current);

    for dep in graph.get(current).into_iter().flatten() {
        if dep == start {
            let cycle: Vec<String> = path.iter().map(|m| (*m).to_string()).collect();
            let key = normalize_cycle(&cycle);
            if seen_keys.insert(key) {
                cycles.push(cycle);
            }
        } else if !on_path.contains(dep.as_str()) && graph.contains_key(dep) {
            dfs_cycles(graph, start, dep, path, on_path, cycles, seen_keys);
        }
    }

    path.pop();
    on_path.remove(current);
}

/// Rotate a cycle so its lexicographically smallest member comes first.
fn normalize_cycle(cycle: &[String]) -> Vec<String> {
    let min_pos = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map_or(0, |(i, _)| i);
    let mut rotated = Vec::with_capacity(cycle.len());
    rotated.extend_from_slice(&cycle[min_pos..]);
    rotated.extend_from_slice(&cycle[..min_pos]);
    rotated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{SpecEntry, SpecKind};

    fn dag(edges: &[(&str, &[&str])]) -> ModuleDag {
        edges
            .iter()
            .map(|(m, deps)| {
                (
                    (*m).to_string(),
                    deps.iter().map(|d| (*d).to_string()).collect(),
                )
            })
            .collect()
    }

    fn entry(module: &str, qualname: &str, deps: &[&str]) -> SpecEntry {
        SpecEntry {
            kind: SpecKind::Magic,
            spec_ref: SpecRef::new(module, qualname),
            module: module.to_string(),
            qualname: qualname.to_string(),
            class_name: None,
            source: String::new(),
            deps: deps.iter().map(|d| SpecRef::parse(d).unwrap()).collect(),
            prompt: None,
        }
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let g = dag(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);
        let order = topological_order(&g).unwrap();
        let pos = |m: &str| order.iter().position(|o| o == m).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn two_node_cycle_is_reported_with_both_participants() {
        let g = dag(&[("a", &["b"]), ("b", &["a"])]);
        let err = topological_order(&g).unwrap_err();
        let participants = err.cycle_participants().unwrap();
        assert!(participants.contains(&"a".to_string()));
        assert!(participants.contains(&"b".to_string()));
    }

    #[test]
    fn edges_outside_graph_are_ignored() {
        let g = dag(&[("a", &["external.mod"])]);
        let order = topological_order(&g).unwrap();
        assert_eq!(order, vec!["a"]);
    }

    #[test]
    fn find_cycles_enumerates_and_deduplicates() {
        let g = dag(&[("a", &["b"]), ("b", &["a"]), ("c", &["c"])]);
        let cycles = find_cycles(&g);
        assert_eq!(cycles.len(), 2);
        let lens: BTreeSet<usize> = cycles.iter().map(Vec::len).collect();
        assert_eq!(lens, BTreeSet::from([1, 2]));
    }

    #[test]
    fn find_cycles_empty_for_acyclic_graph() {
        let g = dag(&[("a", &[]), ("b", &["a"])]);
        assert!(find_cycles(&g).is_empty());
    }

    #[test]
    fn spec_graph_collapses_to_module_dag_without_self_edges() {
        let set = SpecSet::from_entries(vec![
            entry("pkg.a", "A", &[]),
            entry("pkg.a", "A2", &["pkg.a:A"]),
            entry("pkg.b", "B", &["pkg.a:A"]),
        ])
        .unwrap();
        let spec_graph = build_spec_graph(&set).unwrap();
        let dag = module_dag(&spec_graph);

        assert!(dag["pkg.a"].is_empty());
        assert_eq!(dag["pkg.b"], BTreeSet::from(["pkg.a".to_string()]));
    }

    #[test]
    fn unknown_dep_is_an_error() {
        let set = SpecSet::from_entries(vec![entry("pkg.a", "A", &["pkg.zzz:Gone"])]).unwrap();
        assert!(build_spec_graph(&set).is_err());
    }

    #[test]
    fn dependents_map_inverts_edges() {
        let g = dag(&[("a", &[]), ("b", &["a"]), ("c", &["a"])]);
        let dependents = dependents_map(&g);
        assert_eq!(
            dependents["a"],
            BTreeSet::from(["b".to_string(), "c".to_string()])
        );
        assert!(!dependents.contains_key("b"));
    }
}
