//! Staleness detection and stale-set expansion.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use forge_core::graph::{ModuleDag, dependents_map};
use forge_core::header::{extract_module_digest, normalize_digest};
use forge_core::paths::generated_relpath;

/// Modules whose stored digest is missing or disagrees with the declared one.
///
/// `stored` resolves a module name to its persisted digest, or `None` when
/// the artifact is absent or unreadable. `force` marks everything stale.
#[must_use]
pub fn detect_stale(
    declared: &BTreeMap<String, String>,
    stored: impl Fn(&str) -> Option<String>,
    force: bool,
) -> BTreeSet<String> {
    if force {
        return declared.keys().cloned().collect();
    }
    declared
        .iter()
        .filter(|(name, digest)| {
            let recorded = stored(name).and_then(|s| normalize_digest(&s).map(str::to_string));
            recorded.as_deref() != Some(digest.as_str())
        })
        .map(|(name, _)| name.clone())
        .collect()
}

/// Read the digest recorded in a generated artifact's header.
///
/// Any read or parse failure yields `None`, which callers treat as stale.
#[must_use]
pub fn read_artifact_digest(package_root: &Path, generated_dir: &str, module: &str) -> Option<String> {
    let path = package_root.join(generated_relpath(module, generated_dir));
    let contents = std::fs::read_to_string(path).ok()?;
    extract_module_digest(&contents).and_then(|d| normalize_digest(&d).map(str::to_string))
}

/// Closure of `stale` under "depends on a stale module".
///
/// Walks the inverted DAG with a visited guard, so cyclic input terminates
/// even though a cycle is rejected later during scheduling.
#[must_use]
pub fn expand_stale(dag: &ModuleDag, stale: &BTreeSet<String>) -> BTreeSet<String> {
    let dependents = dependents_map(dag);
    let mut closure: BTreeSet<String> = stale.clone();
    let mut stack: Vec<&String> = stale.iter().collect();
    while let Some(module) = stack.pop() {
        if let Some(deps) = dependents.get(module) {
            for dependent in deps {
                if closure.insert(dependent.clone()) {
                    stack.push(dependent);
                }
            }
        }
    }
    closure
}
