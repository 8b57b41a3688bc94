//! Content-addressed digests for staleness detection.
//!
//! A module's digest is a pure function of its spec entries' source text plus
//! the digests of everything those entries transitively depend on. Combining
//! constituent digests sorts spec refs first, so the result is independent of
//! enumeration order.

use sha2::{Digest, Sha256};

use crate::graph::SpecGraph;
use crate::spec::{SpecEntry, SpecRef, SpecSet};

/// Digest of a single entry's own source (hex, no prefix).
#[must_use]
pub fn local_digest(entry: &SpecEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entry.qualname.as_bytes());
    hasher.update(b"\x00");
    hasher.update(entry.source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Digest of an entry plus its transitive spec dependencies.
///
/// Traversal carries a visited guard, so cyclic spec graphs terminate; the
/// contribution set is sorted by ref before hashing.
#[must_use]
pub fn graph_digest(spec_ref: &SpecRef, set: &SpecSet, spec_graph: &SpecGraph) -> String {
    let mut refs: Vec<&SpecRef> = Vec::new();
    let mut stack = vec![spec_ref];
    while let Some(r) = stack.pop() {
        if refs.contains(&r) {
            continue;
        }
        refs.push(r);
        for dep in spec_graph.get(r).into_iter().flatten() {
            stack.push(dep);
        }
    }
    refs.sort();

    let mut hasher = Sha256::new();
    for r in refs {
        hasher.update(r.to_string().as_bytes());
        hasher.update(b"\x00");
        if let Some(entry) = set.by_ref.get(r) {
            hasher.update(local_digest(entry).as_bytes());
        }
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Aggregate digest for a module's artifact (hex, no prefix).
///
/// Order-independent over `entries`: contributions are sorted by spec ref.
#[must_use]
pub fn module_digest(
    module: &str,
    entries: &[&SpecEntry],
    set: &SpecSet,
    spec_graph: &SpecGraph,
) -> String {
    let mut parts: Vec<(String, String)> = entries
        .iter()
        .map(|e| {
            (
                e.spec_ref.to_string(),
                graph_digest(&e.spec_ref, set, spec_graph),
            )
        })
        .collect();
    parts.sort();

    let mut hasher = Sha256::new();
    hasher.update(module.as_bytes());
    hasher.update(b"\x00");
    for (r, d) in parts {
        hasher.update(r.as_bytes());
        hasher.update(b"\x00");
        hasher.update(d.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}
