//! # forge-build
//!
//! The incremental, dependency-aware build engine: staleness detection over
//! artifact-header digests, transitive stale-set expansion, critical-path
//! prioritization, a content-addressed response cache, cost tracking with an
//! optional hard budget, atomic artifact writes, and the concurrent scheduler
//! that ties them together.

pub mod cache;
pub mod cost;
pub mod priority;
pub mod progress;
pub mod report;
pub mod scheduler;
pub mod stale;
pub mod writer;

pub use cache::{CacheEntry, ResponseCache, cache_key};
pub use cost::CostTracker;
pub use priority::critical_path_priorities;
pub use progress::{BuildProgress, NoProgress};
pub use report::BuildReport;
pub use scheduler::{BuildOptions, BuildScheduler};
pub use stale::{detect_stale, expand_stale, read_artifact_digest};
pub use writer::ArtifactWriter;
