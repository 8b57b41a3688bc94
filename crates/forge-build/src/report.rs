//! Build outcome report.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

/// Final outcome of one build run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BuildReport {
    /// Modules regenerated in this run.
    pub generated: BTreeSet<String>,
    /// Modules that were not stale and ran nothing.
    pub skipped: BTreeSet<String>,
    /// Failed module name to its error messages.
    pub failed: BTreeMap<String, Vec<String>>,
}

impl BuildReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// One-line outcome for logs.
    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "{} generated, {} skipped, {} failed",
            self.generated.len(),
            self.skipped.len(),
            self.failed.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_means_no_failures() {
        let mut report = BuildReport::default();
        report.generated.insert("a".into());
        assert!(report.is_success());
        report.failed.insert("b".into(), vec!["boom".into()]);
        assert!(!report.is_success());
        assert_eq!(report.summary_line(), "1 generated, 0 skipped, 1 failed");
    }
}
