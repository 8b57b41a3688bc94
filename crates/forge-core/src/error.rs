//! Shared error taxonomy for the build pipeline.

/// Errors surfaced by the build pipeline as a whole.
///
/// Per-module generation failures are not errors at this level: they are
/// recorded in the build report's failed map and never abort the run.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    /// The module dependency graph contains a cycle. Terminal: nothing runs.
    #[error("dependency cycle detected: {}", participants.join(" -> "))]
    DependencyCycle {
        /// Cycle member names, in cycle order.
        participants: Vec<String>,
    },

    /// Unrecoverable generation failure (e.g. no source returned).
    #[error("{0}")]
    Generation(String),

    /// Estimated spend crossed the configured ceiling.
    #[error("build cost ${spent:.4} exceeds budget limit ${limit:.4}; aborting")]
    BudgetExceeded {
        /// Estimated cost so far, in USD.
        spent: f64,
        /// The configured ceiling, in USD.
        limit: f64,
    },
}

impl ForgeError {
    /// Cycle participants, if this is a cycle error.
    #[must_use]
    pub fn cycle_participants(&self) -> Option<&[String]> {
        match self {
            Self::DependencyCycle { participants } => Some(participants),
            _ => None,
        }
    }
}
