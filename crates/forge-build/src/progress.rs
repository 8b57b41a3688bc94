//! Best-effort build progress reporting.

/// Receives per-module completion events during a build.
///
/// Implementations must not assume they are called from a single thread, and
/// callers treat every method as best-effort.
pub trait BuildProgress: Send + Sync {
    /// One module reached a terminal state.
    fn advance(&self, module: &str, ok: bool);

    /// The build loop exited.
    fn finish(&self);
}

/// Discards all events.
pub struct NoProgress;

impl BuildProgress for NoProgress {
    fn advance(&self, _module: &str, _ok: bool) {}
    fn finish(&self) {}
}
