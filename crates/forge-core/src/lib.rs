//! Core types for specforge: spec entries, dependency graphs, and digests.
//!
//! Provides the spec data model ([`spec::SpecEntry`], [`spec::SpecSet`]), the
//! spec-level and module-level dependency graphs with cycle diagnostics, the
//! content-addressed digest service used for staleness detection, the
//! generated-artifact header format, and shared configuration.

pub mod config;
pub mod digest;
pub mod error;
pub mod graph;
pub mod header;
pub mod paths;
pub mod spec;

pub use error::ForgeError;
pub use spec::{SpecEntry, SpecKind, SpecRef, SpecSet};
