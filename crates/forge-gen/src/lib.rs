//! # forge-gen
//!
//! Generation backends and validators for specforge.
//!
//! The build scheduler consumes two narrow capabilities from this crate:
//!
//! - [`backend::GeneratorBackend`]: turns a [`context::ModuleContext`] into
//!   generated source text plus token usage, with a provided deterministic
//!   retry loop that feeds validation errors back into the next attempt.
//! - [`backend::ExtraValidator`]: an optional second validation stage (the
//!   external type checker) composed after the symbol validator.
//!
//! Concrete providers implement only the core generation method; everything
//! else is derived.

pub mod backend;
pub mod context;
pub mod prompt;
pub mod provider;
pub mod typecheck;
pub mod validate;

pub use backend::{ExtraValidator, GeneratorBackend, GenerationResult};
pub use context::{ContextKind, ModuleContext, TokenUsage};
pub use provider::OpenAiBackend;
pub use typecheck::TypeCheckValidator;
