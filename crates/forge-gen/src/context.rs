//! The immutable input bundle for generating one module's artifact.

use std::collections::BTreeMap;

use forge_core::SpecRef;
use serde::{Deserialize, Serialize};

/// Which pipeline a context belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// Implementation generation.
    Build,
    /// Test generation (parallel pipeline, same shape).
    Test,
}

impl ContextKind {
    /// Stable string used in cache keys and artifact headers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Test => "test",
        }
    }
}

/// Everything needed to generate one module's artifact.
///
/// Built fresh per module per attempt by the scheduler's control task and
/// never mutated afterwards. Mapping fields use ordered maps so cache-key
/// hashing sees a canonical order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleContext {
    /// Pipeline kind.
    pub kind: ContextKind,
    /// Spec module being generated.
    pub spec_module: String,
    /// Dotted name of the generated counterpart module.
    pub generated_module: String,
    /// Symbols the generated source must define, in declaration order.
    pub expected_names: Vec<String>,
    /// Spec stub source per spec ref.
    pub spec_sources: BTreeMap<SpecRef, String>,
    /// Free-text guidance per spec ref.
    pub prompts: BTreeMap<SpecRef, String>,
    /// API-signature text of dependency specs.
    pub dependency_apis: BTreeMap<SpecRef, String>,
    /// Full source of already-generated dependency artifacts, by module.
    pub dependency_sources: BTreeMap<String, String>,
    /// Shared free-text guidance block applied to every module.
    pub shared_guidance: String,
}

/// Token counts from generation calls for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Model that produced the tokens.
    pub model: String,
    /// Provider that served the call.
    pub provider: String,
}

impl TokenUsage {
    /// Total tokens across prompt and completion.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}
