//! Configuration for build runs.
//!
//! Load order: `.forge/config.toml` → environment variables → defaults.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_DIR: &str = ".forge";
const CONFIG_FILE: &str = "config.toml";

/// Top-level specforge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub generation: GenerationConfig,
    pub cache: CacheConfig,
}

/// Generation and scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum concurrently in-flight generation tasks.
    pub jobs: usize,
    /// Name of the generated subtree inside the package.
    pub generated_dir: String,
    /// Model identifier passed to the backend.
    pub model: String,
    /// Base URL for the OpenAI-compatible provider.
    pub base_url: String,
    /// Hard budget in USD; `None` disables the budget check.
    pub max_cost: Option<f64>,
    /// Extra retry attempts granted when a type checker is configured.
    pub type_check_retries: Option<usize>,
    /// Type-checker command (argv); `None` disables external checking.
    pub type_check_cmd: Option<Vec<String>>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            jobs: 4,
            generated_dir: "__generated__".to_string(),
            model: "gpt-4.1-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_cost: None,
            type_check_retries: None,
            type_check_cmd: None,
        }
    }
}

/// Response-cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether cached responses are consulted and persisted.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Apply an environment override when the variable parses.
fn env_override<T: std::str::FromStr>(var: &str, field: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        if let Ok(value) = raw.parse() {
            *field = value;
        }
    }
}

impl ForgeConfig {
    /// Load configuration for a project root, applying env overrides.
    ///
    /// A missing config file yields defaults; a malformed one is an error.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(CONFIG_DIR).join(CONFIG_FILE);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        } else {
            Self::default()
        };

        env_override("FORGE_MODEL", &mut config.generation.model);
        env_override("FORGE_JOBS", &mut config.generation.jobs);
        if let Ok(raw) = std::env::var("FORGE_MAX_COST") {
            if let Ok(v) = raw.parse() {
                config.generation.max_cost = Some(v);
            }
        }
        Ok(config)
    }

    /// Path of the config directory for a project root.
    #[must_use]
    pub fn config_dir(project_root: &Path) -> std::path::PathBuf {
        project_root.join(CONFIG_DIR)
    }
}
