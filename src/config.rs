//! Engine configuration.
//!
//! Deploy-time knobs only; the policy table, tool registry, and dependency
//! graph are code, not configuration. Loaded from a TOML file with every
//! field defaulted, so an empty file is a valid config.

use std::path::Path;

use serde::Deserialize;

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the Braid backend API.
    #[serde(default = "default_backend_base_url")]
    pub backend_base_url: String,

    /// Outer timeout applied to every executor call, seconds.
    #[serde(default = "default_executor_timeout_secs")]
    pub executor_timeout_secs: u64,

    /// Lifetime of minted internal credentials, seconds (capped at 300).
    #[serde(default = "default_internal_token_ttl_secs")]
    pub internal_token_ttl_secs: u64,

    /// Attribution string stamped on records created through the engine.
    #[serde(default = "default_created_by")]
    pub created_by: String,
}

fn default_backend_base_url() -> String {
    "http://localhost:3000".to_owned()
}

fn default_executor_timeout_secs() -> u64 {
    30
}

fn default_internal_token_ttl_secs() -> u64 {
    300
}

fn default_created_by() -> String {
    "straylight-engine".to_owned()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend_base_url: default_backend_base_url(),
            executor_timeout_secs: default_executor_timeout_secs(),
            internal_token_ttl_secs: default_internal_token_ttl_secs(),
            created_by: default_created_by(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("failed to read config {}: {e}", path.as_ref().display())
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}
