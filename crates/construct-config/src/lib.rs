//! Configuration for the `construct` homeserver.
//!
//! Loaded hierarchically from, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. `~/.config/construct/config.toml` (user defaults)
//! 3. `construct.toml` (git-tracked, project config)
//! 4. `construct.local.toml` (gitignored, local overrides)
//! 5. `CONSTRUCT_*` environment variables
//! 6. CLI arguments (applied by `construct-cli`, highest precedence)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Top-level `construct` configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstructConfig {
    pub server: ServerConfig,
    pub federation: FederationConfig,
    pub resource: ResourceConfig,
}

/// Identity and storage (§6, §3 "Peer"/"Event" sizing).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server_name: String,
    pub listen: String,
    pub data_dir: PathBuf,
    pub signing_key_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "localhost".to_string(),
            listen: "0.0.0.0:8448".to_string(),
            data_dir: PathBuf::from(".construct/data"),
            signing_key_path: PathBuf::from(".construct/signing.key"),
        }
    }
}

/// Federation transport knobs (§4.8, resolver defaults from §2 of the
/// expanded spec).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    pub resolver_timeout_secs: u64,
    pub resolver_retry_max: u32,
    pub resolver_send_rate_ms: u64,
    pub resolver_send_burst: u32,
    pub default_port: u16,
    pub retry_max: u32,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            resolver_timeout_secs: 10,
            resolver_retry_max: 4,
            resolver_send_rate_ms: 10,
            resolver_send_burst: 4,
            default_port: 8448,
            retry_max: 4,
        }
    }
}

/// Resource/method options shared by every HTTP handler (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub payload_cap_bytes: usize,
    pub handler_timeout_secs: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            payload_cap_bytes: 128 * 1024,
            handler_timeout_secs: 30,
        }
    }
}

impl ConstructConfig {
    /// Loads configuration from the current directory's default locations.
    pub fn load() -> anyhow::Result<Self> {
        ConfigLoader::new().load()
    }

    /// Loads configuration rooted at a specific project directory.
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Resolves relative paths against `base_dir`.
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();
        if self.server.data_dir.is_relative() {
            self.server.data_dir = base.join(&self.server.data_dir);
        }
        if self.server.signing_key_path.is_relative() {
            self.server.signing_key_path = base.join(&self.server.signing_key_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_the_documented_defaults() {
        let config = ConstructConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:8448");
        assert_eq!(config.federation.resolver_retry_max, 4);
        assert_eq!(config.resource.payload_cap_bytes, 128 * 1024);
        assert_eq!(config.resource.handler_timeout_secs, 30);
    }

    #[test]
    fn path_resolution_anchors_relative_paths_to_the_base_dir() {
        let mut config = ConstructConfig::default();
        config.resolve_paths("/srv/construct");
        assert_eq!(config.server.data_dir, PathBuf::from("/srv/construct/.construct/data"));
        assert_eq!(
            config.server.signing_key_path,
            PathBuf::from("/srv/construct/.construct/signing.key")
        );
    }
}
