//! Multi-source configuration loading and merging.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{ConstructConfig, Paths};

/// Builder for loading a [`ConstructConfig`] from layered sources.
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "CONSTRUCT".to_string(),
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Loads and merges every source, lowest precedence first.
    pub fn load(self) -> Result<ConstructConfig> {
        let mut builder = config::Config::builder();

        let defaults = ConstructConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        let paths = Paths::new();
        if let Ok(user_config_file) = paths.user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        let project_config_file = Paths::project_config_file(&self.project_dir);
        if project_config_file.exists() {
            builder = builder.add_source(
                config::File::from(project_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build().context("failed to build configuration")?;
        let mut construct_config: ConstructConfig =
            config.try_deserialize().context("failed to deserialize configuration")?;

        construct_config.resolve_paths(&self.project_dir);
        Ok(construct_config)
    }

    pub fn load_or_default(self) -> ConstructConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_without_any_files_yields_defaults() {
        let temp_dir = tempdir().unwrap();
        let config = ConfigLoader::new().with_project_dir(temp_dir.path()).load().unwrap();

        assert_eq!(config.server.listen, "0.0.0.0:8448");
        assert_eq!(config.federation.retry_max, 4);
    }

    #[test]
    fn project_config_overrides_defaults() {
        let temp_dir = tempdir().unwrap();
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("construct.toml"),
            r#"
[server]
server_name = "example.org"
listen = "0.0.0.0:9000"

[federation]
retry_max = 8
"#,
        )
        .unwrap();

        let config = ConfigLoader::new().with_project_dir(project_dir).load().unwrap();
        assert_eq!(config.server.server_name, "example.org");
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.federation.retry_max, 8);
    }

    #[test]
    fn local_config_overrides_project_config() {
        let temp_dir = tempdir().unwrap();
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("construct.toml"),
            "[server]\nlisten = \"0.0.0.0:8448\"\n",
        )
        .unwrap();
        fs::write(
            project_dir.join("construct.local.toml"),
            "[server]\nlisten = \"127.0.0.1:18448\"\n",
        )
        .unwrap();

        let config = ConfigLoader::new().with_project_dir(project_dir).load().unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:18448");
    }

    #[test]
    fn relative_paths_resolve_against_the_project_dir() {
        let temp_dir = tempdir().unwrap();
        let project_dir = temp_dir.path();

        let config = ConfigLoader::new().with_project_dir(project_dir).load().unwrap();
        assert!(config.server.data_dir.is_absolute());
        assert!(config.server.signing_key_path.is_absolute());
    }

    // Environment variable precedence (CONSTRUCT_SERVER_LISTEN=...) is
    // exercised by integration tests rather than here, since the `config`
    // crate reads the process environment once per build() and interacts
    // poorly with parallel unit tests mutating it.
}
