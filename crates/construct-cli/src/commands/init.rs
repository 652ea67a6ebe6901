//! Init command - creates a new construct data directory.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use construct_config::{ConstructConfig, Paths};

pub fn run(path: &str, server_name: Option<&str>) -> Result<()> {
    let project_dir = Path::new(path);
    let config_path = Paths::project_config_file(project_dir);
    if config_path.exists() {
        anyhow::bail!("{} already exists in {}", config_path.display(), project_dir.display());
    }

    fs::create_dir_all(project_dir).context("failed to create data directory")?;

    let mut config = ConstructConfig::default();
    if let Some(server_name) = server_name {
        config.server.server_name = server_name.to_owned();
    }
    let content = toml::to_string_pretty(&config).context("failed to serialize configuration")?;
    fs::write(&config_path, content).context("failed to write construct.toml")?;

    let mut resolved = config.clone();
    resolved.resolve_paths(project_dir);
    let signing_key = construct::keys::load_or_generate(&resolved.server.signing_key_path)?;

    println!("Initialized construct data directory at {}", project_dir.display());
    println!("  server_name: {}", config.server.server_name);
    println!("  signing key: {}", signing_key.keyid());
    println!();
    println!("Start the server with:");
    println!("  construct serve {path}");

    Ok(())
}
