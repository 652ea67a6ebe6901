//! Keys command - prints the server's signing key identity.

use std::path::Path;

use anyhow::{Context, Result};
use construct::Homeserver;
use construct_config::ConstructConfig;

pub fn run(path: &str) -> Result<()> {
    let project_dir = Path::new(path);
    let config = ConstructConfig::load_from_dir(project_dir).context("failed to load configuration")?;
    let hs = Homeserver::open(&config).context("failed to open homeserver")?;

    println!("server_name: {}", hs.server_name());
    println!("keyid:       {}", hs.signing_key().keyid());
    println!("public key:  {}", hs.signing_key().public_key_base64());
    Ok(())
}
