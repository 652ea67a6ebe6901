//! Serve command - runs the construct homeserver's federation HTTP surface.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use construct::Homeserver;
use construct_config::ConstructConfig;
use tracing::info;

pub async fn run(path: &str, listen: &str, server_name: Option<&str>) -> Result<()> {
    let project_dir = Path::new(path);
    if !project_dir.exists() {
        bail!("data directory '{path}' does not exist. Run 'construct init {path}' first.");
    }

    let mut config = ConstructConfig::load_from_dir(project_dir).context("failed to load configuration")?;
    if let Some(server_name) = server_name {
        config.server.server_name = server_name.to_owned();
    }
    config.server.listen = listen.to_owned();

    let bind_addr = config.server.listen.clone();

    info!(server_name = %config.server.server_name, %bind_addr, "starting construct");
    println!("construct - a Matrix federation homeserver");
    println!();
    println!("  server name: {}", config.server.server_name);
    println!("  data dir:    {}", config.server.data_dir.display());
    println!("  listening:   {bind_addr}");
    println!();

    let homeserver = Homeserver::open(&config).context("failed to open homeserver")?;
    let handlers: Arc<dyn construct_federation::ResourceHandlers> = Arc::new(homeserver);
    let app = construct_federation::router(handlers);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    println!("Server is ready. Press Ctrl+C to stop.");
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error during operation")?;

    println!();
    println!("Server stopped gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "failed to install ctrl-c handler");
    }
}
