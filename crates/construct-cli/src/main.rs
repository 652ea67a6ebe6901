//! construct unified CLI.
//!
//! A Matrix federation homeserver.
//!
//! # Quick Start
//!
//! ```bash
//! # Generate a signing key and print the config that would be used
//! construct init ./data
//!
//! # Start the server
//! construct serve --listen 0.0.0.0:8448 ./data
//!
//! # Create a room locally
//! construct room create @alice:localhost ./data
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "construct")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Initialize a new data directory and signing key.
    Init {
        /// Path to the data directory to create.
        path: String,

        /// Server name this homeserver will identify as.
        #[arg(long)]
        server_name: Option<String>,
    },

    /// Start the homeserver.
    Serve {
        /// Path to the data directory.
        path: String,

        /// Address to bind to.
        #[arg(short, long, default_value = "0.0.0.0:8448")]
        listen: String,

        /// Server name this homeserver identifies as (overrides config).
        #[arg(long)]
        server_name: Option<String>,
    },

    /// Room management commands.
    #[command(subcommand)]
    Room(RoomCommands),

    /// Print the server's current signing key in `verify_keys` form.
    Keys {
        /// Path to the data directory.
        path: String,
    },
}

#[derive(Subcommand)]
enum RoomCommands {
    /// Create a room and join it as `creator`.
    Create {
        /// Creator's Matrix user id, e.g. `@alice:localhost`.
        creator: String,

        /// Path to the data directory.
        path: String,
    },

    /// Send a plain text message into a room as `sender`.
    Send {
        /// Room id, e.g. `!abc123:localhost`.
        room_id: String,

        /// Sender's Matrix user id.
        sender: String,

        /// Message body.
        body: String,

        /// Path to the data directory.
        path: String,
    },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Init { path, server_name } => commands::init::run(&path, server_name.as_deref()),
        Commands::Serve {
            path,
            listen,
            server_name,
        } => commands::serve::run(&path, &listen, server_name.as_deref()).await,
        Commands::Room(cmd) => match cmd {
            RoomCommands::Create { creator, path } => commands::room::create(&path, &creator),
            RoomCommands::Send {
                room_id,
                sender,
                body,
                path,
            } => commands::room::send(&path, &room_id, &sender, &body),
        },
        Commands::Keys { path } => commands::keys::run(&path),
    }
}
