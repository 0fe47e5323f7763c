//! YelloTalk CLI - AuthBuffer tooling and a room listener.
//!
//! `yellotalk auth` mints and inspects GME AuthBuffers; `yellotalk listen`
//! joins one room and logs its events until the connection ends.

mod commands;

use std::path::Path;

use clap::{Parser, Subcommand};
use tracing::info;

use yt_core::config::AppConfig;
use yt_core::error::YtResult;
use yt_core::logging;

/// YelloTalk - live room client.
#[derive(Parser)]
#[command(
    name = "yellotalk",
    version,
    about = "YelloTalk room client CLI",
    long_about = "A command-line client for YelloTalk live rooms.\n\
                   Mint voice AuthBuffers and listen to a room's chat from the terminal."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate or verify GME AuthBuffers.
    Auth {
        #[command(subcommand)]
        action: commands::auth::AuthAction,
    },
    /// Join a room and log its events until the connection ends.
    Listen {
        /// Room id to join.
        #[arg(short, long)]
        room: String,
        /// Voice room id sent as `gme_id` (defaults to the room id).
        #[arg(short, long)]
        gme_id: Option<String>,
        /// Do not request chat history after joining.
        #[arg(long)]
        no_history: bool,
    },
}

#[tokio::main]
async fn main() -> YtResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match cli.config.as_deref() {
        Some(path) => AppConfig::load_from_file(Path::new(path))?,
        None => AppConfig::load_default()?,
    };

    // Initialize logging
    let log_level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let log_dir = config.effective_log_dir()?;
    let _guard = logging::init_logging(log_level, &log_dir, config.logging.json_output)?;

    info!("YelloTalk CLI v{}", yt_core::constants::APP_VERSION);

    match cli.command {
        Commands::Auth { action } => commands::auth::run(&config, action),
        Commands::Listen {
            room,
            gme_id,
            no_history,
        } => commands::listen::run(config, room, gme_id, no_history).await,
    }
}
