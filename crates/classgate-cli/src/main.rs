//! Classgate CLI - auth core for school platforms.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "classgate")]
#[command(about = "Classgate - authentication and onboarding for school platforms")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.classgate/classgate.json)
    #[arg(short, long, global = true, env = "CLASSGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Create the admin account and signing keys
    InitAdmin {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let config = cli.config.as_deref();

    match cli.command {
        Commands::Serve { port, bind } => {
            commands::run_serve(config, commands::serve::ServeArgs { port, bind }).await?;
        }
        Commands::InitAdmin { json } => commands::run_init_admin(config, json)?,
        Commands::CheckConfig => commands::run_check_config(config)?,
    }

    Ok(())
}
