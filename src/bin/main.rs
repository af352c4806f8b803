//! memos-gateway binary.
//!
//! Runs the gateway server or manages tokens in its tokens file.

use anyhow::Result;
use clap::Parser;
use memos_gateway::cli::{
    commands::{Commands, LoggingOptions},
    handle_token, init_logging, load_config, run_server,
};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub logging: LoggingOptions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = match &cli.command {
        Commands::Serve(cmd) => &cmd.config,
        Commands::Token(cmd) => &cmd.config,
    };
    let config = load_config(args)?;
    let _log_guard = init_logging(&config.logging, &cli.logging)?;

    match cli.command {
        Commands::Serve(_) => {
            info!("memos-gateway {} starting up", env!("CARGO_PKG_VERSION"));
            run_server(config).await
        }
        Commands::Token(cmd) => handle_token(&config, cmd.action).await,
    }
}
