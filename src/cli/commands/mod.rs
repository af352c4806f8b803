pub mod server;
pub mod token;

pub use server::ServerCommand;
pub use token::{TokenAction, TokenCommand};

use clap::{Args, Subcommand};

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve(ServerCommand),
    /// Manage personal access tokens and access tokens
    Token(TokenCommand),
}

#[derive(Args, Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log filter directives, e.g. `memos_gateway=debug,tower_http=info`
    #[arg(long, value_name = "FILTER", global = true)]
    pub log_filter: Option<String>,
}

impl LoggingOptions {
    /// Level implied by `-v`, if any
    pub fn verbosity_level(&self) -> Option<&'static str> {
        match self.verbose {
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        }
    }
}
