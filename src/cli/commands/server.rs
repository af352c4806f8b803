use clap::Args;

use crate::config;

#[derive(Args)]
pub struct ServerCommand {
    #[command(flatten)]
    pub config: config::Args,
}
