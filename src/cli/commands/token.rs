//! Token management commands
//!
//! Personal access tokens are stored hashed in the tokens file; access
//! tokens are signed with the instance secret and not stored at all.

use clap::{Args, Subcommand};

use crate::config;
use crate::store::Role;

#[derive(Args)]
pub struct TokenCommand {
    #[command(flatten)]
    pub config: config::Args,

    #[command(subcommand)]
    pub action: TokenAction,
}

#[derive(Subcommand)]
pub enum TokenAction {
    /// Create a personal access token
    Create {
        #[arg(long)]
        user_id: i32,

        #[arg(long)]
        username: String,

        /// HOST, ADMIN or USER
        #[arg(long, default_value = "USER")]
        role: Role,

        /// Token name, unique per user
        #[arg(long, default_value = "default")]
        name: String,

        /// Expire after this many days
        #[arg(long)]
        expires_days: Option<i64>,
    },

    /// List personal access tokens
    List,

    /// Revoke a personal access token by name
    Revoke {
        #[arg(long)]
        user_id: i32,

        #[arg(long)]
        name: String,
    },

    /// Sign a short-lived access token (needs a configured secret)
    Sign {
        #[arg(long)]
        user_id: i32,

        #[arg(long)]
        username: String,

        #[arg(long, default_value = "USER")]
        role: Role,

        #[arg(long, default_value_t = 24)]
        ttl_hours: i64,
    },
}
