//! Command-line interface module.
//!
//! This module provides the CLI functionality for:
//! - Running the gateway server
//! - Managing personal access tokens

pub mod commands;
pub mod handlers;

pub use handlers::{handle_token, init_logging, load_config, run_server};
