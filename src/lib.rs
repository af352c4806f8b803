//! memos-gateway: request routing and authentication in front of the memos RPC services.
//!
//! Two transports share one set of services:
//! - a REST/JSON bridge (`/api/v1/...`) with a dedicated streaming chat route
//! - a Connect-style RPC transport (`/memos.api.v1.<Service>/<Method>`)
//!
//! Both resolve credentials the same way (signed access tokens or personal
//! access tokens) and apply the same public-method policy.

pub mod auth;
pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod rpc;
pub mod server;
pub mod service;
pub mod store;
pub mod thumbnail;

pub use error::{Error, Result};
