//! Error types for the gateway.

use crate::store::StoreError;
use thiserror::Error;
use tonic::Status;

/// A specialized Result type for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for gateway operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Config(msg) => Status::failed_precondition(msg),
            Error::Store(StoreError::NotFound(what)) => Status::not_found(what),
            Error::Store(err) => Status::internal(err.to_string()),
            Error::Internal(msg) => Status::internal(msg),
        }
    }
}
