//! Read-side store interface used by the auth path and the built-in handlers.
//!
//! The persistent store lives outside this crate; the gateway only needs to
//! look up users, personal access tokens and attachments.

mod memory;
mod tokens;

pub use memory::MemoryStore;
pub use tokens::{generate_token, hash_token, TokenFile, TokenRecord, TokenSummary};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Token already exists for this user with this name")]
    DuplicateName,
}

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Host,
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "HOST",
            Role::Admin => "ADMIN",
            Role::User => "USER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HOST" => Ok(Role::Host),
            "ADMIN" => Ok(Role::Admin),
            "USER" => Ok(Role::User),
            other => Err(StoreError::Malformed(format!("unknown role '{other}'"))),
        }
    }
}

/// Row lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowStatus {
    #[default]
    Normal,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub role: Role,
    #[serde(default)]
    pub row_status: RowStatus,
}

impl User {
    pub fn new(id: i32, username: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            username: username.into(),
            role,
            row_status: RowStatus::Normal,
        }
    }

    /// Archived users cannot authenticate
    pub fn is_active(&self) -> bool {
        self.row_status == RowStatus::Normal
    }
}

/// Who may read an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    Public,
    /// Any signed-in user
    Protected,
    /// Creator only
    Private,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    /// Resource name, `attachments/{uid}`
    pub name: String,
    pub filename: String,
    pub mime_type: String,
    pub creator_id: i32,
    pub visibility: Visibility,
    pub blob: Bytes,
}

/// Lookups the gateway performs against the backing store
#[async_trait]
pub trait Store: Send + Sync {
    /// Resolve a personal access token to its owner.
    ///
    /// Expired tokens resolve to `None`.
    async fn find_user_by_access_token(&self, token: &str) -> Result<Option<User>, StoreError>;

    async fn get_user(&self, id: i32) -> Result<Option<User>, StoreError>;

    async fn get_attachment(&self, name: &str) -> Result<Option<Attachment>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("HOST".parse::<Role>().unwrap(), Role::Host);
        assert!("root".parse::<Role>().is_err());
        assert_eq!(Role::User.to_string(), "USER");
    }

    #[test]
    fn test_archived_user_inactive() {
        let mut user = User::new(1, "steven", Role::User);
        assert!(user.is_active());
        user.row_status = RowStatus::Archived;
        assert!(!user.is_active());
    }
}
