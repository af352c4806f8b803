//! Personal access token file.
//!
//! Token format: `memos_pat_{32 alphanumeric chars}`. Only the SHA-256 hash
//! of a token is persisted, one record per line:
//!
//! ```text
//! hash, user_id, username, role, "name", created_at, expires_at
//! ```

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{Role, StoreError, User};
use crate::auth::PAT_PREFIX;

/// Length of random portion of token
const TOKEN_RANDOM_LENGTH: usize = 32;

/// A stored token record
#[derive(Debug, Clone)]
pub struct TokenRecord {
    /// SHA-256 hash of the token
    pub hash: String,
    pub user_id: i32,
    pub username: String,
    pub role: Role,
    /// Human-readable label
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// None = never
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => Utc::now() > expires,
            None => false,
        }
    }

    pub fn user(&self) -> User {
        User::new(self.user_id, self.username.clone(), self.role)
    }
}

/// Summary of a token for listing (no sensitive data)
#[derive(Debug, Clone)]
pub struct TokenSummary {
    /// First 12 chars of hash for identification
    pub hash_prefix: String,
    pub user_id: i32,
    pub username: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Token records backed by a CSV file
pub struct TokenFile {
    /// Hash -> TokenRecord mapping
    tokens: HashMap<String, TokenRecord>,
    path: PathBuf,
}

impl TokenFile {
    /// Open the token file, starting empty when it does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut file = Self {
            tokens: HashMap::new(),
            path: path.as_ref().to_path_buf(),
        };

        if file.path.exists() {
            file.load().await?;
        } else {
            info!("No tokens file at {}, starting empty", file.path.display());
        }

        Ok(file)
    }

    /// A token file with no backing path (for testing)
    pub fn in_memory() -> Self {
        Self {
            tokens: HashMap::new(),
            path: PathBuf::new(),
        }
    }

    async fn load(&mut self) -> Result<(), StoreError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        self.tokens.clear();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_line(line) {
                Ok(record) => {
                    self.tokens.insert(record.hash.clone(), record);
                }
                Err(e) => warn!("Skipping token line: {}", e),
            }
        }

        info!("Loaded {} tokens from {}", self.tokens.len(), self.path.display());
        Ok(())
    }

    pub async fn save(&self) -> Result<(), StoreError> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut content = String::new();
        content.push_str("# memos personal access tokens\n");
        content.push_str("# Format: hash, user_id, username, role, name, created_at, expires_at\n");
        content.push_str("# Managed by 'memos-gateway token' commands\n\n");

        let mut records: Vec<&TokenRecord> = self.tokens.values().collect();
        records.sort_by_key(|r| r.created_at);
        for record in records {
            let expires = record.expires_at.map(|dt| dt.to_rfc3339()).unwrap_or_default();
            content.push_str(&format!(
                "{}, {}, {}, {}, \"{}\", {}, {}\n",
                record.hash,
                record.user_id,
                record.username,
                record.role,
                record.name,
                record.created_at.to_rfc3339(),
                expires
            ));
        }

        tokio::fs::write(&self.path, content).await?;
        debug!("Saved {} tokens to {}", self.tokens.len(), self.path.display());
        Ok(())
    }

    /// Mint a token for a user.
    ///
    /// Returns the plaintext token; only its hash is kept.
    pub async fn create(
        &mut self,
        user: &User,
        name: &str,
        expires_in: Option<Duration>,
    ) -> Result<String, StoreError> {
        check_field("name", name)?;
        check_field("username", &user.username)?;
        if self.tokens.values().any(|t| t.user_id == user.id && t.name == name) {
            return Err(StoreError::DuplicateName);
        }

        let token = generate_token();
        let record = TokenRecord {
            hash: hash_token(&token),
            user_id: user.id,
            username: user.username.clone(),
            role: user.role,
            name: name.to_string(),
            created_at: Utc::now(),
            expires_at: expires_in.map(|d| Utc::now() + d),
        };

        self.tokens.insert(record.hash.clone(), record);
        self.save().await?;

        info!("Created token '{}' for user '{}'", name, user.username);
        Ok(token)
    }

    pub async fn revoke_by_name(&mut self, user_id: i32, name: &str) -> Result<TokenRecord, StoreError> {
        let hash = self
            .tokens
            .iter()
            .find(|(_, r)| r.user_id == user_id && r.name == name)
            .map(|(h, _)| h.clone());

        let record = hash
            .and_then(|h| self.tokens.remove(&h))
            .ok_or_else(|| StoreError::NotFound(format!("token '{name}' for user {user_id}")))?;

        self.save().await?;
        info!("Revoked token '{}' for user '{}'", record.name, record.username);
        Ok(record)
    }

    /// Look up the record for a plaintext token, ignoring expiry
    pub fn get(&self, token: &str) -> Option<&TokenRecord> {
        self.tokens.get(&hash_token(token))
    }

    pub fn list(&self) -> Vec<TokenSummary> {
        let mut summaries: Vec<TokenSummary> = self
            .tokens
            .values()
            .map(|r| TokenSummary {
                hash_prefix: r.hash.chars().take(12).collect(),
                user_id: r.user_id,
                username: r.username.clone(),
                name: r.name.clone(),
                created_at: r.created_at,
                expires_at: r.expires_at,
            })
            .collect();
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    pub fn records(&self) -> impl Iterator<Item = &TokenRecord> {
        self.tokens.values()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_line(line: &str) -> Result<TokenRecord, StoreError> {
    let parts: Vec<&str> = line.splitn(7, ',').map(|s| s.trim()).collect();
    if parts.len() < 5 {
        return Err(StoreError::Malformed(format!("invalid line: {line}")));
    }

    let user_id = parts[1]
        .parse()
        .map_err(|_| StoreError::Malformed(format!("invalid user id '{}'", parts[1])))?;

    let created_at = match parts.get(5) {
        Some(s) => parse_timestamp(s)?,
        None => Utc::now(),
    };

    let expires_at = match parts.get(6) {
        Some(s) if !s.is_empty() => Some(parse_timestamp(s)?),
        _ => None,
    };

    Ok(TokenRecord {
        hash: parts[0].to_string(),
        user_id,
        username: parts[2].to_string(),
        role: parts[3].parse()?,
        name: parts[4].trim_matches('"').to_string(),
        created_at,
        expires_at,
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Malformed(format!("invalid timestamp '{s}'")))
}

/// Names and usernames are stored unescaped, so separators are not allowed
fn check_field(field: &str, value: &str) -> Result<(), StoreError> {
    if value.is_empty() || value.contains([',', '"', '\n', '\r']) {
        return Err(StoreError::Malformed(format!(
            "{field} '{value}' must be non-empty and contain no commas, quotes or line breaks"
        )));
    }
    Ok(())
}

/// Generate a fresh personal access token
pub fn generate_token() -> String {
    let random_part: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(TOKEN_RANDOM_LENGTH)
        .map(char::from)
        .collect();
    format!("{PAT_PREFIX}{random_part}")
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}
