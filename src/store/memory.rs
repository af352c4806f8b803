//! In-memory store, seeded from the personal access token file.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use super::{hash_token, Attachment, Store, StoreError, TokenFile, TokenRecord, User};

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<i32, User>>,
    /// Token hash -> record
    tokens: RwLock<HashMap<String, TokenRecord>>,
    attachments: RwLock<HashMap<String, Attachment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding every token and token owner from the file
    pub fn from_token_file(file: &TokenFile) -> Self {
        let store = Self::new();
        for record in file.records() {
            store.users.write().entry(record.user_id).or_insert_with(|| record.user());
            store.tokens.write().insert(record.hash.clone(), record.clone());
        }
        debug!("Seeded store with {} tokens", store.tokens.read().len());
        store
    }

    pub fn insert_user(&self, user: User) {
        self.users.write().insert(user.id, user);
    }

    pub fn insert_token(&self, record: TokenRecord) {
        self.tokens.write().insert(record.hash.clone(), record);
    }

    pub fn insert_attachment(&self, attachment: Attachment) {
        self.attachments.write().insert(attachment.name.clone(), attachment);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user_by_access_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let user_id = match self.tokens.read().get(&hash_token(token)) {
            Some(record) if !record.is_expired() => record.user_id,
            Some(_) => {
                debug!("Access token expired");
                return Ok(None);
            }
            None => return Ok(None),
        };
        Ok(self.users.read().get(&user_id).cloned())
    }

    async fn get_user(&self, id: i32) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().get(&id).cloned())
    }

    async fn get_attachment(&self, name: &str) -> Result<Option<Attachment>, StoreError> {
        Ok(self.attachments.read().get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Role, RowStatus};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_token_lookup_uses_current_user_row() {
        let mut file = TokenFile::in_memory();
        let user = User::new(3, "carol", Role::Admin);
        let token = file.create(&user, "cli", None).await.unwrap();

        let store = MemoryStore::from_token_file(&file);
        let found = store.find_user_by_access_token(&token).await.unwrap().unwrap();
        assert_eq!(found.username, "carol");

        let mut archived = user.clone();
        archived.row_status = RowStatus::Archived;
        store.insert_user(archived);
        let found = store.find_user_by_access_token(&token).await.unwrap().unwrap();
        assert!(!found.is_active());
    }

    #[tokio::test]
    async fn test_expired_token_not_found() {
        let store = MemoryStore::new();
        store.insert_user(User::new(4, "dave", Role::User));
        store.insert_token(TokenRecord {
            hash: hash_token("memos_pat_old"),
            user_id: 4,
            username: "dave".into(),
            role: Role::User,
            name: "old".into(),
            created_at: Utc::now() - Duration::days(2),
            expires_at: Some(Utc::now() - Duration::days(1)),
        });

        assert!(store.find_user_by_access_token("memos_pat_old").await.unwrap().is_none());
        assert!(store.find_user_by_access_token("memos_pat_nope").await.unwrap().is_none());
    }
}
