//! Credential resolution for `Authorization: Bearer` headers.

use chrono::Duration;
use std::sync::Arc;
use tracing::debug;

use super::{jwt, Claims, JwtError};
use crate::store::{Role, Store, User};

/// Prefix of opaque personal access tokens
pub const PAT_PREFIX: &str = "memos_pat_";

/// Identity resolved from a request's credentials
#[derive(Debug, Clone, Default)]
pub enum AuthenticationResult {
    /// Verified stateless access token; no store lookup was made
    Claims(Claims),
    /// Owner of a personal access token, loaded from the store
    User { user: User, access_token: String },
    #[default]
    Absent,
}

impl AuthenticationResult {
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, AuthenticationResult::Absent)
    }

    pub fn user_id(&self) -> Option<i32> {
        match self {
            AuthenticationResult::Claims(claims) => claims.user_id(),
            AuthenticationResult::User { user, .. } => Some(user.id),
            AuthenticationResult::Absent => None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            AuthenticationResult::Claims(claims) => Some(&claims.name),
            AuthenticationResult::User { user, .. } => Some(&user.username),
            AuthenticationResult::Absent => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            AuthenticationResult::Claims(claims) => Some(claims.role),
            AuthenticationResult::User { user, .. } => Some(user.role),
            AuthenticationResult::Absent => None,
        }
    }

    /// Short label for logs and session responses
    pub fn credential_kind(&self) -> &'static str {
        match self {
            AuthenticationResult::Claims(_) => "access_token",
            AuthenticationResult::User { .. } => "personal_access_token",
            AuthenticationResult::Absent => "none",
        }
    }
}

/// Resolves bearer credentials into an [`AuthenticationResult`].
///
/// Every failure, whether a bad signature or a store error, resolves to
/// [`AuthenticationResult::Absent`] and is only logged at debug level.
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn Store>,
    secret: Arc<[u8]>,
}

impl Authenticator {
    pub fn new(store: Arc<dyn Store>, secret: impl AsRef<[u8]>) -> Self {
        Self {
            store,
            secret: Arc::from(secret.as_ref()),
        }
    }

    /// Resolve a raw `Authorization` header value
    pub async fn authenticate(&self, header: &str) -> AuthenticationResult {
        let Some(token) = bearer_token(header) else {
            return AuthenticationResult::Absent;
        };

        if token.starts_with(PAT_PREFIX) {
            self.authenticate_access_token(token).await
        } else {
            match jwt::decode(token, &self.secret) {
                Ok(claims) => AuthenticationResult::Claims(claims),
                Err(e) => {
                    debug!("Access token rejected: {}", e);
                    AuthenticationResult::Absent
                }
            }
        }
    }

    async fn authenticate_access_token(&self, token: &str) -> AuthenticationResult {
        match self.store.find_user_by_access_token(token).await {
            Ok(Some(user)) if user.is_active() => AuthenticationResult::User {
                user,
                access_token: token.to_owned(),
            },
            Ok(Some(user)) => {
                debug!("Personal access token rejected: user '{}' is archived", user.username);
                AuthenticationResult::Absent
            }
            Ok(None) => {
                debug!("Personal access token rejected: not found or expired");
                AuthenticationResult::Absent
            }
            Err(e) => {
                debug!("Personal access token lookup failed: {}", e);
                AuthenticationResult::Absent
            }
        }
    }

    /// Issue an access token for a user
    pub fn sign_access_token(&self, user: &User, ttl: Duration) -> Result<String, JwtError> {
        jwt::encode(&Claims::access(user, ttl), &self.secret)
    }
}

/// Extract the token from a `Bearer <token>` header value.
///
/// The scheme is matched case-insensitively; an empty token yields `None`.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RowStatus, StoreError, TokenFile};
    use async_trait::async_trait;

    const SECRET: &str = "unit-secret";

    async fn fixture() -> (Authenticator, Arc<MemoryStore>, String) {
        let mut file = TokenFile::in_memory();
        let pat = file
            .create(&User::new(5, "erin", Role::User), "laptop", None)
            .await
            .unwrap();
        let store = Arc::new(MemoryStore::from_token_file(&file));
        (Authenticator::new(store.clone(), SECRET), store, pat)
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("BEARER  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token(""), None);
    }

    #[tokio::test]
    async fn test_access_token_resolves_to_claims() {
        let (auth, _, _) = fixture().await;
        let token = auth
            .sign_access_token(&User::new(9, "frank", Role::Admin), Duration::hours(1))
            .unwrap();

        let result = auth.authenticate(&format!("Bearer {token}")).await;
        assert!(matches!(result, AuthenticationResult::Claims(_)));
        assert_eq!(result.user_id(), Some(9));
        assert_eq!(result.username(), Some("frank"));
        assert_eq!(result.role(), Some(Role::Admin));
    }

    #[tokio::test]
    async fn test_pat_resolves_to_user() {
        let (auth, _, pat) = fixture().await;
        let result = auth.authenticate(&format!("Bearer {pat}")).await;
        match result {
            AuthenticationResult::User { user, access_token } => {
                assert_eq!(user.id, 5);
                assert_eq!(access_token, pat);
            }
            other => panic!("expected user, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_credentials_are_absent() {
        let (auth, _, _) = fixture().await;
        for header in ["", "Bearer ", "Basic Zm9vOmJhcg==", "Bearer garbage", "Bearer memos_pat_unknown"] {
            let result = auth.authenticate(header).await;
            assert!(!result.is_authenticated(), "header {header:?} should be absent");
        }

        let other = Authenticator::new(Arc::new(MemoryStore::new()), "different");
        let foreign = other
            .sign_access_token(&User::new(1, "x", Role::User), Duration::hours(1))
            .unwrap();
        assert!(!auth.authenticate(&format!("Bearer {foreign}")).await.is_authenticated());
    }

    #[tokio::test]
    async fn test_archived_user_pat_absent() {
        let (auth, store, pat) = fixture().await;
        let mut user = User::new(5, "erin", Role::User);
        user.row_status = RowStatus::Archived;
        store.insert_user(user);

        assert!(!auth.authenticate(&format!("Bearer {pat}")).await.is_authenticated());
    }

    struct FailingStore;

    #[async_trait]
    impl Store for FailingStore {
        async fn find_user_by_access_token(&self, _token: &str) -> Result<Option<User>, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }

        async fn get_user(&self, _id: i32) -> Result<Option<User>, StoreError> {
            Ok(None)
        }

        async fn get_attachment(&self, _name: &str) -> Result<Option<crate::store::Attachment>, StoreError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_store_error_is_absent() {
        let auth = Authenticator::new(Arc::new(FailingStore), SECRET);
        let result = auth.authenticate("Bearer memos_pat_abcdef").await;
        assert!(matches!(result, AuthenticationResult::Absent));
    }
}
