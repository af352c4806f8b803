//! Access token claims.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use super::jwt::{ACCESS_TOKEN_AUDIENCE, ACCESS_TOKEN_TYPE, ISSUER};
use crate::store::{Role, User};

/// Claims carried by a stateless access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id, as a decimal string
    pub sub: String,
    pub name: String,
    pub role: Role,
    #[serde(rename = "type")]
    pub token_type: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    /// Claims for an access token issued now and valid for `ttl`.
    pub fn access(user: &User, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: user.id.to_string(),
            name: user.username.clone(),
            role: user.role,
            token_type: ACCESS_TOKEN_TYPE.to_owned(),
            iss: ISSUER.to_owned(),
            aud: ACCESS_TOKEN_AUDIENCE.to_owned(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        }
    }

    pub fn user_id(&self) -> Option<i32> {
        self.sub.parse().ok()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_claims() {
        let user = User::new(42, "ada", Role::Admin);
        let claims = Claims::access(&user, Duration::hours(1));
        assert_eq!(claims.user_id(), Some(42));
        assert_eq!(claims.name, "ada");
        assert!(!claims.is_expired());

        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["type"], "access");
        assert_eq!(json["role"], "ADMIN");
    }

    #[test]
    fn test_expired_claims() {
        let user = User::new(1, "x", Role::User);
        let claims = Claims::access(&user, Duration::seconds(-5));
        assert!(claims.is_expired());
    }
}
