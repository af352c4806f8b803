//! Authentication for both transports.
//!
//! Two credential kinds arrive as `Authorization: Bearer <token>`:
//!
//! - stateless access tokens, HS256 JWTs verified against the instance secret
//! - personal access tokens (`memos_pat_...`), looked up in the store
//!
//! [`Authenticator`] turns either into an [`AuthenticationResult`], and
//! [`authorize`] applies the public-method policy to it.

pub mod acl;
pub mod authenticator;
pub mod claims;
pub mod jwt;

pub use acl::{authorize, Decision, PublicMethodSet, AUTHENTICATION_REQUIRED};
pub use authenticator::{bearer_token, AuthenticationResult, Authenticator, PAT_PREFIX};
pub use claims::Claims;
pub use jwt::JwtError;
