//! HS256 JWT access tokens.
//!
//! # Token Format
//!
//! Standard RFC 7519 JWT:
//! - Header: `{"alg":"HS256","typ":"JWT","kid":"v1"}`
//! - Payload: [`Claims`]
//! - Signature: HMAC-SHA256 over `base64url(header).base64url(payload)` with
//!   the instance secret

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use super::Claims;

type HmacSha256 = Hmac<Sha256>;

pub const ISSUER: &str = "memos";
pub const ACCESS_TOKEN_AUDIENCE: &str = "user.access-token";
pub const ACCESS_TOKEN_TYPE: &str = "access";

const JWT_HEADER: &str = r#"{"alg":"HS256","typ":"JWT","kid":"v1"}"#;

/// Seconds of clock skew tolerated on `iat`
const IAT_LEEWAY_SECS: i64 = 60;

/// Errors from JWT operations
#[derive(Error, Debug)]
pub enum JwtError {
    #[error("Invalid token format")]
    InvalidFormat,

    #[error("Invalid base64 encoding")]
    InvalidBase64,

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,

    #[error("Token not yet valid")]
    NotYetValid,

    #[error("Invalid claim: {0}")]
    InvalidClaim(&'static str),

    #[error("Invalid key")]
    InvalidKey,
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

fn mac(secret: &[u8]) -> Result<HmacSha256, JwtError> {
    HmacSha256::new_from_slice(secret).map_err(|_| JwtError::InvalidKey)
}

/// Encode and sign an access token
pub fn encode(claims: &Claims, secret: &[u8]) -> Result<String, JwtError> {
    let header_b64 = URL_SAFE_NO_PAD.encode(JWT_HEADER);
    let payload = serde_json::to_vec(claims).map_err(|e| JwtError::InvalidJson(e.to_string()))?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);

    let signing_input = format!("{header_b64}.{payload_b64}");

    let mut mac = mac(secret)?;
    mac.update(signing_input.as_bytes());
    let signature_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Decode and verify an access token
pub fn decode(token: &str, secret: &[u8]) -> Result<Claims, JwtError> {
    let mut parts = token.split('.');
    let (header_b64, payload_b64, signature_b64) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) => (h, p, s),
        _ => return Err(JwtError::InvalidFormat),
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_b64).map_err(|_| JwtError::InvalidBase64)?;
    let header: Header =
        serde_json::from_slice(&header_bytes).map_err(|e| JwtError::InvalidJson(e.to_string()))?;
    if header.alg != "HS256" {
        return Err(JwtError::UnsupportedAlgorithm(header.alg));
    }

    // Signature first, before trusting anything in the payload
    let signature = URL_SAFE_NO_PAD.decode(signature_b64).map_err(|_| JwtError::InvalidBase64)?;
    let mut mac = mac(secret)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());
    mac.verify_slice(&signature).map_err(|_| JwtError::InvalidSignature)?;

    let payload_bytes = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| JwtError::InvalidBase64)?;
    let claims: Claims =
        serde_json::from_slice(&payload_bytes).map_err(|e| JwtError::InvalidJson(e.to_string()))?;

    if claims.is_expired() {
        return Err(JwtError::Expired);
    }
    if claims.iat > Utc::now().timestamp() + IAT_LEEWAY_SECS {
        return Err(JwtError::NotYetValid);
    }
    if claims.iss != ISSUER {
        return Err(JwtError::InvalidClaim("iss"));
    }
    if claims.aud != ACCESS_TOKEN_AUDIENCE {
        return Err(JwtError::InvalidClaim("aud"));
    }
    if claims.token_type != ACCESS_TOKEN_TYPE {
        return Err(JwtError::InvalidClaim("type"));
    }

    Ok(claims)
}
