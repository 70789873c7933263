//! Key authorization (RFC 8555 §8.1)
//!
//! `keyAuthorization = token || '.' || base64url(JWK_Thumbprint(accountKey))`

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::error::{BoxError, ThumbprintError};

/// Produces the key authorization for a challenge token
#[async_trait]
pub trait KeyAuthorizer: Send + Sync {
    async fn key_authorization(&self, token: &str) -> Result<String, BoxError>;
}

/// Key authorizer backed by a known account key thumbprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountKeyAuthorizer {
    thumbprint: String,
}

impl AccountKeyAuthorizer {
    /// Use an already computed base64url thumbprint
    pub fn new(thumbprint: impl Into<String>) -> Self {
        Self {
            thumbprint: thumbprint.into(),
        }
    }

    /// Compute the thumbprint of the account's public JWK
    pub fn from_jwk(jwk: &Value) -> Result<Self, ThumbprintError> {
        Ok(Self::new(jwk_thumbprint(jwk)?))
    }

    /// The account key thumbprint
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Key authorization for `token`
    pub fn key_authorization_for(&self, token: &str) -> String {
        format!("{}.{}", token, self.thumbprint)
    }
}

#[async_trait]
impl KeyAuthorizer for AccountKeyAuthorizer {
    async fn key_authorization(&self, token: &str) -> Result<String, BoxError> {
        Ok(self.key_authorization_for(token))
    }
}

/// RFC 7638 SHA-256 thumbprint of a public JWK, base64url without padding.
///
/// Only the required members of the key type take part; any other members
/// (`alg`, `kid`, `use`, private parameters) are ignored.
pub fn jwk_thumbprint(jwk: &Value) -> Result<String, ThumbprintError> {
    let kty = jwk
        .get("kty")
        .and_then(Value::as_str)
        .ok_or(ThumbprintError::MissingKeyType)?;

    // Required members, already in lexicographic order
    let members: &[&'static str] = match kty {
        "EC" => &["crv", "kty", "x", "y"],
        "RSA" => &["e", "kty", "n"],
        "OKP" => &["crv", "kty", "x"],
        other => return Err(ThumbprintError::UnsupportedKeyType(other.to_string())),
    };

    let mut canonical = String::from("{");
    for (index, &member) in members.iter().enumerate() {
        let value = jwk.get(member).and_then(Value::as_str).ok_or_else(|| {
            ThumbprintError::MissingMember {
                kty: kty.to_string(),
                member,
            }
        })?;

        if index > 0 {
            canonical.push(',');
        }
        canonical.push('"');
        canonical.push_str(member);
        canonical.push_str("\":");
        canonical.push_str(&Value::String(value.to_string()).to_string());
    }
    canonical.push('}');

    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())))
}
