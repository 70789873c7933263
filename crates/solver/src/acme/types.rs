//! ACME authorization and challenge objects (RFC 8555 §7.1.4, §8)
//!
//! Only the fields the solver needs are modelled; unknown fields are ignored
//! when deserializing server responses.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::ChallengeError;

/// Identifier an authorization covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    /// Identifier type, `dns` for domain names
    #[serde(rename = "type")]
    pub kind: String,
    /// The domain name
    pub value: String,
}

impl Identifier {
    /// A `dns` identifier
    pub fn dns(value: impl Into<String>) -> Self {
        Self {
            kind: "dns".to_string(),
            value: value.into(),
        }
    }
}

/// Authorization status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    #[default]
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

/// Challenge type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
    /// Any challenge type this solver does not know about
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChallengeType::Http01 => "http-01",
            ChallengeType::Dns01 => "dns-01",
            ChallengeType::TlsAlpn01 => "tls-alpn-01",
            ChallengeType::Unknown => "unknown",
        })
    }
}

/// Challenge status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    #[default]
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// One proof-of-control mechanism offered for an authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// Challenge type
    #[serde(rename = "type")]
    pub kind: ChallengeType,
    /// URL to post to when the challenge is ready
    pub url: String,
    /// Token issued by the CA
    pub token: String,
    /// Current status
    #[serde(default)]
    pub status: ChallengeStatus,
    /// Key authorization, filled in before validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_authorization: Option<String>,
}

/// A CA's record of a pending or completed proof of control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// The identifier being authorized
    pub identifier: Identifier,
    /// Current status
    #[serde(default)]
    pub status: AuthorizationStatus,
    /// Challenges offered by the CA
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    /// Whether the order asked for `*.identifier`
    #[serde(default)]
    pub wildcard: bool,
}

impl Authorization {
    /// Domain the CA will connect to
    pub fn domain(&self) -> &str {
        &self.identifier.value
    }

    /// Domain as originally requested, with the wildcard label restored
    pub fn targeted_domain(&self) -> String {
        if self.wildcard {
            format!("*.{}", self.identifier.value)
        } else {
            self.identifier.value.clone()
        }
    }

    /// Find the challenge of the given type
    pub fn challenge(&self, kind: &ChallengeType) -> Option<&Challenge> {
        self.challenges.iter().find(|c| &c.kind == kind)
    }
}

/// Locate the TLS-ALPN-01 challenge of an authorization
pub fn find_tls_alpn_challenge(authz: &Authorization) -> Result<Challenge, ChallengeError> {
    authz
        .challenge(&ChallengeType::TlsAlpn01)
        .cloned()
        .ok_or_else(|| ChallengeError::NoTlsAlpnChallenge(authz.targeted_domain()))
}
