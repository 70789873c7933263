//! Challenge orchestration and certificate settings.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

/// Key algorithm for the ephemeral challenge certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    /// RSA 2048-bit with PKCS#1 v1.5 SHA-256 signatures
    #[default]
    #[serde(rename = "rsa-2048")]
    Rsa2048,
    /// ECDSA on P-256 with SHA-256
    #[serde(rename = "ecdsa-p256")]
    EcdsaP256,
}

impl KeyAlgorithm {
    /// Name used in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa2048 => "rsa-2048",
            KeyAlgorithm::EcdsaP256 => "ecdsa-p256",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a key algorithm name is not recognized
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid key algorithm '{0}'. Valid values: rsa-2048, ecdsa-p256")]
pub struct ParseKeyAlgorithmError(String);

impl FromStr for KeyAlgorithm {
    type Err = ParseKeyAlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rsa-2048" | "rsa2048" | "rsa" => Ok(KeyAlgorithm::Rsa2048),
            "ecdsa-p256" | "ec256" | "ecdsa" => Ok(KeyAlgorithm::EcdsaP256),
            _ => Err(ParseKeyAlgorithmError(s.to_string())),
        }
    }
}

/// Settings for a single TLS-ALPN-01 challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "kebab-case")]
pub struct ChallengeConfig {
    /// Pause between starting the listener and asking the CA to validate.
    /// Zero disables the delay.
    #[validate(range(max = 3600))]
    pub delay_secs: u64,

    /// Key algorithm for the challenge certificate
    pub key_algorithm: KeyAlgorithm,

    /// Validity window of the challenge certificate
    #[validate(range(min = 60, max = 604800))]
    pub certificate_validity_secs: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            delay_secs: 0,
            key_algorithm: KeyAlgorithm::default(),
            certificate_validity_secs: default_certificate_validity(),
        }
    }
}

impl ChallengeConfig {
    /// The pre-validation delay, or `None` when disabled
    pub fn delay(&self) -> Option<Duration> {
        (self.delay_secs > 0).then(|| Duration::from_secs(self.delay_secs))
    }

    /// Validity window of the challenge certificate
    pub fn certificate_validity(&self) -> Duration {
        Duration::from_secs(self.certificate_validity_secs)
    }
}

pub(crate) fn default_certificate_validity() -> u64 {
    3600
}
