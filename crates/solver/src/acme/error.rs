//! TLS-ALPN-01 error types

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by external collaborators (validators, key
/// authorizers, alternative providers)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while building the ephemeral challenge certificate
#[derive(Debug, Error)]
pub enum CertificateError {
    /// Key pair generation failed
    #[error("Failed to generate challenge key pair: {0}")]
    KeyGeneration(#[source] rcgen::Error),

    /// Certificate parameters or DER encoding were rejected
    #[error("Failed to encode challenge certificate for '{domain}': {source}")]
    Encoding {
        domain: String,
        #[source]
        source: rcgen::Error,
    },

    /// The validity period does not fit in a certificate timestamp
    #[error("Challenge certificate validity of {0:?} is out of range")]
    Validity(Duration),

    /// The TLS stack could not load the generated private key
    #[error("Failed to load challenge signing key: {0}")]
    SigningKey(#[source] rustls::Error),
}

/// Errors reported by a [`ChallengeProvider`](super::ChallengeProvider)
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Challenge certificate could not be created
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// A listener is already serving a challenge on this provider
    #[error("Challenge listener already serving '{domain}' on {address}")]
    AlreadyServing { domain: String, address: String },

    /// The configured interface could not be resolved
    #[error("Failed to resolve listener address {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The interface resolved, but not to any address of the requested family
    #[error("No {family} address available for listener address {address}")]
    NoAddress { address: String, family: String },

    /// Binding the listening socket failed (port in use, permission denied)
    #[error("Could not start TLS-ALPN-01 listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// TLS server configuration was rejected
    #[error("Failed to build TLS configuration: {0}")]
    Tls(#[from] rustls::Error),

    /// The accept loop terminated abnormally
    #[error("Challenge accept loop failed: {0}")]
    AcceptLoop(String),

    /// Failure reported by an alternative provider implementation
    #[error(transparent)]
    Other(BoxError),
}

/// Errors returned by [`TlsAlpnChallenge::solve`](super::TlsAlpnChallenge::solve)
#[derive(Debug, Error)]
pub enum ChallengeError {
    /// The authorization does not offer a TLS-ALPN-01 challenge
    #[error("No TLS-ALPN-01 challenge available for domain '{0}'")]
    NoTlsAlpnChallenge(String),

    /// The key authorization for the challenge token could not be obtained
    #[error("Failed to compute key authorization for domain '{domain}': {source}")]
    KeyAuthorization {
        domain: String,
        #[source]
        source: BoxError,
    },

    /// The provider failed to present the challenge
    #[error("[{domain}] acme: error presenting token: {source}")]
    Present {
        domain: String,
        #[source]
        source: ProviderError,
    },

    /// The validation collaborator reported a failure
    #[error(transparent)]
    Validation(BoxError),
}

/// Errors from inspecting or probing a challenge certificate
#[derive(Debug, Error)]
pub enum InspectError {
    /// The certificate is not valid DER X.509
    #[error("Failed to parse certificate: {0}")]
    Parse(String),

    /// The acmeIdentifier extension is present but not marked critical
    #[error("acmeIdentifier extension is not marked critical")]
    NotCritical,

    /// The acmeIdentifier extension value is not a 32-byte DER OCTET STRING
    #[error("acmeIdentifier extension has a malformed value ({0} bytes)")]
    MalformedValue(usize),

    /// The acmeIdentifier extension appears more than once
    #[error("acmeIdentifier extension appears {0} times")]
    DuplicateExtension(usize),

    /// Connecting to the challenge listener failed
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The TLS handshake with the challenge listener failed
    #[error("TLS handshake with {address} failed: {source}")]
    Handshake {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The probe did not finish within its timeout
    #[error("Timed out probing {0}")]
    Timeout(String),

    /// The server completed the handshake without a certificate
    #[error("Server at {0} presented no certificate")]
    NoCertificate(String),

    /// The domain is not a valid TLS server name
    #[error("Invalid server name '{0}'")]
    InvalidServerName(String),

    /// TLS client configuration was rejected
    #[error("Failed to build TLS configuration: {0}")]
    Tls(#[from] rustls::Error),
}

/// Errors from computing a JWK thumbprint
#[derive(Debug, Error)]
pub enum ThumbprintError {
    /// The JWK is not a JSON object or lacks `kty`
    #[error("JWK is missing the 'kty' member")]
    MissingKeyType,

    /// The key type is not one of EC, RSA, OKP
    #[error("Unsupported JWK key type '{0}'")]
    UnsupportedKeyType(String),

    /// A required member for the key type is missing or not a string
    #[error("JWK of type '{kty}' is missing required member '{member}'")]
    MissingMember { kty: String, member: &'static str },
}
