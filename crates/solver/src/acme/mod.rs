//! ACME TLS-ALPN-01 challenge solving (RFC 8737)
//!
//! Proves control of a domain by answering a TLS handshake on port 443 with
//! a self-signed certificate that carries the SHA-256 digest of the key
//! authorization in a critical `acmeIdentifier` extension.
//!
//! # Architecture
//!
//! - [`AcmeIdentifier`] - Encodes the key authorization digest as the
//!   `acmeIdentifier` extension
//! - [`ChallengeCertificate`] - Throwaway key pair and self-signed
//!   certificate for one challenge
//! - [`TlsAlpnListener`] - Serves the certificate to `acme-tls/1` peers
//!   between `present` and `cleanup`
//! - [`TlsAlpnChallenge`] - Drives present, validation and cleanup for one
//!   authorization
//!
//! [`ChallengeProvider`], [`KeyAuthorizer`] and [`Validator`] are the seams
//! to the rest of an ACME client.
//!
//! # Configuration
//!
//! ```kdl
//! listener {
//!     interface "0.0.0.0"
//!     port 443
//!     address-family "dual-stack"
//! }
//! challenge {
//!     delay-secs 0
//!     key-algorithm "rsa-2048"
//! }
//! ```
//!
//! # Challenge Flow
//!
//! 1. [`TlsAlpnChallenge::solve`] picks the `tls-alpn-01` challenge from the
//!    authorization and computes its key authorization
//! 2. The provider builds a [`ChallengeCertificate`] and starts listening
//! 3. The [`Validator`] asks the CA to validate; the CA connects with ALPN
//!    `acme-tls/1` and SNI set to the domain
//! 4. The listener answers with the challenge certificate and closes the
//!    connection
//! 5. Cleanup stops the listener, whatever the validation outcome

mod certificate;
mod error;
mod extension;
mod inspect;
mod key_authorization;
mod listener;
mod provider;
mod solver;
mod types;

pub use certificate::{CertificateOptions, ChallengeCertificate};
pub use error::{
    BoxError, CertificateError, ChallengeError, InspectError, ProviderError, ThumbprintError,
};
pub use extension::{AcmeIdentifier, ACME_IDENTIFIER_OID, ACME_IDENTIFIER_OID_STR, DIGEST_LEN};
pub use inspect::{
    inspect_certificate, probe, validation_client_config, ChallengeCertificateInfo, ProbeOutcome,
};
pub use key_authorization::{jwk_thumbprint, AccountKeyAuthorizer, KeyAuthorizer};
pub use listener::{offers_acme_tls, ListenerPhase, TlsAlpnListener, ACME_TLS_ALPN_PROTOCOL};
pub use provider::ChallengeProvider;
pub use solver::{ChallengeOptions, ChallengeSession, TlsAlpnChallenge, Validator};
pub use types::{
    find_tls_alpn_challenge, Authorization, AuthorizationStatus, Challenge, ChallengeStatus,
    ChallengeType, Identifier,
};
