//! Challenge provider capability
//!
//! A provider makes a challenge response observable to the certificate
//! authority and withdraws it afterwards. [`TlsAlpnListener`] is the
//! built-in implementation; a reverse proxy that already owns port 443 can
//! implement this trait instead and hand the certificate to its own TLS
//! stack.
//!
//! [`TlsAlpnListener`]: super::TlsAlpnListener

use std::fmt::Debug;

use async_trait::async_trait;

use super::error::ProviderError;

/// Presents and withdraws a TLS-ALPN-01 challenge response
#[async_trait]
pub trait ChallengeProvider: Debug + Send + Sync {
    /// Start answering the challenge for `domain`.
    ///
    /// Returns once the response is observable; it does not wait for the
    /// certificate authority to connect.
    async fn present(
        &self,
        domain: &str,
        token: &str,
        key_authorization: &str,
    ) -> Result<(), ProviderError>;

    /// Stop answering the challenge.
    ///
    /// Must be idempotent: calling it without a prior successful `present`,
    /// or more than once, returns `Ok(())`.
    async fn cleanup(
        &self,
        domain: &str,
        token: &str,
        key_authorization: &str,
    ) -> Result<(), ProviderError>;
}
