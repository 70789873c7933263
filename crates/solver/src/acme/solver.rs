//! TLS-ALPN-01 challenge orchestration
//!
//! Drives one authorization through present → (delay) → validate → cleanup.
//! Cleanup runs exactly once for every attempt that reached `present`, no
//! matter how the attempt ends: success, error, panic, or the `solve`
//! future being dropped.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, info, warn};

use tlsalpn_config::ChallengeConfig;

use super::error::{BoxError, ChallengeError};
use super::key_authorization::KeyAuthorizer;
use super::provider::ChallengeProvider;
use super::types::{find_tls_alpn_challenge, Authorization, Challenge};

/// Asks the certificate authority to validate a presented challenge
///
/// Implementations own the ACME client and typically post to the challenge
/// URL, then poll the authorization until it leaves `pending`.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, domain: &str, challenge: &Challenge) -> Result<(), BoxError>;
}

/// Orchestrator options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChallengeOptions {
    /// Pause between presenting the challenge and asking for validation
    pub delay: Option<Duration>,
}

impl ChallengeOptions {
    /// Wait `delay` after presenting, before validation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = (!delay.is_zero()).then_some(delay);
        self
    }
}

impl From<&ChallengeConfig> for ChallengeOptions {
    fn from(config: &ChallengeConfig) -> Self {
        Self {
            delay: config.delay(),
        }
    }
}

/// One in-flight challenge attempt
#[derive(Debug, Clone)]
pub struct ChallengeSession {
    domain: String,
    token: String,
    key_authorization: String,
    started: Instant,
}

impl ChallengeSession {
    fn new(domain: String, token: String, key_authorization: String) -> Self {
        Self {
            domain,
            token,
            key_authorization,
            started: Instant::now(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn key_authorization(&self) -> &str {
        &self.key_authorization
    }

    /// Time since the attempt started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// TLS-ALPN-01 solver
pub struct TlsAlpnChallenge {
    key_authorizer: Arc<dyn KeyAuthorizer>,
    validator: Arc<dyn Validator>,
    provider: Arc<dyn ChallengeProvider>,
    options: ChallengeOptions,
}

impl TlsAlpnChallenge {
    pub fn new(
        key_authorizer: Arc<dyn KeyAuthorizer>,
        validator: Arc<dyn Validator>,
        provider: Arc<dyn ChallengeProvider>,
        options: ChallengeOptions,
    ) -> Self {
        Self {
            key_authorizer,
            validator,
            provider,
            options,
        }
    }

    /// Replace the provider used for subsequent solves
    pub fn set_provider(&mut self, provider: Arc<dyn ChallengeProvider>) {
        self.provider = provider;
    }

    /// Current provider
    pub fn provider(&self) -> &Arc<dyn ChallengeProvider> {
        &self.provider
    }

    /// Current options
    pub fn options(&self) -> ChallengeOptions {
        self.options
    }

    /// Solve the TLS-ALPN-01 challenge of `authz`.
    ///
    /// # Errors
    ///
    /// - [`ChallengeError::NoTlsAlpnChallenge`] if the authorization offers none
    /// - [`ChallengeError::KeyAuthorization`] if the key authorization cannot be computed
    /// - [`ChallengeError::Present`] if the provider fails to present
    /// - [`ChallengeError::Validation`] with the validator's error, unchanged
    ///
    /// Cleanup failures are logged and never returned.
    pub async fn solve(&self, authz: &Authorization) -> Result<(), ChallengeError> {
        let targeted = authz.targeted_domain();
        info!(domain = %targeted, "Trying to solve TLS-ALPN-01 challenge");

        let mut challenge = find_tls_alpn_challenge(authz)?;

        let key_authorization = self
            .key_authorizer
            .key_authorization(&challenge.token)
            .await
            .map_err(|source| ChallengeError::KeyAuthorization {
                domain: targeted.clone(),
                source,
            })?;

        let session = ChallengeSession::new(
            authz.domain().to_string(),
            challenge.token.clone(),
            key_authorization,
        );
        let guard = CleanupGuard::arm(Arc::clone(&self.provider), session.clone(), targeted.clone());

        let outcome = AssertUnwindSafe(self.attempt(&targeted, &session, &mut challenge))
            .catch_unwind()
            .await;

        guard.run().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn attempt(
        &self,
        targeted: &str,
        session: &ChallengeSession,
        challenge: &mut Challenge,
    ) -> Result<(), ChallengeError> {
        self.provider
            .present(session.domain(), session.token(), session.key_authorization())
            .await
            .map_err(|source| ChallengeError::Present {
                domain: targeted.to_string(),
                source,
            })?;
        debug!(domain = %targeted, token = %session.token(), "Challenge presented");

        if let Some(delay) = self.options.delay {
            debug!(domain = %targeted, delay_secs = delay.as_secs(), "Delaying validation");
            tokio::time::sleep(delay).await;
        }

        challenge.key_authorization = Some(session.key_authorization().to_string());

        debug!(domain = %targeted, url = %challenge.url, "Requesting validation");
        self.validator
            .validate(session.domain(), challenge)
            .await
            .map_err(ChallengeError::Validation)?;

        info!(
            domain = %targeted,
            elapsed_ms = session.elapsed().as_millis() as u64,
            "TLS-ALPN-01 challenge validated"
        );

        Ok(())
    }
}

impl std::fmt::Debug for TlsAlpnChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsAlpnChallenge")
            .field("provider", &self.provider)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Withdraws the challenge once, even if the solve future is dropped
struct CleanupGuard {
    provider: Arc<dyn ChallengeProvider>,
    session: Option<ChallengeSession>,
    targeted: String,
}

impl CleanupGuard {
    fn arm(provider: Arc<dyn ChallengeProvider>, session: ChallengeSession, targeted: String) -> Self {
        Self {
            provider,
            session: Some(session),
            targeted,
        }
    }

    async fn run(mut self) {
        if let Some(session) = self.session.take() {
            cleanup(self.provider.as_ref(), &session, &self.targeted).await;
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        let provider = Arc::clone(&self.provider);
        let targeted = std::mem::take(&mut self.targeted);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(domain = %targeted, "Solve abandoned, cleaning up in background");
                handle.spawn(async move {
                    cleanup(provider.as_ref(), &session, &targeted).await;
                });
            }
            Err(_) => {
                warn!(domain = %targeted, "No runtime available, challenge cleanup skipped");
            }
        }
    }
}

async fn cleanup(provider: &dyn ChallengeProvider, session: &ChallengeSession, targeted: &str) {
    if let Err(e) = provider
        .cleanup(session.domain(), session.token(), session.key_authorization())
        .await
    {
        warn!(domain = %targeted, error = %e, "Challenge cleanup failed");
    }
}
