//! TLS-ALPN-01 Challenge Solver
//!
//! Answers ACME `tls-alpn-01` challenges (RFC 8737) with an ephemeral TLS
//! listener that speaks only `acme-tls/1`.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tlsalpn_solver::acme::{AccountKeyAuthorizer, ChallengeOptions, TlsAlpnChallenge, TlsAlpnListener};
//! use tlsalpn_config::Config;
//!
//! let config = Config::from_file("tlsalpn.kdl")?;
//! let solver = TlsAlpnChallenge::new(
//!     Arc::new(AccountKeyAuthorizer::from_jwk(&account_jwk)?),
//!     Arc::new(my_validator),
//!     Arc::new(TlsAlpnListener::from_config(&config)),
//!     ChallengeOptions::from(&config.challenge),
//! );
//! solver.solve(&authorization).await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use acme::{
    ChallengeError, ChallengeOptions, ChallengeProvider, TlsAlpnChallenge, TlsAlpnListener,
    Validator,
};
pub use tlsalpn_config::Config;
