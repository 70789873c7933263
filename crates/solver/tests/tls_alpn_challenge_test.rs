//! TLS-ALPN-01 Challenge Integration Tests
//!
//! Runs the challenge listener on loopback and talks to it with a real
//! rustls client, the way a validating CA would.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use tlsalpn_config::{KeyAlgorithm, ListenerConfig};
use tlsalpn_solver::acme::{
    probe, validation_client_config, AccountKeyAuthorizer, Authorization, BoxError,
    CertificateOptions, Challenge, ChallengeError, ChallengeOptions, ChallengeProvider,
    ChallengeStatus, ChallengeType, Identifier, ListenerPhase, ProviderError, TlsAlpnChallenge,
    TlsAlpnListener, Validator, ACME_TLS_ALPN_PROTOCOL,
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

fn loopback_listener() -> TlsAlpnListener {
    TlsAlpnListener::new(ListenerConfig::new("127.0.0.1", 0)).with_certificate_options(
        CertificateOptions {
            key_algorithm: KeyAlgorithm::EcdsaP256,
            ..Default::default()
        },
    )
}

async fn serving_addr(listener: &TlsAlpnListener) -> SocketAddr {
    listener
        .local_addr()
        .await
        .expect("listener should be serving")
}

async fn handshake(addr: SocketAddr, alpn: Vec<Vec<u8>>) -> std::io::Result<Option<Vec<u8>>> {
    let config = validation_client_config(alpn).unwrap();
    let stream = TcpStream::connect(addr).await?;
    let tls = TlsConnector::from(Arc::new(config))
        .connect(ServerName::try_from("example.org").unwrap(), stream)
        .await?;
    Ok(tls.get_ref().1.alpn_protocol().map(<[u8]>::to_vec))
}

fn authorization(domain: &str, token: &str) -> Authorization {
    Authorization {
        identifier: Identifier::dns(domain),
        status: Default::default(),
        challenges: vec![Challenge {
            kind: ChallengeType::TlsAlpn01,
            url: "https://ca.example/chall/1".to_string(),
            token: token.to_string(),
            status: ChallengeStatus::Pending,
            key_authorization: None,
        }],
        wildcard: false,
    }
}

// ============================================================================
// Listener handshake behaviour
// ============================================================================

mod alpn {
    use super::*;

    #[tokio::test]
    async fn test_presented_certificate_carries_digest() {
        let listener = loopback_listener();
        listener
            .present("example.org", "abc123", "abc123.xyz789")
            .await
            .unwrap();
        let addr = serving_addr(&listener).await;

        let outcome = probe(&addr.to_string(), "example.org", PROBE_TIMEOUT)
            .await
            .unwrap();
        assert!(outcome.negotiated_acme_tls());
        assert!(outcome.certificate.covers("example.org"));
        assert!(outcome.certificate.matches("abc123.xyz789"));

        listener
            .cleanup("example.org", "abc123", "abc123.xyz789")
            .await
            .unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_rsa_certificate_is_served() {
        let listener = TlsAlpnListener::new(ListenerConfig::new("127.0.0.1", 0));
        listener
            .present("example.org", "abc123", "abc123.xyz789")
            .await
            .unwrap();
        let addr = serving_addr(&listener).await;

        let outcome = probe(&addr.to_string(), "example.org", PROBE_TIMEOUT)
            .await
            .unwrap();
        assert!(outcome.certificate.matches("abc123.xyz789"));

        listener
            .cleanup("example.org", "abc123", "abc123.xyz789")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_client_without_alpn_is_refused() {
        let listener = loopback_listener();
        listener.present("example.org", "t", "t.k").await.unwrap();
        let addr = serving_addr(&listener).await;

        assert!(handshake(addr, vec![]).await.is_err());

        listener.cleanup("example.org", "t", "t.k").await.unwrap();
    }

    #[tokio::test]
    async fn test_client_with_other_alpn_is_refused() {
        let listener = loopback_listener();
        listener.present("example.org", "t", "t.k").await.unwrap();
        let addr = serving_addr(&listener).await;

        assert!(handshake(addr, vec![b"h2".to_vec(), b"http/1.1".to_vec()])
            .await
            .is_err());

        listener.cleanup("example.org", "t", "t.k").await.unwrap();
    }

    #[tokio::test]
    async fn test_acme_tls_selected_from_several_offers() {
        let listener = loopback_listener();
        listener.present("example.org", "t", "t.k").await.unwrap();
        let addr = serving_addr(&listener).await;

        let selected = handshake(addr, vec![b"h2".to_vec(), ACME_TLS_ALPN_PROTOCOL.to_vec()])
            .await
            .unwrap();
        assert_eq!(selected.as_deref(), Some(ACME_TLS_ALPN_PROTOCOL));

        listener.cleanup("example.org", "t", "t.k").await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_handshake_does_not_stop_listener() {
        let listener = loopback_listener();
        listener.present("example.org", "t", "t.k").await.unwrap();
        let addr = serving_addr(&listener).await;

        assert!(handshake(addr, vec![]).await.is_err());
        let outcome = probe(&addr.to_string(), "example.org", PROBE_TIMEOUT)
            .await
            .unwrap();
        assert!(outcome.certificate.matches("t.k"));

        listener.cleanup("example.org", "t", "t.k").await.unwrap();
    }
}

// ============================================================================
// Listener lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_occupied_port_leaves_nothing_bound() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let listener = TlsAlpnListener::new(ListenerConfig::new("127.0.0.1", port))
            .with_certificate_options(CertificateOptions {
                key_algorithm: KeyAlgorithm::EcdsaP256,
                ..Default::default()
            });
        let err = listener.present("example.org", "t", "t.k").await.unwrap_err();

        assert!(matches!(err, ProviderError::Bind { .. }));
        assert!(err.to_string().contains(&format!("127.0.0.1:{}", port)));
        assert_eq!(listener.phase().await, ListenerPhase::Idle);
        assert_eq!(listener.local_addr().await, None);
    }

    #[tokio::test]
    async fn test_sequential_challenges_on_one_listener() {
        let listener = loopback_listener();

        for (domain, key_auth) in [("example.org", "a.k1"), ("example.net", "b.k2")] {
            listener.present(domain, "tok", key_auth).await.unwrap();
            let addr = serving_addr(&listener).await;

            let outcome = probe(&addr.to_string(), domain, PROBE_TIMEOUT)
                .await
                .unwrap();
            assert!(outcome.certificate.covers(domain));
            assert!(outcome.certificate.matches(key_auth));

            listener.cleanup(domain, "tok", key_auth).await.unwrap();
            assert_eq!(listener.phase().await, ListenerPhase::Closed);
        }
    }
}

// ============================================================================
// Solving through the orchestrator
// ============================================================================

mod solve {
    use super::*;

    /// Validates by probing the listener like a CA would
    struct ProbingValidator {
        listener: Arc<TlsAlpnListener>,
        seen: Mutex<Option<SocketAddr>>,
    }

    #[async_trait]
    impl Validator for ProbingValidator {
        async fn validate(&self, domain: &str, challenge: &Challenge) -> Result<(), BoxError> {
            let key_authorization = challenge
                .key_authorization
                .as_deref()
                .ok_or("key authorization not set")?;
            let addr = self
                .listener
                .local_addr()
                .await
                .ok_or("listener not serving")?;
            *self.seen.lock() = Some(addr);

            let outcome = probe(&addr.to_string(), domain, PROBE_TIMEOUT).await?;
            if !outcome.certificate.matches(key_authorization) {
                return Err("digest mismatch".into());
            }
            Ok(())
        }
    }

    /// Records the serving address, then rejects the challenge
    struct RejectingValidator {
        listener: Arc<TlsAlpnListener>,
        seen: Mutex<Option<SocketAddr>>,
    }

    #[async_trait]
    impl Validator for RejectingValidator {
        async fn validate(&self, _domain: &str, _challenge: &Challenge) -> Result<(), BoxError> {
            *self.seen.lock() = self.listener.local_addr().await;
            Err("urn:ietf:params:acme:error:incorrectResponse".into())
        }
    }

    #[tokio::test]
    async fn test_solve_end_to_end() {
        let listener = Arc::new(loopback_listener());
        let validator = Arc::new(ProbingValidator {
            listener: Arc::clone(&listener),
            seen: Mutex::new(None),
        });

        let challenge = TlsAlpnChallenge::new(
            Arc::new(AccountKeyAuthorizer::new("xyz789")),
            validator.clone(),
            listener.clone(),
            ChallengeOptions::default(),
        );

        challenge
            .solve(&authorization("example.org", "abc123"))
            .await
            .unwrap();

        assert_eq!(listener.phase().await, ListenerPhase::Closed);
        let addr = (*validator.seen.lock()).expect("validator ran");
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_validation_releases_port() {
        let listener = Arc::new(loopback_listener());
        let validator = Arc::new(RejectingValidator {
            listener: Arc::clone(&listener),
            seen: Mutex::new(None),
        });

        let challenge = TlsAlpnChallenge::new(
            Arc::new(AccountKeyAuthorizer::new("xyz789")),
            validator.clone(),
            listener.clone(),
            ChallengeOptions::default(),
        );

        let err = challenge
            .solve(&authorization("example.org", "abc123"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChallengeError::Validation(_)));
        assert_eq!(
            err.to_string(),
            "urn:ietf:params:acme:error:incorrectResponse"
        );

        assert_eq!(listener.phase().await, ListenerPhase::Closed);
        let addr = (*validator.seen.lock()).expect("validator ran");
        assert!(std::net::TcpListener::bind(addr).is_ok());
    }

    #[tokio::test]
    async fn test_present_failure_is_reported_with_domain() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();
        let listener = Arc::new(TlsAlpnListener::new(ListenerConfig::new("127.0.0.1", port)));
        let validator = Arc::new(RejectingValidator {
            listener: Arc::clone(&listener),
            seen: Mutex::new(None),
        });

        let challenge = TlsAlpnChallenge::new(
            Arc::new(AccountKeyAuthorizer::new("xyz789")),
            validator.clone(),
            listener.clone(),
            ChallengeOptions::default(),
        );

        let err = challenge
            .solve(&authorization("example.org", "abc123"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChallengeError::Present {
                source: ProviderError::Bind { .. },
                ..
            }
        ));
        assert!(validator.seen.lock().is_none());
        assert_eq!(listener.phase().await, ListenerPhase::Idle);
    }
}
