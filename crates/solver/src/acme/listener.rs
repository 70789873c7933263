//! TLS-ALPN-01 challenge listener
//!
//! Serves the ephemeral challenge certificate to peers that negotiate the
//! `acme-tls/1` application protocol (RFC 8737 §3).
//!
//! # Lifecycle
//!
//! ```text
//! Idle --present--> Bound --spawn accept loop--> Serving --cleanup--> Closed
//!   ^                                                                   |
//!   +------------------------- present (next challenge) ---------------+
//! ```
//!
//! `present` holds the state lock from certificate generation until the
//! accept loop is running, so `Bound` is never observed from outside. A
//! second `present` while serving fails rather than rebinding the port.
//!
//! # Handshake policy
//!
//! The server advertises `acme-tls/1` as its only protocol and resolves the
//! challenge certificate only when the ClientHello offers it. A peer that
//! offers no ALPN, or only other protocols, fails the handshake; there is no
//! fallback certificate. Session resumption is disabled so every handshake
//! presents the certificate.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, NoServerSessionStorage, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use tlsalpn_config::{AddressFamily, Config, ListenerConfig};

use super::certificate::{CertificateOptions, ChallengeCertificate};
use super::error::ProviderError;
use super::provider::ChallengeProvider;

/// ALPN protocol identifier for TLS-ALPN-01 (RFC 8737 §6.2)
pub const ACME_TLS_ALPN_PROTOCOL: &[u8] = b"acme-tls/1";

/// Listen backlog for the challenge socket
const LISTEN_BACKLOG: i32 = 128;

/// Pause after a failed `accept` before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Observable listener phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerPhase {
    /// Never presented
    Idle,
    /// Accepting connections
    Serving,
    /// Cleaned up; may present again
    Closed,
}

enum ListenerState {
    Idle,
    Serving(ActiveListener),
    Closed,
}

struct ActiveListener {
    domain: String,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// TLS listener answering TLS-ALPN-01 challenges
///
/// Implements [`ChallengeProvider`]: `present` binds the configured
/// address and starts serving, `cleanup` closes the socket and waits for
/// the accept loop to exit.
pub struct TlsAlpnListener {
    config: ListenerConfig,
    certificate_options: CertificateOptions,
    crypto: Arc<CryptoProvider>,
    state: Mutex<ListenerState>,
}

impl TlsAlpnListener {
    /// Create a listener for the given configuration
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            certificate_options: CertificateOptions::default(),
            crypto: Arc::new(rustls::crypto::aws_lc_rs::default_provider()),
            state: Mutex::new(ListenerState::Idle),
        }
    }

    /// Create a listener from a full solver configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.listener.clone())
            .with_certificate_options(CertificateOptions::from(&config.challenge))
    }

    /// Set how challenge certificates are generated
    pub fn with_certificate_options(mut self, options: CertificateOptions) -> Self {
        self.certificate_options = options;
        self
    }

    /// Listener configuration
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Configured address in `host:port` form
    pub fn address(&self) -> String {
        self.config.address()
    }

    /// Current phase
    pub async fn phase(&self) -> ListenerPhase {
        match &*self.state.lock().await {
            ListenerState::Idle => ListenerPhase::Idle,
            ListenerState::Serving(_) => ListenerPhase::Serving,
            ListenerState::Closed => ListenerPhase::Closed,
        }
    }

    /// Address the listener is bound to, while serving
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().await {
            ListenerState::Serving(active) => Some(active.local_addr),
            _ => None,
        }
    }

    async fn build_certificate(
        &self,
        domain: &str,
        key_authorization: &str,
    ) -> Result<ChallengeCertificate, ProviderError> {
        let domain = domain.to_string();
        let key_authorization = key_authorization.to_string();
        let options = self.certificate_options;

        // Key generation is CPU-bound (RSA in particular)
        let built = tokio::task::spawn_blocking(move || {
            ChallengeCertificate::build(&domain, &key_authorization, &options)
        })
        .await;

        match built {
            Ok(certificate) => Ok(certificate?),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(ProviderError::Other(Box::new(e))),
        }
    }

    fn server_config(&self, key: Arc<CertifiedKey>) -> Result<ServerConfig, ProviderError> {
        let mut config = ServerConfig::builder_with_provider(Arc::clone(&self.crypto))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(ChallengeCertResolver { key }));

        config.alpn_protocols = vec![ACME_TLS_ALPN_PROTOCOL.to_vec()];
        config.session_storage = Arc::new(NoServerSessionStorage {});
        config.send_tls13_tickets = 0;

        Ok(config)
    }

    async fn bind(&self) -> Result<TcpListener, ProviderError> {
        let family = self.config.address_family;
        let candidates = self.bind_candidates().await?;
        if candidates.is_empty() {
            return Err(ProviderError::NoAddress {
                address: self.address(),
                family: family.to_string(),
            });
        }

        let (addr, listener) = bind_first(&candidates, family)?;
        TcpListener::from_std(listener).map_err(|source| ProviderError::Bind {
            address: addr.to_string(),
            source,
        })
    }

    async fn bind_candidates(&self) -> Result<Vec<SocketAddr>, ProviderError> {
        let port = self.config.port;
        let family = self.config.address_family;
        let host = self.config.interface_host();

        let v4_any = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let v6_any = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);

        if host.is_empty() {
            return Ok(match family {
                AddressFamily::Ipv4 => vec![v4_any],
                AddressFamily::Ipv6 => vec![v6_any],
                // Hosts without IPv6 fall back to the IPv4 wildcard
                AddressFamily::DualStack => vec![v6_any, v4_any],
            });
        }

        let resolved: Vec<SocketAddr> = match host.parse::<IpAddr>() {
            Ok(ip) => vec![SocketAddr::new(ip, port)],
            Err(_) => tokio::net::lookup_host((host, port))
                .await
                .map_err(|source| ProviderError::Resolve {
                    address: self.address(),
                    source,
                })?
                .collect(),
        };

        let matching: Vec<SocketAddr> = resolved
            .into_iter()
            .filter(|addr| match family {
                AddressFamily::Ipv4 => addr.is_ipv4(),
                AddressFamily::Ipv6 => addr.is_ipv6(),
                AddressFamily::DualStack => true,
            })
            .collect();

        if matching.is_empty() {
            return Err(ProviderError::NoAddress {
                address: self.address(),
                family: family.to_string(),
            });
        }

        Ok(matching)
    }
}

#[async_trait]
impl ChallengeProvider for TlsAlpnListener {
    async fn present(
        &self,
        domain: &str,
        token: &str,
        key_authorization: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        if let ListenerState::Serving(active) = &*state {
            return Err(ProviderError::AlreadyServing {
                domain: active.domain.clone(),
                address: active.local_addr.to_string(),
            });
        }

        debug!(domain = %domain, token = %token, "Presenting TLS-ALPN-01 challenge");

        let certificate = self.build_certificate(domain, key_authorization).await?;
        let certified_key = certificate.certified_key(&self.crypto)?;
        let acceptor = TlsAcceptor::from(Arc::new(self.server_config(certified_key)?));

        let listener = self.bind().await?;
        let local_addr = listener.local_addr().map_err(|source| ProviderError::Bind {
            address: self.address(),
            source,
        })?;

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            listener,
            acceptor,
            shutdown.clone(),
            self.config.handshake_timeout(),
        ));

        info!(
            domain = %domain,
            address = %local_addr,
            "TLS-ALPN-01 challenge listener started"
        );

        *state = ListenerState::Serving(ActiveListener {
            domain: domain.to_string(),
            local_addr,
            shutdown,
            task,
        });

        Ok(())
    }

    async fn cleanup(
        &self,
        domain: &str,
        _token: &str,
        _key_authorization: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;

        let active = match std::mem::replace(&mut *state, ListenerState::Closed) {
            ListenerState::Serving(active) => active,
            previous => {
                trace!(domain = %domain, "No challenge listener to clean up");
                *state = previous;
                return Ok(());
            }
        };

        active.shutdown.cancel();
        active
            .task
            .await
            .map_err(|e| ProviderError::AcceptLoop(e.to_string()))?;

        info!(
            domain = %active.domain,
            address = %active.local_addr,
            "TLS-ALPN-01 challenge listener stopped"
        );

        Ok(())
    }
}

impl Drop for TlsAlpnListener {
    fn drop(&mut self) {
        if let ListenerState::Serving(active) = self.state.get_mut() {
            warn!(
                domain = %active.domain,
                address = %active.local_addr,
                "Challenge listener dropped while serving, shutting it down"
            );
            active.shutdown.cancel();
        }
    }
}

impl std::fmt::Debug for TlsAlpnListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsAlpnListener")
            .field("address", &self.address())
            .field("address_family", &self.config.address_family)
            .field("certificate_options", &self.certificate_options)
            .finish()
    }
}

/// Returns `true` if the ClientHello offers the `acme-tls/1` protocol
pub fn offers_acme_tls(client_hello: &ClientHello<'_>) -> bool {
    client_hello
        .alpn()
        .into_iter()
        .flatten()
        .any(|protocol| protocol == ACME_TLS_ALPN_PROTOCOL)
}

/// Resolves the challenge certificate for `acme-tls/1` handshakes only
#[derive(Debug)]
struct ChallengeCertResolver {
    key: Arc<CertifiedKey>,
}

impl ResolvesServerCert for ChallengeCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        if offers_acme_tls(&client_hello) {
            Some(Arc::clone(&self.key))
        } else {
            debug!(
                server_name = ?client_hello.server_name(),
                "Refusing handshake that does not offer acme-tls/1"
            );
            None
        }
    }
}

enum BindFailure {
    /// The socket could not be created or configured for this address family
    Socket(io::Error),
    /// The address could not be bound or listened on
    Bind(io::Error),
}

/// Bind the first usable candidate.
///
/// Moves on to the next candidate only when the address family or the
/// address itself is unavailable on this host. Any other failure (port in
/// use, permission denied) is returned for the address that caused it.
fn bind_first(
    candidates: &[SocketAddr],
    family: AddressFamily,
) -> Result<(SocketAddr, std::net::TcpListener), ProviderError> {
    let mut last_error = None;

    for &addr in candidates {
        let source = match bind_socket(addr, family) {
            Ok(listener) => return Ok((addr, listener)),
            Err(BindFailure::Socket(source)) => source,
            Err(BindFailure::Bind(source)) if source.kind() == io::ErrorKind::AddrNotAvailable => {
                source
            }
            Err(BindFailure::Bind(source)) => {
                return Err(ProviderError::Bind {
                    address: addr.to_string(),
                    source,
                });
            }
        };

        debug!(
            address = %addr,
            error = %source,
            "Address unavailable for challenge listener"
        );
        last_error = Some((addr, source));
    }

    match last_error {
        Some((addr, source)) => Err(ProviderError::Bind {
            address: addr.to_string(),
            source,
        }),
        None => Err(ProviderError::NoAddress {
            address: String::new(),
            family: family.to_string(),
        }),
    }
}

fn bind_socket(addr: SocketAddr, family: AddressFamily) -> Result<std::net::TcpListener, BindFailure> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(BindFailure::Socket)?;

    if addr.is_ipv6() {
        socket
            .set_only_v6(family == AddressFamily::Ipv6)
            .map_err(BindFailure::Socket)?;
    }

    #[cfg(not(windows))]
    socket.set_reuse_address(true).map_err(BindFailure::Bind)?;

    socket.set_nonblocking(true).map_err(BindFailure::Bind)?;
    socket.bind(&addr.into()).map_err(BindFailure::Bind)?;
    socket.listen(LISTEN_BACKLOG).map_err(BindFailure::Bind)?;

    Ok(socket.into())
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    shutdown: CancellationToken,
    handshake_timeout: Duration,
) {
    let mut handshakes = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!(peer = %peer, "Accepted challenge connection");
                    handshakes.spawn(serve_connection(
                        acceptor.clone(),
                        stream,
                        peer,
                        handshake_timeout,
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept challenge connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },

            Some(joined) = handshakes.join_next(), if !handshakes.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!(error = %e, "Challenge connection task panicked");
                    }
                }
            }
        }
    }

    let in_flight = handshakes.len();
    handshakes.shutdown().await;
    drop(listener);

    debug!(in_flight, "Challenge accept loop stopped");
}

async fn serve_connection(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
    handshake_timeout: Duration,
) {
    match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
        Ok(Ok(mut tls)) => {
            let server_name = tls.get_ref().1.server_name().map(str::to_owned);
            debug!(
                peer = %peer,
                server_name = ?server_name,
                "Served TLS-ALPN-01 challenge certificate"
            );
            if let Err(e) = tls.shutdown().await {
                trace!(peer = %peer, error = %e, "Error closing challenge connection");
            }
        }
        Ok(Err(e)) => {
            debug!(peer = %peer, error = %e, "TLS-ALPN-01 handshake rejected");
        }
        Err(_) => {
            debug!(
                peer = %peer,
                timeout_secs = handshake_timeout.as_secs(),
                "TLS-ALPN-01 handshake timed out"
            );
        }
    }
}
