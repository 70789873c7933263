//! Challenge certificate inspection
//!
//! Looks at a TLS-ALPN-01 response the way a validating CA does: connect
//! with ALPN `acme-tls/1` and SNI set to the domain, take whatever
//! certificate comes back, and compare its acmeIdentifier digest with the
//! expected key authorization.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::*;

use super::error::InspectError;
use super::extension::{AcmeIdentifier, ACME_IDENTIFIER_OID_STR, DIGEST_LEN};
use super::listener::ACME_TLS_ALPN_PROTOCOL;

/// What a challenge certificate claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeCertificateInfo {
    /// Subject common name, if any
    pub common_name: Option<String>,
    /// DNS names from the subjectAltName extension
    pub dns_names: Vec<String>,
    /// Digest from the acmeIdentifier extension
    pub acme_identifier: Option<[u8; DIGEST_LEN]>,
    /// `notBefore` as a Unix timestamp
    pub not_before: i64,
    /// `notAfter` as a Unix timestamp
    pub not_after: i64,
}

impl ChallengeCertificateInfo {
    /// Whether the certificate carries the digest of `key_authorization`
    pub fn matches(&self, key_authorization: &str) -> bool {
        self.acme_identifier.as_ref()
            == Some(AcmeIdentifier::new(key_authorization).digest())
    }

    /// Whether `domain` is the certificate's only subjectAltName, as
    /// RFC 8737 §3 requires
    pub fn covers(&self, domain: &str) -> bool {
        matches!(self.dns_names.as_slice(), [name] if name.eq_ignore_ascii_case(domain))
    }

    /// Hex-encoded acmeIdentifier digest
    pub fn digest_hex(&self) -> Option<String> {
        self.acme_identifier.map(hex::encode)
    }
}

/// Parse a DER certificate and extract its challenge-relevant parts.
///
/// A certificate without the acmeIdentifier extension parses successfully
/// with `acme_identifier: None`. An extension that is not critical, or
/// whose value is not a 32-byte OCTET STRING, is an error.
pub fn inspect_certificate(der: &[u8]) -> Result<ChallengeCertificateInfo, InspectError> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| InspectError::Parse(e.to_string()))?;

    let acme_extensions: Vec<_> = cert
        .extensions()
        .iter()
        .filter(|ext| ext.oid.to_id_string() == ACME_IDENTIFIER_OID_STR)
        .collect();

    let acme_identifier = match acme_extensions.as_slice() {
        [] => None,
        [ext] => {
            if !ext.critical {
                return Err(InspectError::NotCritical);
            }
            let digest = AcmeIdentifier::decode_value(ext.value)
                .ok_or(InspectError::MalformedValue(ext.value.len()))?;
            Some(digest)
        }
        many => return Err(InspectError::DuplicateExtension(many.len())),
    };

    let dns_names = cert
        .extensions()
        .iter()
        .filter_map(|ext| match ext.parsed_extension() {
            ParsedExtension::SubjectAlternativeName(san) => Some(san),
            _ => None,
        })
        .flat_map(|san| san.general_names.iter())
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some(dns.to_string()),
            _ => None,
        })
        .collect();

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_owned);

    Ok(ChallengeCertificateInfo {
        common_name,
        dns_names,
        acme_identifier,
        not_before: cert.validity().not_before.timestamp(),
        not_after: cert.validity().not_after.timestamp(),
    })
}

/// Result of probing a challenge listener
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Address that was probed
    pub address: String,
    /// Protocol the server selected
    pub alpn_protocol: Option<Vec<u8>>,
    /// The leaf certificate the server presented
    pub certificate: ChallengeCertificateInfo,
}

impl ProbeOutcome {
    /// Whether the server selected `acme-tls/1`
    pub fn negotiated_acme_tls(&self) -> bool {
        self.alpn_protocol.as_deref() == Some(ACME_TLS_ALPN_PROTOCOL)
    }
}

/// Connect to `address` as a validating CA would and inspect the response.
pub async fn probe(
    address: &str,
    domain: &str,
    timeout: Duration,
) -> Result<ProbeOutcome, InspectError> {
    tokio::time::timeout(timeout, probe_inner(address, domain))
        .await
        .map_err(|_| InspectError::Timeout(address.to_string()))?
}

async fn probe_inner(address: &str, domain: &str) -> Result<ProbeOutcome, InspectError> {
    let config = validation_client_config(vec![ACME_TLS_ALPN_PROTOCOL.to_vec()])?;
    let server_name = ServerName::try_from(domain.to_string())
        .map_err(|_| InspectError::InvalidServerName(domain.to_string()))?;

    let stream = TcpStream::connect(address)
        .await
        .map_err(|source| InspectError::Connect {
            address: address.to_string(),
            source,
        })?;

    let tls = TlsConnector::from(Arc::new(config))
        .connect(server_name, stream)
        .await
        .map_err(|source| InspectError::Handshake {
            address: address.to_string(),
            source,
        })?;

    let (_, connection) = tls.get_ref();
    let alpn_protocol = connection.alpn_protocol().map(<[u8]>::to_vec);
    let leaf = connection
        .peer_certificates()
        .and_then(|chain| chain.first())
        .ok_or_else(|| InspectError::NoCertificate(address.to_string()))?;

    let certificate = inspect_certificate(leaf)?;

    debug!(
        address = %address,
        domain = %domain,
        digest = ?certificate.digest_hex(),
        "Probed TLS-ALPN-01 listener"
    );

    Ok(ProbeOutcome {
        address: address.to_string(),
        alpn_protocol,
        certificate,
    })
}

/// TLS client configuration that accepts any server certificate.
///
/// Only suitable for looking at challenge certificates, which are
/// self-signed and carry a critical extension no verifier understands.
pub fn validation_client_config(alpn_protocols: Vec<Vec<u8>>) -> Result<ClientConfig, InspectError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    let mut config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
        .with_no_client_auth();
    config.alpn_protocols = alpn_protocols;

    Ok(config)
}

/// Accepts every certificate and handshake signature.
///
/// Signatures are not checked either: the webpki verifier refuses to parse
/// a certificate with an unknown critical extension.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::certificate::{CertificateOptions, ChallengeCertificate};
    use rcgen::{CertificateParams, CustomExtension, KeyPair};
    use tlsalpn_config::KeyAlgorithm;

    fn challenge_der(domain: &str, key_authorization: &str) -> Vec<u8> {
        let options = CertificateOptions {
            key_algorithm: KeyAlgorithm::EcdsaP256,
            ..Default::default()
        };
        ChallengeCertificate::build(domain, key_authorization, &options)
            .unwrap()
            .certificate_der()
            .to_vec()
    }

    fn der_with_extension(extension: Option<CustomExtension>) -> Vec<u8> {
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = CertificateParams::new(vec!["example.org".to_string()]).unwrap();
        params.custom_extensions.extend(extension);
        params.self_signed(&key_pair).unwrap().der().to_vec()
    }

    #[test]
    fn test_inspect_challenge_certificate() {
        let info = inspect_certificate(&challenge_der("example.org", "abc123.xyz789")).unwrap();

        assert_eq!(info.common_name.as_deref(), Some("example.org"));
        assert_eq!(info.dns_names, vec!["example.org".to_string()]);
        assert!(info.covers("EXAMPLE.org"));
        assert!(!info.covers("example.net"));
        assert!(info.matches("abc123.xyz789"));
        assert!(!info.matches("abc123.other"));
        assert!(info.not_before < info.not_after);
    }

    #[test]
    fn test_certificate_without_extension() {
        let info = inspect_certificate(&der_with_extension(None)).unwrap();
        assert_eq!(info.acme_identifier, None);
        assert!(!info.matches("abc123.xyz789"));
        assert_eq!(info.digest_hex(), None);
    }

    #[test]
    fn test_non_critical_extension_is_rejected() {
        let mut value = vec![0x04, 0x20];
        value.extend_from_slice(&[7u8; 32]);
        let mut extension = CustomExtension::from_oid_content(
            crate::acme::extension::ACME_IDENTIFIER_OID,
            value,
        );
        extension.set_criticality(false);

        let err = inspect_certificate(&der_with_extension(Some(extension))).unwrap_err();
        assert!(matches!(err, InspectError::NotCritical));
    }

    #[test]
    fn test_malformed_extension_value_is_rejected() {
        let mut extension = CustomExtension::from_oid_content(
            crate::acme::extension::ACME_IDENTIFIER_OID,
            vec![0x04, 0x02, 0xAA, 0xBB],
        );
        extension.set_criticality(true);

        let err = inspect_certificate(&der_with_extension(Some(extension))).unwrap_err();
        assert!(matches!(err, InspectError::MalformedValue(4)));
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        assert!(matches!(
            inspect_certificate(b"not a certificate"),
            Err(InspectError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_connection_refused() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let address = format!("127.0.0.1:{}", port);

        let err = probe(&address, "example.org", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, InspectError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_probe_rejects_invalid_server_name() {
        let err = probe("127.0.0.1:1", "not a name", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, InspectError::InvalidServerName(_)));
    }
}
