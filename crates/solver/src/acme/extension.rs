//! acmeIdentifier certificate extension (RFC 8737 §3)
//!
//! The challenge certificate proves control of the domain by carrying the
//! SHA-256 digest of the key authorization in a critical extension:
//!
//! ```text
//! id-pe-acmeIdentifier OBJECT IDENTIFIER ::= { id-pe 31 }
//! Authorization ::= OCTET STRING (SIZE (32))
//! ```

use std::fmt;

use rcgen::CustomExtension;
use sha2::{Digest, Sha256};

/// Object identifier of the acmeIdentifier extension (`1.3.6.1.5.5.7.1.31`)
pub const ACME_IDENTIFIER_OID: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 1, 31];

/// Dotted form of [`ACME_IDENTIFIER_OID`]
pub const ACME_IDENTIFIER_OID_STR: &str = "1.3.6.1.5.5.7.1.31";

/// Length of the SHA-256 digest carried by the extension
pub const DIGEST_LEN: usize = 32;

/// DER tag for OCTET STRING
const DER_OCTET_STRING: u8 = 0x04;

/// The acmeIdentifier extension for one key authorization.
///
/// Derived fresh for every challenge and never cached.
#[derive(Clone, PartialEq, Eq)]
pub struct AcmeIdentifier {
    digest: [u8; DIGEST_LEN],
    extension: CustomExtension,
}

impl AcmeIdentifier {
    /// Encode the extension for a key authorization
    pub fn new(key_authorization: &str) -> Self {
        let digest: [u8; DIGEST_LEN] = Sha256::digest(key_authorization.as_bytes()).into();
        Self {
            digest,
            extension: CustomExtension::new_acme_identifier(&digest),
        }
    }

    /// SHA-256 digest of the key authorization
    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    /// DER-encoded extension value (`04 20 || digest`)
    pub fn der_value(&self) -> &[u8] {
        self.extension.content()
    }

    /// Extension OID components
    pub fn oid(&self) -> Vec<u64> {
        self.extension.oid_components().collect()
    }

    /// Whether the extension is marked critical. Always true.
    pub fn is_critical(&self) -> bool {
        self.extension.criticality()
    }

    /// The extension in the form the certificate builder consumes
    pub fn to_custom_extension(&self) -> CustomExtension {
        self.extension.clone()
    }

    /// Decode an extension value back into the digest.
    ///
    /// Returns `None` unless `value` is exactly a DER OCTET STRING of 32 bytes.
    pub fn decode_value(value: &[u8]) -> Option<[u8; DIGEST_LEN]> {
        match value {
            [DER_OCTET_STRING, len, digest @ ..]
                if *len as usize == DIGEST_LEN && digest.len() == DIGEST_LEN =>
            {
                digest.try_into().ok()
            }
            _ => None,
        }
    }
}

impl fmt::Debug for AcmeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcmeIdentifier")
            .field("oid", &ACME_IDENTIFIER_OID_STR)
            .field("critical", &self.is_critical())
            .field("digest", &hex::encode(self.digest))
            .finish()
    }
}
