//! Configuration for the tlsalpn challenge solver.
//!
//! Configuration can be written in KDL (preferred) or JSON:
//!
//! ```kdl
//! listener {
//!     interface "0.0.0.0"
//!     port 443
//!     address-family "dual-stack"
//!     handshake-timeout-secs 10
//! }
//!
//! challenge {
//!     delay-secs 0
//!     key-algorithm "rsa-2048"
//!     certificate-validity-secs 3600
//! }
//! ```
//!
//! Every block and field is optional; omitted values take the defaults
//! documented on [`ListenerConfig`] and [`ChallengeConfig`].

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

pub mod challenge;
pub mod kdl;
pub mod listener;
pub mod validate;

pub use challenge::{ChallengeConfig, KeyAlgorithm, ParseKeyAlgorithmError};
pub use listener::{AddressFamily, ListenerConfig, ParseAddressFamilyError, DEFAULT_TLS_PORT};
pub use validate::{lint::lint_config, ValidationResult, ValidationWarning};

/// Complete solver configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Where the challenge listener binds
    #[validate(nested)]
    pub listener: ListenerConfig,

    /// How challenges are presented and validated
    #[validate(nested)]
    pub challenge: ChallengeConfig,
}

impl Config {
    /// Load configuration from a file, choosing the format by extension.
    ///
    /// Files without an extension are parsed as KDL.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("kdl");

        debug!(path = %path.display(), format = extension, "Loading configuration");

        match extension {
            "kdl" => Self::from_kdl(&content),
            "json" => Self::from_json(&content),
            _ => Err(anyhow::anyhow!("Unsupported config format: {}", extension)),
        }
    }

    /// Parse configuration from KDL format
    pub fn from_kdl(content: &str) -> Result<Self> {
        let doc: ::kdl::KdlDocument = content.parse().map_err(|e: ::kdl::KdlError| {
            use miette::Diagnostic;

            let mut error_msg = String::new();
            error_msg.push_str("KDL configuration parse error:\n\n");

            let mut found_details = false;
            if let Some(related) = e.related() {
                for diagnostic in related {
                    error_msg.push_str(&format!("  {}\n", diagnostic));
                    found_details = true;

                    if let Some(labels) = diagnostic.labels() {
                        for label in labels {
                            let (line, col) = kdl::offset_to_line_col(content, label.offset());
                            error_msg
                                .push_str(&format!("\n  --> at line {}, column {}\n", line, col));

                            if let Some(line_content) = content.lines().nth(line.saturating_sub(1))
                            {
                                error_msg.push_str(&format!("{:>4} | {}\n", line, line_content));
                                error_msg.push_str(&format!(
                                    "     | {}^",
                                    " ".repeat(col.saturating_sub(1))
                                ));
                                if let Some(label_msg) = label.label() {
                                    error_msg.push_str(&format!(" {}", label_msg));
                                }
                                error_msg.push('\n');
                            }
                        }
                    }

                    if let Some(help) = diagnostic.help() {
                        error_msg.push_str(&format!("\n  Help: {}\n", help));
                    }
                }
            }

            if !found_details {
                error_msg.push_str(&format!("  {}\n", e));
            }

            anyhow::anyhow!("{}", error_msg)
        })?;

        kdl::parse_kdl_document(doc)
    }

    /// Parse configuration from JSON format
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse JSON configuration")
    }

    /// Validate field ranges
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).context("Invalid configuration")?;
        Ok(())
    }

    /// Report accepted-but-suspicious settings
    pub fn lint(&self) -> ValidationResult {
        lint_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_empty_kdl_uses_defaults() {
        let config = Config::from_kdl("").unwrap();
        assert_eq!(config, Config::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_full_kdl() {
        let config = Config::from_kdl(
            r#"
            listener {
                interface "127.0.0.1"
                port 5001
                address-family "ipv4"
                handshake-timeout-secs 5
            }
            challenge {
                delay-secs 2
                key-algorithm "ecdsa-p256"
                certificate-validity-secs 600
            }
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.interface, "127.0.0.1");
        assert_eq!(config.listener.port, 5001);
        assert_eq!(config.listener.address_family, AddressFamily::Ipv4);
        assert_eq!(config.listener.handshake_timeout(), Duration::from_secs(5));
        assert_eq!(config.challenge.delay(), Some(Duration::from_secs(2)));
        assert_eq!(config.challenge.key_algorithm, KeyAlgorithm::EcdsaP256);
        assert_eq!(
            config.challenge.certificate_validity(),
            Duration::from_secs(600)
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_block_is_rejected() {
        let err = Config::from_kdl("upstreams {}").unwrap_err();
        assert!(err.to_string().contains("upstreams"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = Config::from_kdl("listener {\n    bind \"0.0.0.0\"\n}").unwrap_err();
        assert!(err.to_string().contains("bind"));
    }

    #[test]
    fn test_invalid_address_family_is_rejected() {
        let err = Config::from_kdl("listener {\n    address-family \"udp\"\n}").unwrap_err();
        assert!(err.to_string().contains("udp"));
    }

    #[test]
    fn test_port_out_of_range_is_rejected() {
        assert!(Config::from_kdl("listener {\n    port 70000\n}").is_err());
        assert!(Config::from_kdl("listener {\n    port -1\n}").is_err());
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = Config::from_kdl("listener {\n    port \"443\n}").unwrap_err();
        assert!(err.to_string().contains("KDL configuration parse error"));
    }

    #[test]
    fn test_validation_rejects_zero_handshake_timeout() {
        let mut config = Config::default();
        config.listener.handshake_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_short_certificate_validity() {
        let mut config = Config::default();
        config.challenge.certificate_validity_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_partial_config() {
        let config = Config::from_json(
            r#"{ "listener": { "port": 8443, "address-family": "tcp6" } }"#,
        )
        .unwrap();
        assert_eq!(config.listener.port, 8443);
        assert_eq!(config.listener.address_family, AddressFamily::Ipv6);
        assert_eq!(config.challenge, ChallengeConfig::default());
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let kdl_path = dir.path().join("solver.kdl");
        let mut file = std::fs::File::create(&kdl_path).unwrap();
        writeln!(file, "challenge {{\n    delay-secs 3\n}}").unwrap();
        let config = Config::from_file(&kdl_path).unwrap();
        assert_eq!(config.challenge.delay_secs, 3);

        let json_path = dir.path().join("solver.json");
        std::fs::write(&json_path, r#"{ "challenge": { "delay-secs": 4 } }"#).unwrap();
        let config = Config::from_file(&json_path).unwrap();
        assert_eq!(config.challenge.delay_secs, 4);

        let yaml_path = dir.path().join("solver.yaml");
        std::fs::write(&yaml_path, "").unwrap();
        assert!(Config::from_file(&yaml_path).is_err());
    }
}
