//! Listener and challenge KDL parsing.

use anyhow::Result;
use tracing::trace;

use crate::challenge::{default_certificate_validity, ChallengeConfig, KeyAlgorithm};
use crate::listener::{default_handshake_timeout, AddressFamily, ListenerConfig, DEFAULT_TLS_PORT};

use super::helpers::{child_names, get_string_entry, get_uint_entry};

const LISTENER_FIELDS: &[&str] = &[
    "interface",
    "port",
    "address-family",
    "handshake-timeout-secs",
];

const CHALLENGE_FIELDS: &[&str] = &["delay-secs", "key-algorithm", "certificate-validity-secs"];

/// Parse the `listener` configuration block
pub fn parse_listener_config(node: &kdl::KdlNode) -> Result<ListenerConfig> {
    trace!("Parsing listener configuration block");
    reject_unknown_fields(node, LISTENER_FIELDS)?;

    let address_family = match get_string_entry(node, "address-family") {
        Some(value) => value.parse::<AddressFamily>()?,
        None => AddressFamily::default(),
    };

    let config = ListenerConfig {
        interface: get_string_entry(node, "interface").unwrap_or_default(),
        port: get_uint_entry(node, "port")?.unwrap_or(DEFAULT_TLS_PORT),
        address_family,
        handshake_timeout_secs: get_uint_entry(node, "handshake-timeout-secs")?
            .unwrap_or_else(default_handshake_timeout),
    };

    trace!(
        address = %config.address(),
        address_family = %config.address_family,
        handshake_timeout_secs = config.handshake_timeout_secs,
        "Parsed listener configuration"
    );

    Ok(config)
}

/// Parse the `challenge` configuration block
pub fn parse_challenge_config(node: &kdl::KdlNode) -> Result<ChallengeConfig> {
    trace!("Parsing challenge configuration block");
    reject_unknown_fields(node, CHALLENGE_FIELDS)?;

    let key_algorithm = match get_string_entry(node, "key-algorithm") {
        Some(value) => value.parse::<KeyAlgorithm>()?,
        None => KeyAlgorithm::default(),
    };

    let config = ChallengeConfig {
        delay_secs: get_uint_entry(node, "delay-secs")?.unwrap_or(0),
        key_algorithm,
        certificate_validity_secs: get_uint_entry(node, "certificate-validity-secs")?
            .unwrap_or_else(default_certificate_validity),
    };

    trace!(
        delay_secs = config.delay_secs,
        key_algorithm = %config.key_algorithm,
        certificate_validity_secs = config.certificate_validity_secs,
        "Parsed challenge configuration"
    );

    Ok(config)
}

fn reject_unknown_fields(node: &kdl::KdlNode, valid: &[&str]) -> Result<()> {
    for name in child_names(node) {
        if !valid.contains(&name) {
            return Err(anyhow::anyhow!(
                "Unknown field '{}' in '{}' block. Valid fields: {}",
                name,
                node.name().value(),
                valid.join(", ")
            ));
        }
    }
    Ok(())
}
