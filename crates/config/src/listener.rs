//! Challenge listener configuration.
//!
//! Controls where the TLS-ALPN-01 listener binds: interface, port and
//! address family. The defaults match what a certificate authority expects
//! (all interfaces, port 443, IPv4 and IPv6).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

/// Port certificate authorities connect to for TLS-ALPN-01 validation
pub const DEFAULT_TLS_PORT: u16 = 443;

/// Address family used when binding the challenge listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressFamily {
    /// Bind IPv4 only
    #[serde(alias = "tcp4")]
    Ipv4,
    /// Bind IPv6 only (the socket is marked `IPV6_V6ONLY`)
    #[serde(alias = "tcp6")]
    Ipv6,
    /// Accept both IPv4 and IPv6 connections
    #[default]
    #[serde(alias = "tcp")]
    DualStack,
}

impl AddressFamily {
    /// Name used in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "ipv4",
            AddressFamily::Ipv6 => "ipv6",
            AddressFamily::DualStack => "dual-stack",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an address family name is not recognized
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid address family '{0}'. Valid values: ipv4, ipv6, dual-stack")]
pub struct ParseAddressFamilyError(String);

impl FromStr for AddressFamily {
    type Err = ParseAddressFamilyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ipv4" | "tcp4" => Ok(AddressFamily::Ipv4),
            "ipv6" | "tcp6" => Ok(AddressFamily::Ipv6),
            "dual-stack" | "dualstack" | "tcp" => Ok(AddressFamily::DualStack),
            _ => Err(ParseAddressFamilyError(s.to_string())),
        }
    }
}

/// Listener configuration for the TLS-ALPN-01 challenge server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "kebab-case")]
pub struct ListenerConfig {
    /// Interface to bind (IP address or hostname). Empty means all interfaces.
    #[validate(length(max = 253))]
    pub interface: String,

    /// TCP port. `0` lets the operating system pick a free port.
    pub port: u16,

    /// Address family selector
    pub address_family: AddressFamily,

    /// Maximum time a single TLS handshake may take
    #[validate(range(min = 1, max = 300))]
    pub handshake_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            port: DEFAULT_TLS_PORT,
            address_family: AddressFamily::default(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

impl ListenerConfig {
    /// Bind the given interface and port
    pub fn new(interface: impl Into<String>, port: u16) -> Self {
        Self {
            interface: interface.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the address family
    pub fn with_address_family(mut self, family: AddressFamily) -> Self {
        self.address_family = family;
        self
    }

    /// Set the handshake timeout (whole seconds, at least one)
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Handshake timeout as a `Duration`
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// The configured address in `host:port` form.
    ///
    /// IPv6 literals are bracketed. An empty interface yields `:port`.
    pub fn address(&self) -> String {
        let host = self.interface_host();
        if host.contains(':') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// The interface with any surrounding IPv6 brackets removed
    pub fn interface_host(&self) -> &str {
        let iface = self.interface.trim();
        iface
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(iface)
    }
}

pub(crate) fn default_handshake_timeout() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ListenerConfig::default();
        assert_eq!(config.interface, "");
        assert_eq!(config.port, 443);
        assert_eq!(config.address_family, AddressFamily::DualStack);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_address_formatting() {
        assert_eq!(ListenerConfig::default().address(), ":443");
        assert_eq!(ListenerConfig::new("127.0.0.1", 5001).address(), "127.0.0.1:5001");
        assert_eq!(ListenerConfig::new("::1", 443).address(), "[::1]:443");
        assert_eq!(ListenerConfig::new("[::1]", 443).address(), "[::1]:443");
    }

    #[test]
    fn test_address_family_parsing() {
        assert_eq!("ipv4".parse(), Ok(AddressFamily::Ipv4));
        assert_eq!("tcp6".parse(), Ok(AddressFamily::Ipv6));
        assert_eq!("Dual-Stack".parse(), Ok(AddressFamily::DualStack));
        assert_eq!("tcp".parse(), Ok(AddressFamily::DualStack));
        assert!("udp".parse::<AddressFamily>().is_err());
    }

    #[test]
    fn test_address_family_serde() {
        let family: AddressFamily = serde_json::from_str("\"tcp4\"").unwrap();
        assert_eq!(family, AddressFamily::Ipv4);
        assert_eq!(
            serde_json::to_string(&AddressFamily::DualStack).unwrap(),
            "\"dual-stack\""
        );
    }

    #[test]
    fn test_handshake_timeout_is_clamped() {
        let config = ListenerConfig::default().with_handshake_timeout(Duration::from_millis(10));
        assert_eq!(config.handshake_timeout_secs, 1);
    }
}
