//! Terraform go-plugin handshake, server side.
//!
//! Terraform launches the provider with a magic cookie and the protocol
//! versions it speaks in the environment, then reads one line from the
//! provider's stdout describing where to connect:
//!
//! `CORE_PROTOCOL|APP_PROTOCOL|NET_TYPE|NET_ADDR|PROTO_TYPE|SERVER_CERT`

use std::fmt;
use std::net::SocketAddr;
use std::ops::RangeInclusive;

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Magic cookie value required for go-plugin handshake.
pub const MAGIC_COOKIE_KEY: &str = "TF_PLUGIN_MAGIC_COOKIE";
/// Value Terraform sets for [`MAGIC_COOKIE_KEY`].
pub const MAGIC_COOKIE_VALUE: &str =
    "d602bf8f470bc67ca7faa0386276bbdd4330efaf76d1a219cb4d6991ca9872b2";

/// Comma separated app protocol versions offered by Terraform.
pub const PROTOCOL_VERSIONS_KEY: &str = "PLUGIN_PROTOCOL_VERSIONS";
/// Lowest port the plugin may listen on.
pub const MIN_PORT_KEY: &str = "PLUGIN_MIN_PORT";
/// Highest port the plugin may listen on.
pub const MAX_PORT_KEY: &str = "PLUGIN_MAX_PORT";
/// PEM certificate of the Terraform client when AutoMTLS is on.
pub const CLIENT_CERT_KEY: &str = "PLUGIN_CLIENT_CERT";

/// go-plugin core protocol version.
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// Protocol version for tfplugin6.
pub const PROTOCOL_VERSION: u32 = 6;

/// go-plugin settings read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginEnv {
    magic_cookie: Option<String>,
    protocol_versions: Vec<u32>,
    min_port: u16,
    max_port: u16,
    client_cert: Option<String>,
}

impl PluginEnv {
    /// Reads the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a port variable is malformed or the range is empty.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a port variable is malformed or the range is empty.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let min_port = parse_port(MIN_PORT_KEY, lookup(MIN_PORT_KEY))?;
        let max_port = parse_port(MAX_PORT_KEY, lookup(MAX_PORT_KEY))?;
        if min_port > max_port {
            return Err(Error::invalid_environment(
                MIN_PORT_KEY,
                min_port.to_string(),
                format!("greater than {MAX_PORT_KEY} value of {max_port}"),
            ));
        }

        let protocol_versions = lookup(PROTOCOL_VERSIONS_KEY)
            .map(|raw| parse_versions(&raw))
            .unwrap_or_default();

        Ok(Self {
            magic_cookie: lookup(MAGIC_COOKIE_KEY),
            protocol_versions,
            min_port,
            max_port,
            client_cert: lookup(CLIENT_CERT_KEY).filter(|cert| !cert.trim().is_empty()),
        })
    }

    /// Checks that Terraform launched this process.
    ///
    /// # Errors
    ///
    /// Returns an error if the magic cookie is missing or wrong.
    pub fn verify_magic_cookie(&self) -> Result<()> {
        match self.magic_cookie.as_deref() {
            Some(MAGIC_COOKIE_VALUE) => Ok(()),
            _ => Err(Error::MagicCookieMismatch),
        }
    }

    /// Picks the app protocol version to announce.
    ///
    /// Terraform releases that predate version negotiation do not set
    /// `PLUGIN_PROTOCOL_VERSIONS`; they get the provider's version and decide
    /// for themselves.
    ///
    /// # Errors
    ///
    /// Returns an error if Terraform offered versions and 6 is not one of them.
    pub fn negotiate_protocol(&self) -> Result<u32> {
        if self.protocol_versions.is_empty() || self.protocol_versions.contains(&PROTOCOL_VERSION) {
            debug!(offered = ?self.protocol_versions, "Negotiated protocol {PROTOCOL_VERSION}");
            Ok(PROTOCOL_VERSION)
        } else {
            Err(Error::ProtocolMismatch {
                offered: self.protocol_versions.clone(),
                supported: PROTOCOL_VERSION,
            })
        }
    }

    /// Ports the listener may use. `0..=0` lets the OS choose.
    #[must_use]
    pub const fn port_range(&self) -> RangeInclusive<u16> {
        self.min_port..=self.max_port
    }

    /// Terraform's client certificate, PEM encoded.
    #[must_use]
    pub fn client_cert(&self) -> Option<&str> {
        self.client_cert.as_deref()
    }
}

fn parse_port(name: &str, raw: Option<String>) -> Result<u16> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(0),
        Some(value) => value
            .parse()
            .map_err(|e| Error::invalid_environment(name, value, format!("{e}"))),
    }
}

fn parse_versions(raw: &str) -> Vec<u32> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(version) => Some(version),
            Err(_) => {
                warn!(version = s, "Ignoring invalid plugin protocol version");
                None
            }
        })
        .collect()
}

/// The line announced on stdout once the server is listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeLine {
    /// Protocol version agreed upon
    pub protocol_version: u32,

    /// Network address for the gRPC connection
    pub address: SocketAddr,

    /// DER server certificate when AutoMTLS is on
    pub server_cert: Option<Vec<u8>>,
}

impl fmt::Display for HandshakeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{CORE_PROTOCOL_VERSION}|{}|tcp|{}|grpc|",
            self.protocol_version, self.address
        )?;
        if let Some(cert) = &self.server_cert {
            f.write_str(&STANDARD_NO_PAD.encode(cert))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Result<PluginEnv> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        PluginEnv::from_lookup(|key| vars.get(key).cloned())
    }

    // ==========================================================================
    // environment
    // ==========================================================================

    #[test]
    fn test_magic_cookie() {
        let ok = env(&[(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)]).unwrap();
        assert!(ok.verify_magic_cookie().is_ok());

        let missing = env(&[]).unwrap();
        assert!(matches!(
            missing.verify_magic_cookie(),
            Err(Error::MagicCookieMismatch)
        ));

        let wrong = env(&[(MAGIC_COOKIE_KEY, "nope")]).unwrap();
        assert!(wrong.verify_magic_cookie().is_err());
    }

    #[test]
    fn test_negotiate_protocol() {
        let offered = env(&[(PROTOCOL_VERSIONS_KEY, "5,6")]).unwrap();
        assert_eq!(offered.negotiate_protocol().unwrap(), 6);

        let legacy = env(&[]).unwrap();
        assert_eq!(legacy.negotiate_protocol().unwrap(), 6);

        let old = env(&[(PROTOCOL_VERSIONS_KEY, "4, 5")]).unwrap();
        assert!(matches!(
            old.negotiate_protocol(),
            Err(Error::ProtocolMismatch { offered, supported: 6 }) if offered == vec![4, 5]
        ));
    }

    #[test]
    fn test_invalid_versions_are_skipped() {
        let plugin_env = env(&[(PROTOCOL_VERSIONS_KEY, "five,6")]).unwrap();
        assert_eq!(plugin_env.negotiate_protocol().unwrap(), 6);
    }

    #[test]
    fn test_port_range() {
        let default = env(&[]).unwrap();
        assert_eq!(default.port_range(), 0..=0);

        let ranged = env(&[(MIN_PORT_KEY, "10000"), (MAX_PORT_KEY, "25000")]).unwrap();
        assert_eq!(ranged.port_range(), 10000..=25000);

        assert!(env(&[(MIN_PORT_KEY, "20"), (MAX_PORT_KEY, "10")]).is_err());
        assert!(env(&[(MIN_PORT_KEY, "port")]).is_err());
    }

    #[test]
    fn test_blank_client_cert_is_absent() {
        assert!(env(&[(CLIENT_CERT_KEY, "  ")]).unwrap().client_cert().is_none());
        assert_eq!(
            env(&[(CLIENT_CERT_KEY, "-----BEGIN CERTIFICATE-----")])
                .unwrap()
                .client_cert(),
            Some("-----BEGIN CERTIFICATE-----")
        );
    }

    #[test]
    fn test_from_env_reads_process_environment() {
        temp_env::with_vars(
            [
                (MAGIC_COOKIE_KEY, Some(MAGIC_COOKIE_VALUE)),
                (PROTOCOL_VERSIONS_KEY, Some("6")),
                (MIN_PORT_KEY, Some("15000")),
                (MAX_PORT_KEY, Some("15010")),
                (CLIENT_CERT_KEY, None),
            ],
            || {
                let plugin_env = PluginEnv::from_env().unwrap();
                assert!(plugin_env.verify_magic_cookie().is_ok());
                assert_eq!(plugin_env.port_range(), 15000..=15010);
                assert!(plugin_env.client_cert().is_none());
            },
        );
    }

    // ==========================================================================
    // handshake line
    // ==========================================================================

    #[test]
    fn test_handshake_line_without_cert() {
        let line = HandshakeLine {
            protocol_version: 6,
            address: "127.0.0.1:12345".parse().unwrap(),
            server_cert: None,
        };
        assert_eq!(line.to_string(), "1|6|tcp|127.0.0.1:12345|grpc|");
    }

    #[test]
    fn test_handshake_line_cert_is_unpadded_base64() {
        let line = HandshakeLine {
            protocol_version: 6,
            address: "127.0.0.1:12345".parse().unwrap(),
            server_cert: Some(b"somecert".to_vec()),
        };
        let text = line.to_string();
        assert_eq!(text, "1|6|tcp|127.0.0.1:12345|grpc|c29tZWNlcnQ");
    }
}
