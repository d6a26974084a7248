//! Configuration schema.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits; field order matches the JSON document
//! emitted by `--default-config`, and every scalar has a default so a
//! minimal (even empty) config object is valid.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::net::addr::parse_host_port;

/// Query templates applied when the helper sections omit one. The single
/// `%s` is substituted with the URL-encoded lookup argument.
pub const DEFAULT_SNI_QUERY: &str = "/bud/sni/%s";
pub const DEFAULT_STAPLING_QUERY: &str = "/bud/stapling/%s";

/// Root configuration. Immutable once the loader returns it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of worker processes the supervisor should keep alive.
    pub workers: u32,

    /// Delay in milliseconds before a dead worker is respawned.
    pub restart_timeout: u64,

    /// Logging sinks and level.
    pub log: LogConfig,

    /// TLS front-end listener.
    pub frontend: FrontendConfig,

    /// Plaintext back-end the decrypted streams are piped to.
    pub backend: BackendConfig,

    /// Out-of-band SNI lookup helper.
    pub sni: HelperConfig,

    /// OCSP stapling helper.
    pub stapling: HelperConfig,

    /// Named TLS server identities, matched by SNI.
    pub contexts: Vec<ContextConfig>,

    /// Set by `--daemonize`; never read from the config file.
    #[serde(skip)]
    pub is_daemon: bool,

    /// Set by `--worker`; never read from the config file.
    #[serde(skip)]
    pub is_worker: bool,

    /// Resolved at CLI load time for the supervisor's respawn path.
    #[serde(skip)]
    pub exe_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 1,
            restart_timeout: 250,
            log: LogConfig::default(),
            frontend: FrontendConfig::default(),
            backend: BackendConfig::default(),
            sni: HelperConfig::with_query(DEFAULT_SNI_QUERY),
            stapling: HelperConfig::with_query(DEFAULT_STAPLING_QUERY),
            contexts: Vec::new(),
            is_daemon: false,
            is_worker: false,
            exe_path: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum level: trace, debug, info, warn, error.
    pub level: String,

    /// Syslog facility keyword (user, daemon, local0..local7, ...).
    pub facility: String,

    /// Emit human-readable lines on stdout.
    pub stdio: bool,

    /// Mirror events to the local syslog daemon.
    pub syslog: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            facility: "user".to_string(),
            stdio: true,
            syslog: false,
        }
    }
}

/// TLS front-end listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FrontendConfig {
    pub port: u16,
    pub host: String,

    /// Prefix every back-end connection with a PROXY-protocol v1 line.
    pub proxyline: bool,

    /// Protocol selector: "tls1.0", "tls1.1", "tls1.2", "ssl3" pin that
    /// version; anything else negotiates.
    pub security: String,

    /// ECDH curve short-name for the default context.
    pub ecdh: String,

    /// TCP keepalive in seconds; 0 disables.
    pub keepalive: u64,

    /// Prefer the server's cipher order during negotiation.
    pub server_preference: bool,

    /// Allow SSLv3 clients.
    pub ssl3: bool,

    /// Certificate chain for the default context, leaf first.
    pub cert: String,

    /// Private key for the default context.
    pub key: String,

    /// Renegotiation counting window in seconds.
    pub reneg_window: u64,

    /// Renegotiations tolerated per window before the client is dropped.
    pub reneg_limit: u32,

    /// Protocols advertised during negotiation, most-preferred first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npn: Option<Vec<String>>,

    /// Cipher string for the default context; library default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ciphers: Option<String>,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            port: 1443,
            host: "0.0.0.0".to_string(),
            proxyline: false,
            security: "ssl23".to_string(),
            ecdh: "prime256v1".to_string(),
            keepalive: 3600,
            server_preference: true,
            ssl3: false,
            cert: "keys/cert.pem".to_string(),
            key: "keys/key.pem".to_string(),
            reneg_window: 600,
            reneg_limit: 3,
            npn: None,
            ciphers: None,
        }
    }
}

/// Plaintext back-end configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub port: u16,
    pub host: String,

    /// TCP keepalive in seconds; 0 disables.
    pub keepalive: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            host: "127.0.0.1".to_string(),
            keepalive: 3600,
        }
    }
}

/// An out-of-band HTTP helper (SNI lookup or OCSP stapling).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HelperConfig {
    pub enabled: bool,
    pub port: u16,
    pub host: String,

    /// Query template with exactly one `%s` placeholder. Left empty by
    /// deserialization when absent; the loader fills the per-section
    /// default afterwards.
    pub query: String,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9000,
            host: "127.0.0.1".to_string(),
            query: String::new(),
        }
    }
}

impl HelperConfig {
    pub fn with_query(query: &str) -> Self {
        Self {
            query: query.to_string(),
            ..Self::default()
        }
    }
}

/// A named TLS server identity selected by SNI.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextConfig {
    /// Host name this context serves. Normalized to lowercase ASCII at
    /// load time; matched case-insensitively against the ClientHello.
    pub servername: String,

    /// Certificate chain, leaf first.
    pub cert: String,

    /// Private key for the leaf.
    pub key: String,

    /// Per-context cipher string; falls back to `frontend.ciphers`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphers: Option<String>,

    /// Per-context ECDH curve; falls back to `frontend.ecdh`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecdh: Option<String>,

    /// Per-context protocol list; falls back to `frontend.npn`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npn: Option<Vec<String>>,
}

/// Front-end and back-end socket addresses, resolved without DNS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddresses {
    pub frontend: SocketAddr,
    pub backend: SocketAddr,
}

impl Config {
    /// Resolve the front-end and back-end addresses. Both hosts must be
    /// IP literals; this is the only place the address parser runs.
    pub fn bind_addresses(&self) -> Result<BoundAddresses, Error> {
        Ok(BoundAddresses {
            frontend: parse_host_port(&self.frontend.host, self.frontend.port)?,
            backend: parse_host_port(&self.backend.host, self.backend.port)?,
        })
    }
}

/// Render the default configuration as pretty-printed JSON, the exact
/// document `--default-config` prints.
pub fn default_json() -> String {
    // Config serializes infallibly: no maps with non-string keys, no
    // non-finite floats.
    serde_json::to_string_pretty(&Config::default())
        .unwrap_or_else(|_| String::from("{}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_match_contract() {
        let config = Config::default();
        assert_eq!(config.workers, 1);
        assert_eq!(config.restart_timeout, 250);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.facility, "user");
        assert!(config.log.stdio);
        assert!(!config.log.syslog);
        assert_eq!(config.frontend.port, 1443);
        assert_eq!(config.frontend.host, "0.0.0.0");
        assert!(!config.frontend.proxyline);
        assert_eq!(config.frontend.security, "ssl23");
        assert_eq!(config.frontend.ecdh, "prime256v1");
        assert_eq!(config.frontend.keepalive, 3600);
        assert!(config.frontend.server_preference);
        assert!(!config.frontend.ssl3);
        assert_eq!(config.frontend.cert, "keys/cert.pem");
        assert_eq!(config.frontend.key, "keys/key.pem");
        assert_eq!(config.frontend.reneg_window, 600);
        assert_eq!(config.frontend.reneg_limit, 3);
        assert_eq!(config.backend.port, 8000);
        assert_eq!(config.backend.host, "127.0.0.1");
        assert_eq!(config.backend.keepalive, 3600);
        assert!(!config.sni.enabled);
        assert_eq!(config.sni.port, 9000);
        assert_eq!(config.sni.host, "127.0.0.1");
        assert_eq!(config.sni.query, "/bud/sni/%s");
        assert!(!config.stapling.enabled);
        assert_eq!(config.stapling.port, 9000);
        assert_eq!(config.stapling.host, "127.0.0.1");
        assert_eq!(config.stapling.query, "/bud/stapling/%s");
        assert!(config.contexts.is_empty());
    }

    #[test]
    fn default_json_shape() {
        let doc: serde_json::Value = serde_json::from_str(&default_json()).unwrap();
        assert_eq!(doc["workers"], 1);
        assert_eq!(doc["frontend"]["port"], 1443);
        assert_eq!(doc["backend"]["port"], 8000);
        assert_eq!(doc["contexts"], serde_json::json!([]));
        // Unset optionals must not appear in the printed document.
        assert!(doc["frontend"].get("npn").is_none());
        assert!(doc["frontend"].get("ciphers").is_none());
        // CLI flags never leak into the JSON surface.
        assert!(doc.get("is_worker").is_none());
        assert!(doc.get("exe_path").is_none());
    }

    #[test]
    fn bind_addresses_rejects_hostnames() {
        let mut config = Config::default();
        config.frontend.host = "localhost".to_string();
        assert!(matches!(
            config.bind_addresses(),
            Err(Error::BadAddress { .. })
        ));
    }

    #[test]
    fn bind_addresses_resolves_literals() {
        let config = Config::default();
        let addrs = config.bind_addresses().unwrap();
        assert_eq!(addrs.frontend.port(), 1443);
        assert_eq!(addrs.backend.port(), 8000);
        assert!(addrs.frontend.is_ipv4());
    }
}
