//! Startup error taxonomy.
//!
//! Every error that can abort process initialization lives here, carrying
//! enough context to identify the configuration locus that caused it.
//! Runtime failures inside TLS callbacks never surface as these: the data
//! plane degrades instead (default context for SNI, no staple for OCSP).

use openssl::error::ErrorStack;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Config file could not be read at all.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: String,
        source: std::io::Error,
    },

    /// Config file is not valid JSON, or a field has the wrong type.
    #[error("invalid JSON in {path}: {source}")]
    JsonParse {
        path: String,
        source: serde_json::Error,
    },

    /// Config root must be a JSON object.
    #[error("config root is not a JSON object")]
    JsonRootNotObject,

    /// An element of `contexts[]` is not a JSON object.
    #[error("contexts[{index}] is not a JSON object")]
    JsonCtxNotObject { index: usize },

    /// An NPN list contains a non-string element.
    #[error("npn list contains a non-string entry")]
    NpnNonString,

    /// An advertised protocol name does not fit the one-byte length prefix.
    #[error("npn protocol name {name:?} must be 1..=255 bytes long")]
    NpnLength { name: String },

    /// The TLS library was built without protocol-negotiation support
    /// while the config advertises protocols.
    #[error("TLS library lacks protocol negotiation support")]
    NpnNotSupported,

    /// The TLS library was built without SNI support while the config
    /// defines named contexts.
    #[error("TLS library lacks SNI support")]
    SniNotSupported,

    /// ECDH curve short-name did not resolve to a known group.
    #[error("unknown ECDH curve {name:?}")]
    EcdhNotFound { name: String },

    /// Cipher string was rejected by the TLS library.
    #[error("invalid cipher list {list:?}")]
    BadCiphers { list: String, source: ErrorStack },

    /// Certificate file could not be opened.
    #[error("failed to open certificate {path}: {source}")]
    LoadCert {
        path: String,
        source: std::io::Error,
    },

    /// Certificate file did not contain a usable X.509 chain.
    #[error("failed to parse certificate {path}: {detail}")]
    ParseCert { path: String, detail: String },

    /// Private key failed to parse or does not match the leaf certificate.
    #[error("failed to load private key {path}: {detail}")]
    ParseKey { path: String, detail: String },

    /// Front-end or back-end host is not an IPv4/IPv6 literal.
    #[error("{host}:{port} is not an IP literal address")]
    BadAddress { host: String, port: u16 },

    /// A context servername is empty or contains non-ASCII bytes.
    #[error("context servername {name:?} must be non-empty ASCII")]
    BadServername { name: String },

    /// Two contexts share a servername (compared case-insensitively).
    #[error("duplicate context servername {name:?}")]
    DuplicateServername { name: String },

    /// The HTTP helper pool could not be constructed.
    #[error("helper pool setup failed: {0}")]
    HelperPool(String),

    /// Own executable path could not be resolved.
    #[error("failed to resolve executable path: {0}")]
    ExePath(std::io::Error),

    /// Any other TLS library failure during context construction.
    #[error("TLS context setup failed: {0}")]
    Tls(#[from] ErrorStack),
}
