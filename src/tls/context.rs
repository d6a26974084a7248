//! TLS context construction.
//!
//! One [`Context`] per configured server identity: the default identity
//! (material from `frontend.cert`/`frontend.key`) at index 0, one per
//! `contexts[]` entry after it. Construction is fatal on the first
//! error; everything built so far is dropped, so a half-initialized set
//! never reaches the listener.

use std::fs;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use once_cell::sync::OnceCell;
use openssl::error::ErrorStack;
use openssl::ocsp::OcspCertId;
use openssl::pkey::PKey;
use openssl::ssl::{
    SslContext, SslContextBuilder, SslContextRef, SslMethod, SslOptions, SslSessionCacheMode,
    SslVersion,
};
use openssl::x509::{X509Ref, X509};

use crate::config::{Config, ContextConfig};
use crate::error::Error;
use crate::tls::ocsp::StapleCache;
use crate::tls::{chain, npn, ocsp, sni};

/// A fully configured TLS server identity.
///
/// The TLS handle and certificates are fixed at construction; only the
/// memoized OCSP fields are written later, at most once each.
pub struct Context {
    ssl: SslContext,
    servername: Option<String>,
    cert: X509,
    issuer: Option<X509>,
    npn_wire: Option<Vec<u8>>,
    ocsp_id: Option<OcspCertId>,
    ocsp_id_b64: OnceCell<String>,
    ocsp_request_der: OnceCell<Vec<u8>>,
    ocsp_url: OnceCell<Option<String>>,
    staple: Arc<StapleCache>,
}

impl Context {
    pub fn ssl_context(&self) -> &SslContextRef {
        &self.ssl
    }

    /// Lowercase server name; `None` for the default context and for
    /// helper-delivered transients built without one.
    pub fn servername(&self) -> Option<&str> {
        self.servername.as_deref()
    }

    pub fn cert(&self) -> &X509Ref {
        &self.cert
    }

    pub fn issuer(&self) -> Option<&X509Ref> {
        self.issuer.as_deref()
    }

    /// Wire-encoded advertised protocol list, when one is configured.
    pub fn npn_wire(&self) -> Option<&[u8]> {
        self.npn_wire.as_deref()
    }

    /// Whether a CertID could be derived (issuer present and the
    /// digest succeeded). Contexts without one never staple.
    pub fn has_ocsp_id(&self) -> bool {
        self.ocsp_id.is_some()
    }

    pub(crate) fn staple_cache(&self) -> &Arc<StapleCache> {
        &self.staple
    }

    /// DER of the single-id OCSP request for this context, memoized on
    /// first success. A zero-length encoding counts as failure and is
    /// not cached.
    fn ocsp_request_der(&self) -> Option<&[u8]> {
        self.ocsp_id.as_ref()?;
        let issuer = self.issuer.as_ref()?;
        self.ocsp_request_der
            .get_or_try_init(|| {
                let der = ocsp::encode_request(&self.cert, issuer)?;
                if der.is_empty() {
                    return Err(ErrorStack::get());
                }
                Ok(der)
            })
            .ok()
            .map(Vec::as_slice)
    }

    /// Stable base64 key for this context's CertID, memoized. Used to
    /// deduplicate stapling requests and cache entries across workers.
    pub fn ocsp_id_base64(&self) -> Option<&str> {
        let der = self.ocsp_request_der()?;
        Some(self.ocsp_id_b64.get_or_init(|| BASE64.encode(der)))
    }

    /// OCSP responder URL from the leaf's AIA extension, memoized.
    /// The first advertised URL wins; the rest are discarded.
    pub fn ocsp_responder_url(&self) -> Option<&str> {
        self.ocsp_url
            .get_or_init(|| ocsp::responder_url(&self.cert))
            .as_deref()
    }

    /// Responder URL plus a fresh copy of the encoded request; the
    /// caller owns the returned bytes.
    pub fn ocsp_request(&self) -> Option<(String, Vec<u8>)> {
        let url = self.ocsp_responder_url()?.to_string();
        let der = self.ocsp_request_der()?.to_vec();
        Some((url, der))
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("servername", &self.servername)
            .field("issuer", &self.issuer.is_some())
            .field("staplable", &self.ocsp_id.is_some())
            .finish()
    }
}

/// The contexts visible to the servername callback.
///
/// Callbacks are registered while the contexts are still being built,
/// so they capture this table and the set publishes into it once every
/// identity is up.
#[derive(Debug)]
pub(crate) struct ContextTable {
    contexts: OnceCell<Vec<Arc<Context>>>,
}

impl ContextTable {
    fn new() -> Self {
        Self {
            contexts: OnceCell::new(),
        }
    }

    pub(crate) fn contexts(&self) -> &[Arc<Context>] {
        self.contexts.get().map(Vec::as_slice).unwrap_or(&[])
    }

    fn publish(&self, contexts: Vec<Arc<Context>>) {
        // The table is created fresh by `ContextSet::from_config` and
        // published exactly once.
        let _ = self.contexts.set(contexts);
    }
}

/// The default context plus every configured identity, in config order.
#[derive(Debug)]
pub struct ContextSet {
    contexts: Vec<Arc<Context>>,
    table: Arc<ContextTable>,
}

impl ContextSet {
    /// Build every context the config names. Any failure drops the
    /// partially built set before returning.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let table = Arc::new(ContextTable::new());
        let mut contexts = Vec::with_capacity(config.contexts.len() + 1);

        contexts.push(Arc::new(build_from_files(config, None, &table)?));
        for ctx_config in &config.contexts {
            contexts.push(Arc::new(build_from_files(config, Some(ctx_config), &table)?));
        }

        table.publish(contexts.clone());
        Ok(Self { contexts, table })
    }

    pub fn default_context(&self) -> &Arc<Context> {
        &self.contexts[0]
    }

    pub fn contexts(&self) -> &[Arc<Context>] {
        &self.contexts
    }

    /// Local SNI match; `None` when no configured identity matches.
    pub fn lookup(&self, servername: &str) -> Option<&Arc<Context>> {
        sni::lookup(&self.contexts, servername)
    }

    /// Local SNI selection with the default-context fallback.
    pub fn select(&self, servername: &str) -> &Arc<Context> {
        self.lookup(servername).unwrap_or(self.default_context())
    }

    pub(crate) fn table(&self) -> &Arc<ContextTable> {
        &self.table
    }
}

/// Certificate material plus per-identity overrides for one context.
pub(crate) struct ContextParams<'a> {
    pub servername: Option<&'a str>,
    pub cert_pem: &'a [u8],
    pub cert_origin: &'a str,
    pub key_pem: &'a [u8],
    pub key_origin: &'a str,
    pub ciphers: Option<&'a str>,
    pub ecdh: Option<&'a str>,
    pub npn: Option<&'a [String]>,
}

fn build_from_files(
    config: &Config,
    ctx_config: Option<&ContextConfig>,
    table: &Arc<ContextTable>,
) -> Result<Context, Error> {
    let (cert_path, key_path) = match ctx_config {
        Some(c) => (c.cert.as_str(), c.key.as_str()),
        None => (config.frontend.cert.as_str(), config.frontend.key.as_str()),
    };

    let cert_pem = fs::read(cert_path).map_err(|source| Error::LoadCert {
        path: cert_path.to_string(),
        source,
    })?;
    let key_pem = fs::read(key_path).map_err(|source| Error::ParseKey {
        path: key_path.to_string(),
        detail: source.to_string(),
    })?;

    build_context(
        config,
        ContextParams {
            servername: ctx_config.map(|c| c.servername.as_str()),
            cert_pem: &cert_pem,
            cert_origin: cert_path,
            key_pem: &key_pem,
            key_origin: key_path,
            ciphers: ctx_config.and_then(|c| c.ciphers.as_deref()),
            ecdh: ctx_config.and_then(|c| c.ecdh.as_deref()),
            npn: ctx_config.and_then(|c| c.npn.as_deref()),
        },
        table,
    )
}

/// Build a single context: protocol pin, cache mode, curve, ciphers,
/// options, callbacks, chain and key, then the OCSP derivation inputs.
pub(crate) fn build_context(
    config: &Config,
    params: ContextParams<'_>,
    table: &Arc<ContextTable>,
) -> Result<Context, Error> {
    let mut builder = SslContext::builder(SslMethod::tls_server())?;

    pin_protocol_version(&mut builder, &config.frontend.security)?;

    // Workers share the listening socket, so a per-worker session cache
    // would misroute resumption attempts. Resumption is unsupported.
    builder.set_session_cache_mode(SslSessionCacheMode::OFF);

    let curve = params.ecdh.unwrap_or(&config.frontend.ecdh);
    builder
        .set_groups_list(curve)
        .map_err(|_| Error::EcdhNotFound {
            name: curve.to_string(),
        })?;

    if let Some(list) = params.ciphers.or(config.frontend.ciphers.as_deref()) {
        builder
            .set_cipher_list(list)
            .map_err(|source| Error::BadCiphers {
                list: list.to_string(),
                source,
            })?;
    }

    let mut options = SslOptions::NO_SSLV2 | SslOptions::ALL;
    if !config.frontend.ssl3 {
        options |= SslOptions::NO_SSLV3;
    }
    if config.frontend.server_preference {
        options |= SslOptions::CIPHER_SERVER_PREFERENCE;
    }
    builder.set_options(options);

    // Registered for configured identities and for the remote lookup:
    // asynchronously resolved contexts enter the handshake through this
    // callback too.
    if !config.contexts.is_empty() || config.sni.enabled {
        sni::register_callback(&mut builder, Arc::clone(table))?;
    }

    let npn_names = params.npn.or(config.frontend.npn.as_deref());
    let npn_wire = match npn_names {
        Some(names) => npn::encode_protocol_list(names)?,
        None => None,
    };
    if let Some(wire) = &npn_wire {
        npn::register(&mut builder, wire.clone())?;
    }

    let staple = Arc::new(StapleCache::new());
    builder.set_status_callback(ocsp::status_callback(Arc::clone(&staple)))?;

    let loaded = chain::install_chain(&mut builder, params.cert_pem, params.cert_origin)?;

    let key_err = |detail: String| Error::ParseKey {
        path: params.key_origin.to_string(),
        detail,
    };
    let key = PKey::private_key_from_pem(params.key_pem).map_err(|e| key_err(e.to_string()))?;
    builder
        .set_private_key(&key)
        .map_err(|e| key_err(e.to_string()))?;
    builder
        .check_private_key()
        .map_err(|e| key_err(e.to_string()))?;

    let ssl = builder.build();

    let issuer = loaded
        .issuer
        .or_else(|| chain::issuer_from_store(ssl.cert_store(), &loaded.leaf));

    // A context only staples when both the issuer and the CertID digest
    // are available; a derivation failure demotes it to non-staplable.
    let (issuer, ocsp_id) = match issuer {
        Some(issuer) => match ocsp::cert_id(&loaded.leaf, &issuer) {
            Ok(id) => (Some(issuer), Some(id)),
            Err(err) => {
                tracing::warn!(
                    cert = params.cert_origin,
                    error = %err,
                    "failed to derive OCSP CertID; stapling disabled for this context"
                );
                (None, None)
            }
        },
        None => (None, None),
    };

    Ok(Context {
        ssl,
        servername: params.servername.map(str::to_string),
        cert: loaded.leaf,
        issuer,
        npn_wire,
        ocsp_id,
        ocsp_id_b64: OnceCell::new(),
        ocsp_request_der: OnceCell::new(),
        ocsp_url: OnceCell::new(),
        staple,
    })
}

/// Map the `security` selector onto protocol version pins. Unknown
/// values (including "ssl23") leave the full negotiation range open.
fn pin_protocol_version(builder: &mut SslContextBuilder, security: &str) -> Result<(), ErrorStack> {
    let pinned = match security {
        "tls1.0" => Some(SslVersion::TLS1),
        "tls1.1" => Some(SslVersion::TLS1_1),
        "tls1.2" => Some(SslVersion::TLS1_2),
        "ssl3" => Some(SslVersion::SSL3),
        _ => None,
    };
    builder.set_min_proto_version(pinned)?;
    builder.set_max_proto_version(pinned)
}
