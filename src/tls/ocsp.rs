//! OCSP stapling state.
//!
//! Per-context derivations (CertID, its base64 key, the responder URL
//! from the leaf's AIA extension, the encoded OCSP request) plus the
//! fetch state machine feeding the TLS status callback.
//!
//! ```text
//! Unknown ──▶ Fetching ──▶ Valid(response, expiry)
//!                │              │ (expiry passes)
//!                ▼              ▼
//!             Failed ──────▶ Fetching
//! ```
//!
//! The status callback itself never touches the network: it installs
//! whatever the cache holds. Fetches run on the data plane before the
//! handshake is driven, deduplicated by the helper pool on the base64
//! CertID key.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::ocsp::{OcspCertId, OcspRequest, OcspResponse, OcspResponseStatus};
use openssl::ssl::SslRef;
use openssl::x509::X509Ref;

use crate::config::HelperConfig;
use crate::pool::HelperPool;
use crate::tls::context::Context;

/// How long a fetched response is served before a refresh is attempted.
const STAPLE_TTL: Duration = Duration::from_secs(3600);

/// Derive the OCSP CertID for a leaf/issuer pair.
pub(crate) fn cert_id(cert: &X509Ref, issuer: &X509Ref) -> Result<OcspCertId, ErrorStack> {
    OcspCertId::from_cert(MessageDigest::sha1(), cert, issuer)
}

/// DER-encode a single-id OCSP request for the pair.
///
/// The encoding is a pure function of the CertID, which makes it usable
/// both as the request body and (base64ed) as the fleet-wide dedup key.
pub(crate) fn encode_request(cert: &X509Ref, issuer: &X509Ref) -> Result<Vec<u8>, ErrorStack> {
    let id = cert_id(cert, issuer)?;
    let mut request = OcspRequest::new()?;
    request.add_id(id)?;
    request.to_der()
}

/// First OCSP responder URL from the certificate's AIA extension.
pub(crate) fn responder_url(cert: &X509Ref) -> Option<String> {
    let aia = cert.authority_info()?;
    aia.iter()
        .filter(|access| access.method().nid() == Nid::AD_OCSP)
        .filter_map(|access| access.location().uri())
        .map(str::to_string)
        .next()
}

#[derive(Debug)]
enum StapleState {
    Unknown,
    Fetching,
    Valid { response: Vec<u8>, expires: Instant },
    Failed,
}

/// Per-context staple cache shared between the data plane (writer) and
/// the status callback (reader).
#[derive(Debug)]
pub struct StapleCache {
    state: Mutex<StapleState>,
}

impl StapleCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StapleState::Unknown),
        }
    }

    /// The response to staple right now, if a fresh one is cached.
    pub fn staple(&self) -> Option<Vec<u8>> {
        let state = self.state.lock().ok()?;
        match &*state {
            StapleState::Valid { response, expires } if *expires > Instant::now() => {
                Some(response.clone())
            }
            _ => None,
        }
    }

    /// Whether the caller should run (or join) a helper fetch. Moves the
    /// entry to `Fetching` unless a fresh response is already cached;
    /// concurrent callers coalesce on the helper pool's in-flight dedup.
    pub fn needs_fetch(&self) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        match &*state {
            StapleState::Valid { expires, .. } if *expires > Instant::now() => false,
            _ => {
                *state = StapleState::Fetching;
                true
            }
        }
    }

    /// Record the fetch outcome.
    pub fn complete(&self, response: Option<Vec<u8>>) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        *state = match response {
            Some(response) => StapleState::Valid {
                response,
                expires: Instant::now() + STAPLE_TTL,
            },
            None => StapleState::Failed,
        };
    }
}

impl Default for StapleCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The certificate-status callback registered on every context.
///
/// Runs inside the handshake, so it only reads the cache; Ok(false)
/// means "no staple for this handshake".
pub(crate) fn status_callback(
    cache: Arc<StapleCache>,
) -> impl Fn(&mut SslRef) -> Result<bool, ErrorStack> + Send + Sync + 'static {
    move |ssl| match cache.staple() {
        Some(response) => {
            ssl.set_ocsp_status(&response)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Fetch the context's OCSP response through the stapling helper if the
/// cache needs one. Runs on the data plane before the handshake; any
/// failure leaves the handshake unstapled.
pub async fn prefetch(context: &Context, pool: &HelperPool, helper: &HelperConfig) {
    if !helper.enabled {
        return;
    }
    let Some(key) = context.ocsp_id_base64() else {
        // No issuer or no CertID: this context does not staple.
        return;
    };
    if !context.staple_cache().needs_fetch() {
        return;
    }

    match pool.get(&helper.host, helper.port, &helper.query, key).await {
        Ok(body) if successful_response(&body) => {
            tracing::debug!(key, bytes = body.len(), "cached OCSP response");
            context.staple_cache().complete(Some(body));
        }
        Ok(_) => {
            tracing::warn!(key, "stapling helper returned an unusable OCSP response");
            context.staple_cache().complete(None);
        }
        Err(err) => {
            tracing::warn!(key, error = %err, "stapling helper request failed");
            context.staple_cache().complete(None);
        }
    }
}

/// A response is cacheable only when it decodes as a successful OCSP
/// response; anything else is stapled to no one.
fn successful_response(der: &[u8]) -> bool {
    OcspResponse::from_der(der)
        .map(|response| response.status() == OcspResponseStatus::SUCCESSFUL)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::testing::{make_ca, make_leaf};

    #[test]
    fn request_encoding_is_stable() {
        let ca = make_ca("OCSP CA");
        let leaf = make_leaf("ocsp.test", &ca);

        let first = encode_request(&leaf.cert, &ca.cert).unwrap();
        let second = encode_request(&leaf.cert, &ca.cert).unwrap();
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn cert_id_derives_for_issued_pair() {
        let ca = make_ca("OCSP CA");
        let leaf = make_leaf("ocsp.test", &ca);
        assert!(cert_id(&leaf.cert, &ca.cert).is_ok());
    }

    #[test]
    fn no_aia_means_no_responder() {
        let ca = make_ca("OCSP CA");
        let leaf = make_leaf("ocsp.test", &ca);
        assert!(responder_url(&leaf.cert).is_none());
    }

    #[test]
    fn cache_starts_unknown() {
        let cache = StapleCache::new();
        assert!(cache.staple().is_none());
        assert!(cache.needs_fetch());
    }

    #[test]
    fn successful_fetch_serves_until_expiry() {
        let cache = StapleCache::new();
        assert!(cache.needs_fetch());
        cache.complete(Some(b"response".to_vec()));
        assert_eq!(cache.staple().unwrap(), b"response");
        assert!(!cache.needs_fetch());
    }

    #[test]
    fn failed_fetch_staples_nothing_and_retries() {
        let cache = StapleCache::new();
        assert!(cache.needs_fetch());
        cache.complete(None);
        assert!(cache.staple().is_none());
        assert!(cache.needs_fetch());
    }

    #[test]
    fn expired_response_triggers_refetch() {
        let cache = StapleCache::new();
        if let Some(past) = Instant::now().checked_sub(Duration::from_secs(1)) {
            *cache.state.lock().unwrap() = StapleState::Valid {
                response: b"stale".to_vec(),
                expires: past,
            };
            assert!(cache.staple().is_none());
            assert!(cache.needs_fetch());
        }
    }

    #[test]
    fn garbage_is_not_a_successful_response() {
        assert!(!successful_response(b"definitely not der"));
    }
}
