//! Certificate chain loading.
//!
//! A cert file is one or more PEM blocks, leaf first. The leaf becomes
//! the context certificate; every following block is appended to the
//! context's extra chain, and the first one that actually issued the
//! leaf is recorded as the issuer for OCSP CertID derivation. When the
//! file carries no issuer, the context's trust store is consulted as a
//! fallback.

use openssl::ssl::SslContextBuilder;
use openssl::x509::store::X509StoreRef;
use openssl::x509::{X509Ref, X509VerifyResult, X509};

use crate::error::Error;

/// Outcome of draining a PEM chain into a context builder.
#[derive(Debug)]
pub struct LoadedChain {
    /// The first certificate of the stream.
    pub leaf: X509,
    /// The chain certificate that issued the leaf, if any was present.
    pub issuer: Option<X509>,
}

/// Install a PEM chain into the context under construction.
///
/// `origin` only labels errors (the cert path, or the lookup name for
/// helper-delivered material).
pub fn install_chain(
    builder: &mut SslContextBuilder,
    pem: &[u8],
    origin: &str,
) -> Result<LoadedChain, Error> {
    let parse_err = |detail: String| Error::ParseCert {
        path: origin.to_string(),
        detail,
    };

    let mut certs = X509::stack_from_pem(pem).map_err(|e| parse_err(e.to_string()))?;
    if certs.is_empty() {
        return Err(parse_err("no certificates found".to_string()));
    }

    let leaf = certs.remove(0);
    builder
        .set_certificate(&leaf)
        .map_err(|e| parse_err(e.to_string()))?;

    let mut issuer = None;
    for ca in certs {
        if issuer.is_none() && ca.issued(&leaf) == X509VerifyResult::OK {
            // The extra-chain list takes ownership of the handle below;
            // the recorded issuer keeps a reference of its own.
            issuer = Some(ca.clone());
        }
        builder
            .add_extra_chain_cert(ca)
            .map_err(|e| parse_err(e.to_string()))?;
    }

    Ok(LoadedChain { leaf, issuer })
}

/// Look for a certificate in the trust store that issued `leaf`.
///
/// The store retains its own reference; the returned handle is a fresh
/// one for the caller.
pub fn issuer_from_store(store: &X509StoreRef, leaf: &X509Ref) -> Option<X509> {
    store
        .all_certificates()
        .iter()
        .find(|candidate| candidate.issued(leaf) == X509VerifyResult::OK)
        .map(|candidate| candidate.to_owned())
}
