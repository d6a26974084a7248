//! TLS context management.
//!
//! # Data Flow
//! ```text
//! Config
//!     → context.rs (one SslContext per server identity, default first)
//!     → sni.rs (servername callback: async result > local match > default)
//!     → ocsp.rs (CertID/base64/responder-URL derivations, staple cache)
//!
//! Incoming handshake
//!     → hello.rs (pre-handshake SNI peek for the async paths)
//!     → servername callback (context switch)
//!     → status callback (install prefetched OCSP staple)
//! ```
//!
//! # Design Decisions
//! - Contexts are built before the listener is armed and never mutated
//!   afterwards; memoized OCSP fields use write-once cells
//! - Session resumption is disabled: workers share the listening socket
//!   and a per-worker session cache would misroute resumptions
//! - Callbacks never block; anything that needs the network runs before
//!   the handshake is driven

pub mod chain;
pub mod context;
pub mod hello;
pub mod npn;
pub mod ocsp;
pub mod sni;

pub use context::{Context, ContextSet};

#[cfg(test)]
pub(crate) mod testing {
    //! Throwaway certificate material for tests.

    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use openssl::asn1::Asn1Time;
    use openssl::bn::{BigNum, MsbOption};
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::{PKey, Private};
    use openssl::rsa::Rsa;
    use openssl::x509::extension::BasicConstraints;
    use openssl::x509::{X509Name, X509NameBuilder, X509};

    pub struct TestCert {
        pub cert: X509,
        pub key: PKey<Private>,
    }

    impl TestCert {
        pub fn cert_pem(&self) -> Vec<u8> {
            self.cert.to_pem().unwrap()
        }

        pub fn key_pem(&self) -> Vec<u8> {
            self.key.private_key_to_pem_pkcs8().unwrap()
        }
    }

    fn name(cn: &str) -> X509Name {
        let mut builder = X509NameBuilder::new().unwrap();
        builder.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
        builder.build()
    }

    fn serial() -> openssl::asn1::Asn1Integer {
        let mut bn = BigNum::new().unwrap();
        bn.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
        bn.to_asn1_integer().unwrap()
    }

    /// A self-signed CA certificate.
    pub fn make_ca(cn: &str) -> TestCert {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let subject = name(cn);

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial()).unwrap();
        builder.set_subject_name(&subject).unwrap();
        builder.set_issuer_name(&subject).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(30).unwrap())
            .unwrap();
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        TestCert {
            cert: builder.build(),
            key,
        }
    }

    /// A leaf certificate issued by `ca`.
    pub fn make_leaf(cn: &str, ca: &TestCert) -> TestCert {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial()).unwrap();
        builder.set_subject_name(&name(cn)).unwrap();
        builder
            .set_issuer_name(ca.cert.subject_name())
            .unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(30).unwrap())
            .unwrap();
        builder.sign(&ca.key, MessageDigest::sha256()).unwrap();

        TestCert {
            cert: builder.build(),
            key,
        }
    }

    /// A self-signed leaf (its own issuer).
    pub fn make_self_signed(cn: &str) -> TestCert {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let subject = name(cn);

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial()).unwrap();
        builder.set_subject_name(&subject).unwrap();
        builder.set_issuer_name(&subject).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(30).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        TestCert {
            cert: builder.build(),
            key,
        }
    }

    /// Write bytes to a unique temp file; returns its path.
    pub fn write_temp(label: &str, bytes: &[u8]) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "canopy-test-{}-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed),
            label
        ));
        std::fs::write(&path, bytes).unwrap();
        path
    }
}
