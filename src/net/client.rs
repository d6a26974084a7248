//! Per-connection data plane.
//!
//! ```text
//! accept
//!   → peek ClientHello (tls::hello)
//!   → resolve context: local match | remote SNI helper | default
//!   → prefetch OCSP staple for the serving context
//!   → TLS handshake (servername + status callbacks fire here)
//!   → connect back-end, optional PROXY line, pump bytes both ways
//! ```
//!
//! Helper failures never kill the connection: SNI falls back to the
//! default context and stapling is simply skipped for the handshake.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use openssl::ssl::Ssl;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use crate::config::Config;
use crate::net::proxyline;
use crate::pool::HelperPool;
use crate::tls::context::{Context, ContextSet};
use crate::tls::hello::{read_client_hello, ReplayStream};
use crate::tls::sni::ConnectionTag;
use crate::tls::{ocsp, sni};

/// Time allowed for the ClientHello to arrive.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for the TLS handshake, including callback work.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Worker-wide state every connection shares.
pub struct ConnectionEnv {
    pub config: Arc<Config>,
    pub contexts: Arc<ContextSet>,
    /// Present when at least one helper is enabled.
    pub pool: Option<Arc<HelperPool>>,
    pub backend: SocketAddr,
}

/// Drive one accepted connection to completion.
pub async fn handle(env: Arc<ConnectionEnv>, stream: TcpStream, peer: SocketAddr) {
    let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    if let Err(err) = proxy(env, id, stream, peer).await {
        tracing::debug!(conn = id, peer = %peer, error = %err, "connection closed with error");
    }
}

async fn proxy(
    env: Arc<ConnectionEnv>,
    id: u64,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), BoxError> {
    set_keepalive(&stream, env.config.frontend.keepalive);
    let local = stream.local_addr()?;

    let hello = tokio::time::timeout(HELLO_TIMEOUT, read_client_hello(&mut stream)).await??;

    // Pick the serving context before the handshake so both async paths
    // (remote SNI, staple prefetch) have completed when the callbacks run.
    let mut transient: Option<Arc<Context>> = None;
    let serving: Arc<Context> = match hello.server_name.as_deref() {
        Some(name) => match env.contexts.lookup(name) {
            Some(context) => Arc::clone(context),
            None => match remote_context(&env, name).await {
                Some(context) => {
                    transient = Some(Arc::clone(&context));
                    context
                }
                None => Arc::clone(env.contexts.default_context()),
            },
        },
        None => Arc::clone(env.contexts.default_context()),
    };

    if env.config.stapling.enabled {
        if let Some(pool) = env.pool.as_deref() {
            ocsp::prefetch(&serving, pool, &env.config.stapling).await;
        }
    }

    // Every session starts on the default context; the servername
    // callback switches it, preferring an attached remote result.
    let mut ssl = Ssl::new(env.contexts.default_context().ssl_context())?;
    sni::tag_connection(&mut ssl, ConnectionTag { id, peer })?;
    if let Some(context) = transient {
        sni::attach_result(&mut ssl, context)?;
    }

    let mut tls = SslStream::new(ssl, ReplayStream::new(hello.buffered, stream))?;
    tokio::time::timeout(HANDSHAKE_TIMEOUT, Pin::new(&mut tls).accept()).await??;

    tracing::debug!(
        conn = id,
        peer = %peer,
        version = tls.ssl().version_str(),
        server_name = hello.server_name.as_deref().unwrap_or(""),
        "TLS established"
    );

    let mut backend = TcpStream::connect(env.backend).await?;
    set_keepalive(&backend, env.config.backend.keepalive);

    if env.config.frontend.proxyline {
        backend
            .write_all(proxyline::encode(peer, local).as_bytes())
            .await?;
    }

    let (from_client, from_backend) = tokio::io::copy_bidirectional(&mut tls, &mut backend).await?;
    tracing::debug!(conn = id, from_client, from_backend, "connection finished");
    Ok(())
}

/// Resolve an unknown name through the SNI helper, when enabled.
async fn remote_context(env: &ConnectionEnv, name: &str) -> Option<Arc<Context>> {
    if !env.config.sni.enabled {
        return None;
    }
    let pool = env.pool.as_deref()?;
    sni::resolve_remote(&env.config, &env.contexts, pool, name).await
}

fn set_keepalive(stream: &TcpStream, secs: u64) {
    if secs == 0 {
        return;
    }
    let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(secs));
    if let Err(err) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        tracing::debug!(error = %err, "failed to set TCP keepalive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use crate::tls::testing::{make_ca, make_leaf, make_self_signed, write_temp};
    use openssl::nid::Nid;
    use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
    use openssl::x509::X509Ref;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    fn common_name(cert: &X509Ref) -> String {
        cert.subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string()
    }

    /// Echo server: reads whatever arrives and writes it back.
    async fn start_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while let Ok(n) = sock.read(&mut buf).await {
                        if n == 0 || sock.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    fn test_config(names: &[&str], backend: SocketAddr) -> Config {
        let material = make_self_signed("default.test");
        let mut config = Config::default();
        config.frontend.cert = write_temp("cert.pem", &material.cert_pem())
            .display()
            .to_string();
        config.frontend.key = write_temp("key.pem", &material.key_pem())
            .display()
            .to_string();
        config.backend.host = backend.ip().to_string();
        config.backend.port = backend.port();

        for name in names {
            let ca = make_ca(&format!("{name} CA"));
            let leaf = make_leaf(name, &ca);
            config.contexts.push(ContextConfig {
                servername: name.to_string(),
                cert: write_temp("ctx.pem", &leaf.cert_pem()).display().to_string(),
                key: write_temp("ctx.key", &leaf.key_pem()).display().to_string(),
                ciphers: None,
                ecdh: None,
                npn: None,
            });
        }
        config
    }

    async fn start_proxy(env: Arc<ConnectionEnv>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, peer)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(handle(Arc::clone(&env), stream, peer));
            }
        });
        addr
    }

    async fn tls_connect(
        addr: SocketAddr,
        servername: &str,
    ) -> SslStream<TcpStream> {
        let mut builder = SslConnector::builder(SslMethod::tls()).unwrap();
        builder.set_verify(SslVerifyMode::NONE);
        let connector = builder.build();
        let mut session = connector.configure().unwrap();
        session.set_verify_hostname(false);
        let ssl = session.into_ssl(servername).unwrap();
        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut tls = SslStream::new(ssl, tcp).unwrap();
        Pin::new(&mut tls).connect().await.unwrap();
        tls
    }

    #[tokio::test]
    async fn sni_hit_serves_the_named_certificate() {
        let backend = start_backend().await;
        let config = Arc::new(test_config(&["a.test", "b.test"], backend));
        let contexts = Arc::new(ContextSet::from_config(&config).unwrap());
        let env = Arc::new(ConnectionEnv {
            config,
            contexts,
            pool: None,
            backend,
        });
        let addr = start_proxy(env).await;

        // Case-insensitive: the config says "b.test".
        let mut tls = tls_connect(addr, "B.TEST").await;
        let peer_cert = tls.ssl().peer_certificate().unwrap();
        assert_eq!(common_name(&peer_cert), "b.test");

        tls.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        tls.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn sni_miss_serves_the_default_certificate() {
        let backend = start_backend().await;
        let config = Arc::new(test_config(&["a.test", "b.test"], backend));
        let contexts = Arc::new(ContextSet::from_config(&config).unwrap());
        let env = Arc::new(ConnectionEnv {
            config,
            contexts,
            pool: None,
            backend,
        });
        let addr = start_proxy(env).await;

        let tls = tls_connect(addr, "c.test").await;
        let peer_cert = tls.ssl().peer_certificate().unwrap();
        assert_eq!(common_name(&peer_cert), "default.test");
    }

    #[tokio::test]
    async fn remote_sni_serves_helper_material() {
        let backend = start_backend().await;

        // SNI helper answering with fresh material for any name.
        let remote = make_self_signed("remote.test");
        let body = serde_json::json!({
            "cert": String::from_utf8(remote.cert_pem()).unwrap(),
            "key": String::from_utf8(remote.key_pem()).unwrap(),
        })
        .to_string();
        let helper = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let helper_addr = helper.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = helper.accept().await else {
                    return;
                };
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = sock.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = sock.write_all(response.as_bytes()).await;
                });
            }
        });

        let mut config = test_config(&["a.test"], backend);
        config.sni.enabled = true;
        config.sni.host = helper_addr.ip().to_string();
        config.sni.port = helper_addr.port();
        let config = Arc::new(config);
        let contexts = Arc::new(ContextSet::from_config(&config).unwrap());
        let env = Arc::new(ConnectionEnv {
            config,
            contexts,
            pool: Some(Arc::new(HelperPool::new().unwrap())),
            backend,
        });
        let addr = start_proxy(env).await;

        let tls = tls_connect(addr, "remote.test").await;
        let peer_cert = tls.ssl().peer_certificate().unwrap();
        assert_eq!(common_name(&peer_cert), "remote.test");
    }
}
