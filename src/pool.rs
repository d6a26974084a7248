//! HTTP helper pool.
//!
//! Both out-of-band lookups (SNI material, OCSP responses) go through
//! this client. The contract: `get(host, port, query_fmt, argument)`
//! substitutes the single `%s` in the template with the URL-encoded
//! argument, applies a per-request timeout, and deduplicates so at most
//! one request per formatted query is in flight at a time; concurrent
//! callers share the winner's result.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("helper request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("helper answered {0}")]
    Status(reqwest::StatusCode),

    /// A joined in-flight request failed; carries the winner's error text.
    #[error("helper request failed: {0}")]
    Upstream(String),

    /// The in-flight request this caller joined never produced a result.
    #[error("in-flight helper request was abandoned")]
    Abandoned,
}

/// What joiners of an in-flight request receive.
type SharedResult = Result<Vec<u8>, String>;

pub struct HelperPool {
    client: reqwest::Client,
    inflight: DashMap<String, broadcast::Sender<SharedResult>>,
}

impl HelperPool {
    pub fn new() -> Result<Self, PoolError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            inflight: DashMap::new(),
        })
    }

    /// Fetch `query_fmt % argument` from the helper. The response body
    /// is opaque here; the caller picks the decoder.
    pub async fn get(
        &self,
        host: &str,
        port: u16,
        query_fmt: &str,
        argument: &str,
    ) -> Result<Vec<u8>, PoolError> {
        let url = format!("http://{}:{}{}", host, port, format_query(query_fmt, argument));

        let sender = match self.inflight.entry(url.clone()) {
            Entry::Occupied(entry) => {
                // Someone is already asking; wait for their answer. The
                // map guard must not be held across the await.
                let mut rx = entry.get().subscribe();
                drop(entry);
                return match rx.recv().await {
                    Ok(Ok(body)) => Ok(body),
                    Ok(Err(detail)) => Err(PoolError::Upstream(detail)),
                    Err(_) => Err(PoolError::Abandoned),
                };
            }
            Entry::Vacant(entry) => {
                let (tx, _) = broadcast::channel(1);
                entry.insert(tx.clone());
                tx
            }
        };

        let result = self.fetch(&url).await;

        // Unregister before broadcasting so late arrivals start a fresh
        // request instead of waiting on a closed channel.
        self.inflight.remove(&url);
        let shared: SharedResult = match &result {
            Ok(body) => Ok(body.clone()),
            Err(err) => Err(err.to_string()),
        };
        let _ = sender.send(shared);

        result
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PoolError> {
        tracing::debug!(url, "helper request");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PoolError::Status(status));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Substitute the single `%s` placeholder with the URL-encoded argument.
fn format_query(query_fmt: &str, argument: &str) -> String {
    query_fmt.replacen("%s", &urlencoding::encode(argument), 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn formats_and_encodes_the_argument() {
        assert_eq!(
            format_query("/bud/sni/%s", "example.com"),
            "/bud/sni/example.com"
        );
        assert_eq!(format_query("/bud/sni/%s", "a b+c"), "/bud/sni/a%20b%2Bc");
        // Only the first placeholder is substituted.
        assert_eq!(format_query("/%s/%s", "x"), "/x/%s");
    }

    /// Serve every connection a fixed body after a short delay, counting
    /// connections.
    async fn start_server(
        body: &'static str,
        status: &'static str,
    ) -> (u16, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let server_hits = Arc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                server_hits.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = sock.read(&mut buf).await;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    let response = format!(
                        "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = sock.write_all(response.as_bytes()).await;
                });
            }
        });

        (port, hits)
    }

    #[tokio::test]
    async fn concurrent_identical_queries_share_one_request() {
        let (port, hits) = start_server("ok", "200 OK").await;
        let pool = Arc::new(HelperPool::new().unwrap());

        let first = {
            let pool = Arc::clone(&pool);
            tokio::spawn(
                async move { pool.get("127.0.0.1", port, "/bud/stapling/%s", "key").await },
            )
        };
        let second = {
            let pool = Arc::clone(&pool);
            tokio::spawn(
                async move { pool.get("127.0.0.1", port, "/bud/stapling/%s", "key").await },
            )
        };

        assert_eq!(first.await.unwrap().unwrap(), b"ok");
        assert_eq!(second.await.unwrap().unwrap(), b"ok");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_arguments_do_not_share() {
        let (port, hits) = start_server("ok", "200 OK").await;
        let pool = Arc::new(HelperPool::new().unwrap());

        let first = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get("127.0.0.1", port, "/bud/sni/%s", "a.test").await })
        };
        let second = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get("127.0.0.1", port, "/bud/sni/%s", "b.test").await })
        };

        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (port, _hits) = start_server("nope", "404 Not Found").await;
        let pool = HelperPool::new().unwrap();
        let err = pool
            .get("127.0.0.1", port, "/bud/sni/%s", "missing.test")
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Status(status) if status.as_u16() == 404));
    }

    #[tokio::test]
    async fn unreachable_helper_is_an_error() {
        let pool = HelperPool::new().unwrap();
        // Port 1 on localhost: nothing listens there.
        let err = pool.get("127.0.0.1", 1, "/bud/sni/%s", "x").await;
        assert!(err.is_err());
    }
}
