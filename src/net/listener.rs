//! Front-end TCP listener with backpressure.
//!
//! # Responsibilities
//! - Bind the front-end address resolved by the config
//! - Accept incoming TCP connections
//! - Bound concurrent connections via a semaphore
//!
//! The address must already be resolved (see `net::addr`); no name
//! lookup happens here.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

/// Upper bound on concurrent front-end connections per worker.
const MAX_CONNECTIONS: usize = 10_000;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to the front-end address.
    Bind(SocketAddr, std::io::Error),
    /// Failed to accept a connection.
    Accept(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(addr, e) => write!(f, "failed to bind {}: {}", addr, e),
            ListenerError::Accept(e) => write!(f, "failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// A bounded TCP listener.
///
/// When the connection limit is reached, accepting waits until a slot
/// frees up instead of letting the backlog grow without bound.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, ListenerError> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|e| ListenerError::Bind(addr, e))?;
        let local = inner.local_addr().map_err(|e| ListenerError::Bind(addr, e))?;

        tracing::info!(address = %local, "front-end listener bound");

        Ok(Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        })
    }

    /// Accept a connection. The returned permit must live as long as
    /// the connection; dropping it releases the slot.
    pub async fn accept(
        &self,
    ) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| {
                ListenerError::Accept(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "connection limiter closed",
                ))
            })?;

        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer = %peer,
            available = self.connection_limit.available_permits(),
            "connection accepted"
        );

        Ok((stream, peer, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }
}

/// A held connection slot; releases on drop even if the handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_and_accepts() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move { TcpStream::connect(addr).await });
        let (_stream, peer, _permit) = listener.accept().await.unwrap();
        assert!(peer.ip().is_loopback());
        client.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bind_error_reports_the_address() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Second bind on the same port must fail.
        let err = Listener::bind(addr).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind(reported, _) if reported == addr));
    }
}
