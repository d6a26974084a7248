//! Proxy server orchestration.
//!
//! Owns the accept loop: binds the front-end listener, hands every
//! accepted connection to the data plane, and drains on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Error;
use crate::lifecycle::Shutdown;
use crate::net::client::{self, ConnectionEnv};
use crate::net::listener::{Listener, ListenerError};
use crate::pool::HelperPool;
use crate::tls::ContextSet;

pub struct ProxyServer {
    env: Arc<ConnectionEnv>,
    frontend: SocketAddr,
}

impl ProxyServer {
    /// Wire config, contexts and (when any helper is enabled) the HTTP
    /// pool together. Address resolution failures surface here, before
    /// anything touches the network.
    pub fn new(config: Arc<Config>, contexts: Arc<ContextSet>) -> Result<Self, Error> {
        let addrs = config.bind_addresses()?;

        let pool = if config.sni.enabled || config.stapling.enabled {
            let pool = HelperPool::new().map_err(|err| Error::HelperPool(err.to_string()))?;
            Some(Arc::new(pool))
        } else {
            None
        };

        Ok(Self {
            env: Arc::new(ConnectionEnv {
                config,
                contexts,
                pool,
                backend: addrs.backend,
            }),
            frontend: addrs.frontend,
        })
    }

    /// Bind and serve until the shutdown signal fires.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), ListenerError> {
        let listener = Listener::bind(self.frontend).await?;
        let mut stop = shutdown.subscribe();

        tracing::info!(
            frontend = %self.frontend,
            backend = %self.env.backend,
            contexts = self.env.contexts.contexts().len(),
            "proxying"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let env = Arc::clone(&self.env);
                        tokio::spawn(async move {
                            client::handle(env, stream, peer).await;
                            drop(permit);
                        });
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                    }
                },
                _ = stop.recv() => {
                    tracing::info!("shutdown signal received; stopping accept loop");
                    return Ok(());
                }
            }
        }
    }
}
