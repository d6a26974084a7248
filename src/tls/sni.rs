//! SNI resolution.
//!
//! Local selection scans the configured contexts in order and picks the
//! first case-insensitive match, falling back to the default context.
//! When the remote lookup is enabled, the data plane resolves unknown
//! names against the SNI helper before the handshake is driven and
//! attaches the materialized context to the session; the servername
//! callback then prefers that attachment over any local match.

use std::net::SocketAddr;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use openssl::error::ErrorStack;
use openssl::ex_data::Index;
use openssl::ssl::{NameType, SniError, Ssl, SslAlert, SslContextBuilder, SslRef};
use serde::Deserialize;

use crate::config::Config;
use crate::pool::HelperPool;
use crate::tls::context::{build_context, Context, ContextParams, ContextSet, ContextTable};

// Process-wide per-session data slots, registered once at first context
// build. One carries the owning connection's identity into callbacks,
// the other the asynchronously resolved context.
static CONNECTION_SLOT: OnceCell<Index<Ssl, ConnectionTag>> = OnceCell::new();
static SNI_RESULT_SLOT: OnceCell<Index<Ssl, Arc<Context>>> = OnceCell::new();

/// Identifies the owning connection inside TLS callbacks.
#[derive(Debug, Clone)]
pub struct ConnectionTag {
    pub id: u64,
    pub peer: SocketAddr,
}

pub(crate) fn connection_slot() -> Result<Index<Ssl, ConnectionTag>, ErrorStack> {
    CONNECTION_SLOT
        .get_or_try_init(|| Ssl::new_ex_index())
        .copied()
}

pub(crate) fn sni_result_slot() -> Result<Index<Ssl, Arc<Context>>, ErrorStack> {
    SNI_RESULT_SLOT
        .get_or_try_init(|| Ssl::new_ex_index())
        .copied()
}

/// Tag a session with its connection identity for callback logging.
pub fn tag_connection(ssl: &mut SslRef, tag: ConnectionTag) -> Result<(), ErrorStack> {
    let slot = connection_slot()?;
    ssl.set_ex_data(slot, tag);
    Ok(())
}

/// Attach an asynchronously resolved context to a session. The
/// servername callback observes it when the handshake runs; the
/// attachment (and the transient context) dies with the session.
pub fn attach_result(ssl: &mut SslRef, context: Arc<Context>) -> Result<(), ErrorStack> {
    let slot = sni_result_slot()?;
    ssl.set_ex_data(slot, context);
    Ok(())
}

/// First configured context whose servername matches, skipping the
/// default at index 0. Names were lowercased at load time; the
/// ClientHello side is folded here.
pub(crate) fn lookup<'a>(
    contexts: &'a [Arc<Context>],
    servername: &str,
) -> Option<&'a Arc<Context>> {
    contexts.iter().skip(1).find(|context| {
        context
            .servername()
            .is_some_and(|name| name.eq_ignore_ascii_case(servername))
    })
}

/// Install the servername callback on a context under construction.
pub(crate) fn register_callback(
    builder: &mut SslContextBuilder,
    table: Arc<ContextTable>,
) -> Result<(), ErrorStack> {
    // Make sure both session slots exist before a handshake can fire.
    connection_slot()?;
    sni_result_slot()?;

    builder.set_servername_callback(
        move |ssl: &mut SslRef, _alert: &mut SslAlert| -> Result<(), SniError> {
            select_session_context(&table, ssl);
            Ok(())
        },
    );
    Ok(())
}

/// The callback body: async attachment first, then local selection.
/// Never fails the handshake; a miss just keeps the default context.
fn select_session_context(table: &ContextTable, ssl: &mut SslRef) {
    let Some(servername) = ssl.servername(NameType::HOST_NAME).map(str::to_owned) else {
        // Client sent no SNI: stay on the context the session started on.
        return;
    };

    let attached = sni_result_slot()
        .ok()
        .and_then(|slot| ssl.ex_data(slot).cloned());
    let conn = connection_slot()
        .ok()
        .and_then(|slot| ssl.ex_data(slot).map(|tag| tag.id));

    let chosen = match attached {
        Some(context) => context,
        None => {
            let contexts = table.contexts();
            if contexts.is_empty() {
                return;
            }
            lookup(contexts, &servername)
                .unwrap_or(&contexts[0])
                .clone()
        }
    };

    match ssl.set_ssl_context(chosen.ssl_context()) {
        Ok(()) => tracing::trace!(
            conn,
            server_name = %servername,
            context = chosen.servername().unwrap_or("<default>"),
            "selected TLS context"
        ),
        Err(err) => tracing::warn!(
            conn,
            server_name = %servername,
            error = %err,
            "failed to switch TLS context"
        ),
    }
}

/// What the SNI helper answers with: PEM material plus optional
/// per-name parameters.
#[derive(Debug, Deserialize)]
struct SniHelperResponse {
    cert: String,
    key: String,
    #[serde(default)]
    ciphers: Option<String>,
    #[serde(default)]
    ecdh: Option<String>,
    #[serde(default)]
    npn: Option<Vec<String>>,
}

/// Resolve an unknown name through the SNI helper and materialize a
/// transient context for it. Any failure resolves to `None` and the
/// handshake proceeds on the default context.
pub async fn resolve_remote(
    config: &Config,
    set: &ContextSet,
    pool: &HelperPool,
    servername: &str,
) -> Option<Arc<Context>> {
    let body = match pool
        .get(
            &config.sni.host,
            config.sni.port,
            &config.sni.query,
            servername,
        )
        .await
    {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!(server_name = %servername, error = %err, "SNI helper request failed");
            return None;
        }
    };

    let response: SniHelperResponse = match serde_json::from_slice(&body) {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(server_name = %servername, error = %err, "SNI helper returned invalid JSON");
            return None;
        }
    };

    materialize(config, set, servername, &response)
}

fn materialize(
    config: &Config,
    set: &ContextSet,
    servername: &str,
    response: &SniHelperResponse,
) -> Option<Arc<Context>> {
    let name = servername.to_ascii_lowercase();
    let params = ContextParams {
        servername: Some(&name),
        cert_pem: response.cert.as_bytes(),
        cert_origin: servername,
        key_pem: response.key.as_bytes(),
        key_origin: servername,
        ciphers: response.ciphers.as_deref(),
        ecdh: response.ecdh.as_deref(),
        npn: response.npn.as_deref(),
    };

    match build_context(config, params, set.table()) {
        Ok(context) => {
            tracing::debug!(server_name = %servername, "materialized remote SNI context");
            Some(Arc::new(context))
        }
        Err(err) => {
            tracing::warn!(server_name = %servername, error = %err, "failed to build remote SNI context");
            None
        }
    }
}
