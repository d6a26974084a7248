//! Protocol-list wire codec and negotiation callbacks.
//!
//! Advertised protocol names travel as a length-prefixed concatenation:
//! one byte `len(name)` followed by the name bytes, repeated in
//! preference order. The TLS library consumes exactly this encoding for
//! its ALPN advertisement, and the selection callback walks the same
//! bytes to pick the first mutually supported protocol.

use openssl::error::ErrorStack;
use openssl::ssl::{select_next_proto, AlpnError, SslContextBuilder};

use crate::error::Error;

/// Encode a protocol list into its wire form.
///
/// Every name must be 1..=255 bytes. An empty list yields `None`: no
/// advertisement is registered at all, which is different from
/// advertising an empty buffer.
pub fn encode_protocol_list(names: &[String]) -> Result<Option<Vec<u8>>, Error> {
    if names.is_empty() {
        return Ok(None);
    }

    let mut wire = Vec::with_capacity(names.iter().map(|n| 1 + n.len()).sum());
    for name in names {
        if name.is_empty() || name.len() > 255 {
            return Err(Error::NpnLength { name: name.clone() });
        }
        wire.push(name.len() as u8);
        wire.extend_from_slice(name.as_bytes());
    }
    Ok(Some(wire))
}

/// Install the advertisement and the matching selection callback on a
/// context under construction.
pub(crate) fn register(builder: &mut SslContextBuilder, wire: Vec<u8>) -> Result<(), ErrorStack> {
    builder.set_alpn_protos(&wire)?;
    let wire: &'static [u8] = Box::leak(wire.into_boxed_slice());
    builder.set_alpn_select_callback(move |_ssl, client_protocols| {
        select_next_proto(wire, client_protocols).ok_or(AlpnError::NOACK)
    });
    Ok(())
}
