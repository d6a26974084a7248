//! ClientHello inspection before the handshake.
//!
//! The remote SNI lookup and the stapling prefetch both need the
//! requested host name before the TLS library starts consuming bytes.
//! The data plane reads the first record here, extracts the SNI host
//! name without terminating anything, and replays the buffered bytes
//! into the real handshake through [`ReplayStream`].
//!
//! Parsing is deliberately forgiving: anything that does not look like
//! a complete ClientHello yields "no name" and the TLS library gets to
//! produce the authoritative error.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXT_SERVER_NAME: u16 = 0x0000;
const SNI_HOST_NAME: u8 = 0x00;

/// One TLS record plus header; a ClientHello that does not fit is not
/// worth waiting for.
const MAX_HELLO: usize = 5 + 16384;

/// Result of buffering the first record of a connection.
pub struct PeekedHello {
    /// SNI host name, when the client sent one.
    pub server_name: Option<String>,
    /// Everything consumed from the socket; must be replayed into the
    /// handshake.
    pub buffered: Vec<u8>,
}

/// Read until the first record is parseable (or hopeless) and extract
/// the SNI host name.
pub async fn read_client_hello<S>(stream: &mut S) -> io::Result<PeekedHello>
where
    S: AsyncRead + Unpin,
{
    let mut buffered = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    loop {
        match parse_server_name(&buffered) {
            HelloParse::Found(name) => {
                return Ok(PeekedHello {
                    server_name: Some(name),
                    buffered,
                })
            }
            HelloParse::Absent | HelloParse::NotTls => {
                return Ok(PeekedHello {
                    server_name: None,
                    buffered,
                })
            }
            HelloParse::Partial => {}
        }

        if buffered.len() >= MAX_HELLO {
            return Ok(PeekedHello {
                server_name: None,
                buffered,
            });
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(PeekedHello {
                server_name: None,
                buffered,
            });
        }
        buffered.extend_from_slice(&chunk[..n]);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum HelloParse {
    Found(String),
    /// Complete enough to know there is no usable SNI.
    Absent,
    /// Not a TLS handshake record.
    NotTls,
    /// Keep reading.
    Partial,
}

fn parse_server_name(data: &[u8]) -> HelloParse {
    let mut r = Reader::new(data);

    let Some(content_type) = r.u8() else {
        return HelloParse::Partial;
    };
    if content_type != CONTENT_TYPE_HANDSHAKE {
        return HelloParse::NotTls;
    }
    let (Some(major), Some(_minor)) = (r.u8(), r.u8()) else {
        return HelloParse::Partial;
    };
    if major != 3 {
        return HelloParse::NotTls;
    }
    let Some(record_len) = r.u16() else {
        return HelloParse::Partial;
    };

    let Some(record) = r.take(record_len as usize) else {
        return HelloParse::Partial;
    };

    // From here on everything lives inside the complete record; any
    // truncation is malformed, not "more data coming".
    let mut r = Reader::new(record);
    match r.u8() {
        Some(HANDSHAKE_CLIENT_HELLO) => {}
        Some(_) => return HelloParse::NotTls,
        None => return HelloParse::Absent,
    }
    let Some(_handshake_len) = r.u24() else {
        return HelloParse::Absent;
    };

    // client version + random
    if r.take(2 + 32).is_none() {
        return HelloParse::Absent;
    }
    let Some(session_id_len) = r.u8() else {
        return HelloParse::Absent;
    };
    if r.take(session_id_len as usize).is_none() {
        return HelloParse::Absent;
    }
    let Some(cipher_len) = r.u16() else {
        return HelloParse::Absent;
    };
    if r.take(cipher_len as usize).is_none() {
        return HelloParse::Absent;
    }
    let Some(compression_len) = r.u8() else {
        return HelloParse::Absent;
    };
    if r.take(compression_len as usize).is_none() {
        return HelloParse::Absent;
    }

    let Some(extensions_len) = r.u16() else {
        return HelloParse::Absent;
    };
    let Some(extensions) = r.take(extensions_len as usize) else {
        return HelloParse::Absent;
    };

    let mut r = Reader::new(extensions);
    while let (Some(ext_type), Some(ext_len)) = (r.u16(), r.u16()) {
        let Some(ext) = r.take(ext_len as usize) else {
            return HelloParse::Absent;
        };
        if ext_type != EXT_SERVER_NAME {
            continue;
        }

        let mut r = Reader::new(ext);
        let Some(list_len) = r.u16() else {
            return HelloParse::Absent;
        };
        let Some(list) = r.take(list_len as usize) else {
            return HelloParse::Absent;
        };
        let mut r = Reader::new(list);
        while let Some(name_type) = r.u8() {
            let Some(name_len) = r.u16() else {
                return HelloParse::Absent;
            };
            let Some(name) = r.take(name_len as usize) else {
                return HelloParse::Absent;
            };
            if name_type == SNI_HOST_NAME {
                return match std::str::from_utf8(name) {
                    Ok(name) if !name.is_empty() => HelloParse::Found(name.to_string()),
                    _ => HelloParse::Absent,
                };
            }
        }
        return HelloParse::Absent;
    }

    HelloParse::Absent
}

/// Minimal bounds-checked byte walker.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Option<u32> {
        self.take(3)
            .map(|b| u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }
}

/// Replays buffered bytes ahead of the live socket so the TLS library
/// sees the ClientHello exactly once.
pub struct ReplayStream<S> {
    prefix: Vec<u8>,
    offset: usize,
    inner: S,
}

impl<S> ReplayStream<S> {
    pub fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix,
            offset: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ReplayStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.offset < this.prefix.len() {
            let n = buf.remaining().min(this.prefix.len() - this.offset);
            buf.put_slice(&this.prefix[this.offset..this.offset + n]);
            this.offset += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ReplayStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
