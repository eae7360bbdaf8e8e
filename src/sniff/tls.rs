//! SNI extraction from a TLS ClientHello.
//!
//! Walks the record layer and the ClientHello handshake message far enough
//! to decode the `server_name` extension. No handshake output is ever
//! produced and nothing past the ClientHello is read.
//!
//! ```text
//! record:       type(1)=22 | version(2) | length(2) | fragment
//! handshake:    type(1)=1  | length(3)  | body
//! ClientHello:  version(2) | random(32) | session_id<0..32> |
//!               cipher_suites<2..2^16-2> | compression<1..2^8-1> |
//!               extensions<0..2^16-1>
//! server_name:  list_len(2) | { name_type(1) | name<1..2^16-1> }*
//! ```

use tokio::io::{AsyncRead, AsyncReadExt};

use super::{Destination, SniffError, SniffResult, TLS_PORT};

const CONTENT_TYPE_HANDSHAKE: u8 = 22;
const HANDSHAKE_CLIENT_HELLO: u8 = 1;
const EXT_SERVER_NAME: u16 = 0;
const NAME_TYPE_HOST_NAME: u8 = 0;

const RECORD_HEADER_LEN: usize = 5;
const HANDSHAKE_HEADER_LEN: usize = 4;
/// Largest plaintext fragment plus slack for legacy stacks
const MAX_RECORD_LEN: usize = 16384 + 2048;
/// A ClientHello larger than this is rejected rather than buffered
pub const MAX_CLIENT_HELLO_LEN: usize = 64 * 1024;

/// Read a ClientHello from `reader` and return `server_name:443`.
///
/// Handshake messages split across several records are reassembled. Only
/// whole records are read, so a following record stays unread.
pub async fn sniff_tls<R>(reader: &mut R) -> SniffResult<Destination>
where
    R: AsyncRead + Unpin,
{
    let mut handshake: Vec<u8> = Vec::with_capacity(1024);
    let mut header = [0u8; RECORD_HEADER_LEN];

    loop {
        let n = read_full(reader, &mut header).await?;
        if n == 0 && handshake.is_empty() {
            return Err(SniffError::Closed);
        }
        if n < header.len() {
            return Err(SniffError::Truncated);
        }

        if header[0] != CONTENT_TYPE_HANDSHAKE {
            return Err(SniffError::Malformed("not a TLS handshake record"));
        }
        if header[1] != 3 {
            return Err(SniffError::Malformed("unsupported TLS record version"));
        }
        let len = u16::from_be_bytes([header[3], header[4]]) as usize;
        if len == 0 || len > MAX_RECORD_LEN {
            return Err(SniffError::Malformed("invalid TLS record length"));
        }

        let start = handshake.len();
        handshake.resize(start + len, 0);
        if read_full(reader, &mut handshake[start..]).await? < len {
            return Err(SniffError::Truncated);
        }

        if handshake.len() < HANDSHAKE_HEADER_LEN {
            continue;
        }
        if handshake[0] != HANDSHAKE_CLIENT_HELLO {
            return Err(SniffError::Malformed("first handshake message is not a ClientHello"));
        }
        let msg_len = u32::from_be_bytes([0, handshake[1], handshake[2], handshake[3]]) as usize;
        if msg_len > MAX_CLIENT_HELLO_LEN {
            return Err(SniffError::Malformed("ClientHello too large"));
        }
        let end = HANDSHAKE_HEADER_LEN + msg_len;
        if handshake.len() >= end {
            let name = parse_client_hello(&handshake[HANDSHAKE_HEADER_LEN..end])?;
            return Ok(Destination::new(name, TLS_PORT));
        }
    }
}

/// Fill `buf` unless EOF comes first; returns how many bytes were read
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Extract the SNI host name from a ClientHello body (handshake header stripped)
pub fn parse_client_hello(body: &[u8]) -> SniffResult<String> {
    let mut r = Cursor::new(body);

    r.skip(2)?; // legacy_version
    r.skip(32)?; // random
    let session_id = r.vec8()?;
    if session_id.len() > 32 {
        return Err(SniffError::Malformed("session id too long"));
    }
    let suites = r.vec16()?;
    if suites.is_empty() || suites.len() % 2 != 0 {
        return Err(SniffError::Malformed("invalid cipher suite list"));
    }
    if r.vec8()?.is_empty() {
        return Err(SniffError::Malformed("empty compression method list"));
    }

    // Pre-extension hellos are legal but cannot carry SNI
    if r.is_empty() {
        return Err(SniffError::NoSni);
    }
    let mut exts = Cursor::new(r.vec16()?);
    if !r.is_empty() {
        return Err(SniffError::Malformed("trailing data after extensions"));
    }

    while !exts.is_empty() {
        let ext_type = exts.u16()?;
        let data = exts.vec16()?;
        if ext_type == EXT_SERVER_NAME {
            return parse_server_name(data);
        }
    }
    Err(SniffError::NoSni)
}

fn parse_server_name(data: &[u8]) -> SniffResult<String> {
    let mut r = Cursor::new(data);
    let mut list = Cursor::new(r.vec16()?);
    if !r.is_empty() {
        return Err(SniffError::Malformed("trailing data in server_name extension"));
    }

    while !list.is_empty() {
        let name_type = list.u8()?;
        let name = list.vec16()?;
        if name_type != NAME_TYPE_HOST_NAME {
            continue;
        }
        return validate_host_name(name).map(str::to_owned);
    }
    Err(SniffError::NoSni)
}

fn validate_host_name(name: &[u8]) -> SniffResult<&str> {
    if name.is_empty() {
        return Err(SniffError::Malformed("empty SNI host name"));
    }
    if !name.iter().all(|b| b.is_ascii_graphic()) {
        return Err(SniffError::Malformed("SNI host name is not printable ASCII"));
    }
    if name.ends_with(b".") {
        return Err(SniffError::Malformed("SNI host name has a trailing dot"));
    }
    std::str::from_utf8(name).map_err(|_| SniffError::Malformed("SNI host name is not ASCII"))
}

/// Bounds-checked reader over TLS length-prefixed vectors
struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> SniffResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(SniffError::Malformed("truncated ClientHello"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn skip(&mut self, n: usize) -> SniffResult<()> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> SniffResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> SniffResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn vec8(&mut self) -> SniffResult<&'a [u8]> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    fn vec16(&mut self) -> SniffResult<&'a [u8]> {
        let len = self.u16()? as usize;
        self.take(len)
    }
}
