use bytes::BytesMut;
use ::http::uri::{Authority, Uri};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{Destination, SniffError, SniffResult, HTTP_DEFAULT_PORT};

/// Upper bound on the request line plus headers
pub const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_HEADERS: usize = 100;

impl From<httparse::Error> for SniffError {
    fn from(e: httparse::Error) -> Self {
        SniffError::Malformed(match e {
            httparse::Error::TooManyHeaders => "too many request headers",
            httparse::Error::Version => "unsupported HTTP version",
            httparse::Error::HeaderName | httparse::Error::HeaderValue => "invalid request header",
            _ => "invalid request line",
        })
    }
}

/// Read one request head from `reader` and return its destination.
///
/// Reads in chunks until the header block is complete; anything read past
/// the blank line stays with the caller's capture and is never interpreted.
pub async fn sniff_http<R>(reader: &mut R) -> SniffResult<Destination>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(if buf.is_empty() {
                SniffError::Closed
            } else {
                SniffError::Truncated
            });
        }

        if let Some(dest) = parse_request_head(&buf)? {
            return Ok(dest);
        }
        if buf.len() >= MAX_HEADER_BYTES {
            return Err(SniffError::HeaderTooLarge(MAX_HEADER_BYTES));
        }
    }
}

/// Parse a (possibly partial) request head.
///
/// `Ok(None)` means more bytes are needed.
pub fn parse_request_head(buf: &[u8]) -> SniffResult<Option<Destination>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    if req.parse(buf)?.is_partial() {
        return Ok(None);
    }

    // An absolute-form target names the destination itself and wins over Host
    if let Some(authority) = req
        .path
        .and_then(|path| path.parse::<Uri>().ok())
        .and_then(|uri| uri.authority().cloned())
    {
        return destination_from_authority(authority.as_str()).map(Some);
    }

    let mut host_values = req
        .headers
        .iter()
        .filter(|h| h.name.eq_ignore_ascii_case("host"))
        .map(|h| h.value);
    let value = match (host_values.next(), host_values.next()) {
        (Some(value), None) => value,
        (None, _) => return Err(SniffError::NoHost),
        (Some(_), Some(_)) => return Err(SniffError::Malformed("duplicate Host headers")),
    };

    let value = std::str::from_utf8(value)
        .map_err(|_| SniffError::Malformed("non-UTF-8 Host header"))?
        .trim();
    if value.is_empty() {
        return Err(SniffError::NoHost);
    }
    destination_from_authority(value).map(Some)
}

/// Split `host[:port]`, defaulting to port 80 and unwrapping `[v6]` literals
fn destination_from_authority(value: &str) -> SniffResult<Destination> {
    let authority: Authority = value
        .parse()
        .map_err(|_| SniffError::Malformed("invalid Host"))?;

    let raw_host = authority.host();
    let host = raw_host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(raw_host);
    if host.is_empty() {
        return Err(SniffError::NoHost);
    }

    let s = authority.as_str();
    let host_port = s.rsplit_once('@').map_or(s, |(_, hp)| hp);
    let port = match host_port.strip_prefix(raw_host) {
        None | Some("") | Some(":") => HTTP_DEFAULT_PORT,
        Some(tail) => tail
            .strip_prefix(':')
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or(SniffError::Malformed("invalid port in Host"))?,
    };

    Ok(Destination::new(host, port))
}
