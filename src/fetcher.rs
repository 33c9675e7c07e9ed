//! Speaks HTTP to the origin on behalf of a worker: builds the forwarded
//! request, resolves and connects to the origin, streams the response to the
//! client while capturing a copy, and reports whether the capture is safe to
//! hand to the cache.

use crate::{ParsedRequest, ProxyError, MAX_BYTES, MAX_RESPONSE_SIZE};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of streaming an origin response to the client.
pub struct FetchOutcome {
    /// The full response as received, for cache insertion. `None` if the
    /// response exceeded `MAX_RESPONSE_SIZE` (still forwarded, never cached)
    /// or if the stream ended with an error after some bytes were sent.
    pub captured: Option<Bytes>,
}

/// Build the request line + headers forwarded to the origin, per spec.md §4.2
/// steps 1-3: a `GET <path> <version>` line, `Connection: close`, an injected
/// `Host` header if the client didn't send one, followed by the client's
/// other headers verbatim. Bounded by `MAX_BYTES`; overflow is reported as
/// `RequestTooLarge` rather than silently truncated.
pub fn build_forward_request(request: &ParsedRequest, host: &str) -> Result<Bytes, ProxyError> {
    let mut buf = BytesMut::with_capacity(MAX_BYTES);
    buf.extend_from_slice(b"GET ");
    buf.extend_from_slice(request.path.as_bytes());
    buf.extend_from_slice(b" ");
    buf.extend_from_slice(request.version.as_bytes());
    buf.extend_from_slice(b"\r\n");

    let has_host = request
        .headers
        .iter()
        .any(|h| h.to_lowercase().starts_with("host:"));

    for header in &request.headers {
        if header.to_lowercase().starts_with("connection:") {
            continue;
        }
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b"Connection: close\r\n");
    if !has_host {
        buf.extend_from_slice(format!("Host: {host}\r\n").as_bytes());
    }
    buf.extend_from_slice(b"\r\n");

    if buf.len() > MAX_BYTES {
        return Err(ProxyError::RequestTooLarge);
    }
    Ok(buf.freeze())
}

/// Resolve `host:port` to an IPv4 socket address, per spec.md §4.2 step 4.
async fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr, ProxyError> {
    let mut addrs = lookup_host((host, port)).await.map_err(ProxyError::Resolve)?;
    addrs
        .find(|addr| addr.is_ipv4())
        .ok_or_else(|| ProxyError::Resolve(std::io::Error::other("no A record")))
}

/// Open a connection to the origin, send `request`, and stream the response
/// to `client` while capturing a copy, per spec.md §4.2 steps 4-8.
pub async fn fetch<W>(
    client: &mut W,
    host: &str,
    port: u16,
    request: &Bytes,
) -> Result<FetchOutcome, ProxyError>
where
    W: AsyncWriteExt + Unpin,
{
    let addr = resolve_ipv4(host, port).await?;

    let mut upstream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| ProxyError::Connect(std::io::Error::other("connect timed out")))?
        .map_err(ProxyError::Connect)?;

    upstream
        .write_all(request)
        .await
        .map_err(ProxyError::UpstreamIo)?;

    let mut capture = BytesMut::new();
    let mut chunk = [0u8; MAX_BYTES];
    let mut capture_intact = true;

    loop {
        let n = match timeout(IO_TIMEOUT, upstream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!(host, "upstream read failed mid-stream: {e}");
                return Err(ProxyError::UpstreamIo(e));
            }
            Err(_) => {
                debug!(host, "upstream read timed out mid-stream");
                return Err(ProxyError::UpstreamIo(std::io::Error::other("read timed out")));
            }
        };

        client
            .write_all(&chunk[..n])
            .await
            .map_err(ProxyError::UpstreamIo)?;

        if capture_intact {
            if capture.len() + n > MAX_RESPONSE_SIZE {
                capture_intact = false;
            } else {
                capture.extend_from_slice(&chunk[..n]);
            }
        }
    }

    Ok(FetchOutcome {
        captured: capture_intact.then(|| capture.freeze()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(method: &str, path: &str, version: &str, headers: &[&str]) -> ParsedRequest {
        ParsedRequest {
            method: method.to_string(),
            path: path.to_string(),
            version: version.to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
        }
    }

    #[test]
    fn injects_host_when_absent() {
        let parsed = req("GET", "/hello", "HTTP/1.1", &[]);
        let built = build_forward_request(&parsed, "example.test").unwrap();
        let text = String::from_utf8(built.to_vec()).unwrap();
        assert!(text.starts_with("GET /hello HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.test\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn keeps_existing_host_header() {
        let parsed = req("GET", "/hello", "HTTP/1.1", &["Host: example.test"]);
        let built = build_forward_request(&parsed, "example.test").unwrap();
        let text = String::from_utf8(built.to_vec()).unwrap();
        assert_eq!(text.matches("Host:").count(), 1);
    }

    #[test]
    fn drops_clients_connection_header_in_favor_of_close() {
        let parsed = req(
            "GET",
            "/hello",
            "HTTP/1.1",
            &["Host: example.test", "Connection: keep-alive"],
        );
        let built = build_forward_request(&parsed, "example.test").unwrap();
        let text = String::from_utf8(built.to_vec()).unwrap();
        assert_eq!(text.matches("Connection:").count(), 1);
        assert!(text.contains("Connection: close\r\n"));
    }
}
