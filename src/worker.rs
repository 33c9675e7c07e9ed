//! Per-client worker: the `RECV_REQUEST -> PARSE -> LOOKUP -> (REPLAY | FETCH)
//! -> DONE` state machine from spec.md §4.3. One call to [`handle_client`]
//! services exactly one request on one accepted connection, then the socket
//! is closed; there is no keep-alive.

use crate::errors::canned_response;
use crate::fetcher;
use crate::{
    calculate_ttl, create_cache_key, extract_host, is_cacheable, parse_request, Cache,
    MAX_REQUEST_SIZE,
};
use bytes::BytesMut;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Service one client connection end to end. Never panics on a malformed or
/// hostile request; every error path ends in either a canned response or a
/// silent close, matching spec.md §7's recovery policy.
pub async fn handle_client(mut client: TcpStream, cache: Cache) {
    let buffer = match recv_request(&mut client).await {
        Some(buf) => buf,
        None => return, // peer closed or errored before sending anything usable
    };

    let parsed = match parse_request(&buffer) {
        Some(parsed) => parsed,
        None => {
            respond_canned(&mut client, 400).await;
            return;
        }
    };

    if parsed.method != "GET" {
        respond_canned(&mut client, 501).await;
        return;
    }

    let Some((host, port)) = extract_host(&parsed.headers) else {
        respond_canned(&mut client, 400).await;
        return;
    };

    let cache_key = create_cache_key(&host, &parsed.path);

    if let Some(cached) = cache.lookup(cache_key).await {
        info!(host, path = %parsed.path, "cache hit");
        if client.write_all(&cached).await.is_err() {
            debug!("client disconnected mid-replay");
        }
        return;
    }

    debug!(host, path = %parsed.path, "cache miss");

    let request_buf = match fetcher::build_forward_request(&parsed, &host) {
        Ok(buf) => buf,
        Err(e) => {
            warn!("failed to build forwarded request: {e}");
            respond_canned(&mut client, e.status().unwrap_or(500)).await;
            return;
        }
    };

    match fetcher::fetch(&mut client, &host, port, &request_buf).await {
        Ok(outcome) => {
            if let Some(captured) = outcome.captured {
                maybe_cache(&cache, &host, &parsed.path, cache_key, &captured).await;
            }
        }
        Err(e) => {
            debug!("upstream fetch failed: {e}");
            if let Some(status) = e.status() {
                respond_canned(&mut client, status).await;
            }
            // Errors with no status (mid-stream I/O failures) have already
            // written partial bytes to the client; just close.
        }
    }
}

/// `RECV_REQUEST`: read up to `MAX_REQUEST_SIZE` bytes, stopping as soon as a
/// full header block (`\r\n\r\n`) is seen. Returns `None` on immediate close
/// or error, matching the `→ DONE` transition in spec.md §4.3.
async fn recv_request(client: &mut TcpStream) -> Option<BytesMut> {
    let mut buffer = BytesMut::with_capacity(4096);
    loop {
        match client.read_buf(&mut buffer).await {
            Ok(0) => return if buffer.is_empty() { None } else { Some(buffer) },
            Ok(_) => {
                if buffer.len() > MAX_REQUEST_SIZE {
                    return None;
                }
                if buffer.windows(4).any(|w| w == b"\r\n\r\n") {
                    return Some(buffer);
                }
            }
            Err(_) => return None,
        }
    }
}

async fn respond_canned(client: &mut TcpStream, status: u16) {
    if client.write_all(&canned_response(status)).await.is_err() {
        debug!("client disconnected before canned response could be sent");
    }
}

/// Gate the captured response on cacheability/memory pressure and, if it
/// passes, insert it with a TTL-derived expiry.
async fn maybe_cache(cache: &Cache, host: &str, path: &str, key: u64, captured: &bytes::Bytes) {
    let Some((_, resp_headers, _)) = parse_response(captured) else {
        return;
    };

    if !is_cacheable("GET", path, &resp_headers) {
        return;
    }

    if !crate::memory::has_sufficient_memory() {
        warn!(host, path, "skipping cache insert under memory pressure");
        return;
    }

    let ttl = calculate_ttl(&resp_headers);
    let expires = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + ttl;

    let url = format!("{host}{path}");
    if cache.insert(&url, key, captured.clone(), Some(expires)).await {
        info!(host, path, ttl, "cached origin response");
    } else {
        warn!(host, path, "cache rejected response (too large)");
    }
}

fn parse_response(data: &[u8]) -> Option<(String, Vec<String>, &[u8])> {
    let mut raw_headers = [httparse::EMPTY_HEADER; 64];
    let mut response = httparse::Response::new(&mut raw_headers);

    match response.parse(data) {
        Ok(httparse::Status::Complete(header_len)) => {
            let status = response.code?;
            let status_line = format!("HTTP/1.1 {} {}\r\n", status, response.reason.unwrap_or("OK"));
            let headers = response
                .headers
                .iter()
                .map(|h| format!("{}: {}", h.name, String::from_utf8_lossy(h.value)))
                .collect();
            Some((status_line, headers, &data[header_len..]))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_response_splits_status_headers_body() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let (status_line, headers, body) = parse_response(raw).unwrap();
        assert_eq!(status_line, "HTTP/1.1 200 OK\r\n");
        assert_eq!(headers, vec!["Content-Length: 5".to_string()]);
        assert_eq!(body, b"hello");
    }
}
