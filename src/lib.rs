//! Core of a forwarding HTTP/1.x proxy with an in-memory, byte-bounded LRU
//! response cache: request parsing, cache-key/cacheability/TTL helpers, the
//! cache itself, canned error responses, the upstream fetcher and the
//! per-connection worker state machine. `main.rs` wires these together
//! behind an admission-bounded accept loop.

pub mod cache;
pub mod errors;
pub mod fetcher;
pub mod memory;
pub mod worker;

pub use cache::{Cache, CacheEntry, CACHE_CAPACITY_BYTES, ENTRY_OVERHEAD_BYTES, MAX_ENTRY_SIZE};
pub use errors::ProxyError;

use xxhash_rust::xxh64::Xxh64;

/// Octets read per `recv` on either leg of a connection, and the cap on a
/// client's request. Distinct from [`CACHE_CAPACITY_BYTES`]; the two must
/// never be conflated (see SPEC_FULL.md and DESIGN.md).
pub const MAX_BYTES: usize = 4096;

/// Hard ceiling on a client request, enforced while accumulating `RECV_REQUEST`.
pub const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// A captured origin response larger than this is forwarded but never cached.
pub const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Admission semaphore size: the maximum number of workers active at once.
pub const MAX_CLIENTS: usize = 400;

/// Default TTL applied to a cacheable response lacking an explicit `max-age`.
pub const CACHE_TTL: u64 = 3600;

/// `max-age` values above this are clamped; keeps a single stale config from
/// pinning an entry in the cache indefinitely.
pub const MAX_TTL: u64 = 86_400;

/// A parsed HTTP/1.x request line plus headers, as produced by [`parse_request`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<String>,
}

/// Parse a request buffer with `httparse`. Returns `None` on anything other
/// than a complete, well-formed request line and header block.
pub fn parse_request(data: &[u8]) -> Option<ParsedRequest> {
    let mut raw_headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut raw_headers);

    match req.parse(data) {
        Ok(httparse::Status::Complete(_)) => {
            let method = req.method?.to_string();
            let path = req.path?.to_string();
            let version = match req.version? {
                0 => "HTTP/1.0".to_string(),
                _ => "HTTP/1.1".to_string(),
            };
            let headers = req
                .headers
                .iter()
                .map(|h| format!("{}: {}", h.name, String::from_utf8_lossy(h.value)))
                .collect();
            Some(ParsedRequest {
                method,
                path,
                version,
                headers,
            })
        }
        _ => None,
    }
}

/// Pull `Host`/port out of a header list. Case-insensitive on the header name;
/// a trailing `:port` is parsed out, defaulting to 80 when absent.
pub fn extract_host(headers: &[String]) -> Option<(String, u16)> {
    for header in headers {
        if header.to_lowercase().starts_with("host:") {
            let host_value = header[5..].trim();
            return Some(match host_value.rfind(':') {
                Some(colon) => (
                    host_value[..colon].to_string(),
                    host_value[colon + 1..].parse::<u16>().unwrap_or(80),
                ),
                None => (host_value.to_string(), 80),
            });
        }
    }
    None
}

/// The canonical cache key per spec.md §4.2: `host + path`, ignoring port,
/// scheme and header variation. Hashed incrementally with xxh64 to avoid an
/// intermediate `format!` allocation per lookup.
pub fn create_cache_key(host: &str, path: &str) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.update(host.as_bytes());
    hasher.update(path.as_bytes());
    hasher.digest()
}

/// Decide whether a response is eligible for caching. Only `GET` responses
/// are ever considered; `Cache-Control: no-cache`/`no-store` vetoes caching
/// even for otherwise-static content.
pub fn is_cacheable(method: &str, path: &str, response_headers: &[String]) -> bool {
    if method != "GET" {
        return false;
    }

    for header in response_headers {
        let header_lower = header.to_lowercase();
        if let Some(value) = header_lower.strip_prefix("cache-control:") {
            if value.contains("no-cache") || value.contains("no-store") {
                return false;
            }
            if value.contains("max-age=") {
                return true;
            }
        }
    }

    const CACHEABLE_EXTENSIONS: &[&str] = &[
        ".jpg", ".jpeg", ".png", ".gif", ".ico", ".css", ".js", ".woff", ".woff2", ".ttf", ".svg",
        ".webp", ".mp4", ".webm",
    ];
    let path_lower = path.to_lowercase();
    CACHEABLE_EXTENSIONS.iter().any(|ext| path_lower.ends_with(ext))
}

/// Extract a `Cache-Control: max-age=N` TTL, clamped to [`MAX_TTL`], defaulting
/// to [`CACHE_TTL`] when absent or unparsable.
pub fn calculate_ttl(headers: &[String]) -> u64 {
    for header in headers {
        let header_lower = header.to_lowercase();
        if let Some(pos) = header_lower.find("max-age=") {
            let value_str = &header_lower[pos + 8..];
            let digits: String = value_str.chars().take_while(|c| c.is_ascii_digit()).collect();
            if let Ok(seconds) = digits.parse::<u64>() {
                return seconds.min(MAX_TTL);
            }
        }
    }
    CACHE_TTL
}
