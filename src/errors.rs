//! Canned error responses and the error type for the request-scoped failure paths.
//!
//! Every request-scoped error resolves locally: the worker writes one of these
//! canned pages (or, for errors discovered mid-stream, just closes) and returns.
//! Nothing here is fatal to the process.

use bytes::Bytes;
use std::fmt;

#[derive(Debug)]
pub enum ProxyError {
    /// The client's request did not parse as HTTP.
    BadRequest,
    /// The client asked for a method other than GET.
    MethodNotAllowed,
    /// Serializing the forwarded request overflowed the request buffer.
    RequestTooLarge,
    /// DNS resolution of the request's Host failed.
    Resolve(std::io::Error),
    /// Connecting to the resolved origin address failed.
    Connect(std::io::Error),
    /// A read or write to the origin failed after the connection was open.
    UpstreamIo(std::io::Error),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::BadRequest => write!(f, "malformed request"),
            ProxyError::MethodNotAllowed => write!(f, "method not implemented"),
            ProxyError::RequestTooLarge => write!(f, "forwarded request exceeds buffer"),
            ProxyError::Resolve(e) => write!(f, "host resolution failed: {e}"),
            ProxyError::Connect(e) => write!(f, "upstream connect failed: {e}"),
            ProxyError::UpstreamIo(e) => write!(f, "upstream I/O failed: {e}"),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Resolve(e) | ProxyError::Connect(e) | ProxyError::UpstreamIo(e) => Some(e),
            _ => None,
        }
    }
}

impl ProxyError {
    /// The HTTP status this error surfaces to the client. `UpstreamIo` has no
    /// code: by the time it happens some bytes may already be on the wire, so
    /// the worker just closes instead of trying to append a status line.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProxyError::BadRequest => Some(400),
            ProxyError::MethodNotAllowed => Some(501),
            ProxyError::RequestTooLarge => Some(500),
            ProxyError::Resolve(_) | ProxyError::Connect(_) => Some(502),
            ProxyError::UpstreamIo(_) => None,
        }
    }
}

fn reason_phrase(code: u16) -> &'static str {
    match code {
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}

/// Render the canned HTML+headers response for `code`, per the wire format
/// spec.md §6 specifies: status line, Content-Length, Connection: close,
/// Content-Type, a Date header in RFC 1123 GMT, a blank line, then the body.
pub fn canned_response(code: u16) -> Bytes {
    let reason = reason_phrase(code);
    let body = format!(
        "<HTML><HEAD><TITLE>{code} {reason}</TITLE></HEAD><BODY><H1>{code} {reason}</H1></BODY></HTML>"
    );
    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    let response = format!(
        "HTTP/1.1 {code} {reason}\r\n\
         Content-Length: {len}\r\n\
         Connection: close\r\n\
         Content-Type: text/html\r\n\
         Date: {date}\r\n\
         \r\n\
         {body}",
        len = body.len(),
    );
    Bytes::from(response)
}
