//! HTTP/1.x wire helpers: request-head parsing and response rendering.

use movelog_core::error::MovelogError;

/// Cross-origin headers sent on every response, success or error.
pub const CORS_HEADERS: [(&str, &str); 3] = [
    ("access-control-allow-origin", "*"),
    ("access-control-allow-methods", "GET, POST, OPTIONS"),
    ("access-control-allow-headers", "Content-Type"),
];

pub const MAX_HEADERS: usize = 64;

/// Largest request head accepted before answering 431.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

// ── Request head ──────────────────────────────────────────────

/// Owned view of a parsed request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    /// Minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    pub version: u8,
    pub keep_alive: bool,
    content_length: Vec<String>,
    transfer_encoding: bool,
}

impl RequestHead {
    /// Body length as declared by the client.
    ///
    /// `Ok(None)` when no `Content-Length` was sent. A chunked (or otherwise
    /// transfer-encoded) request is reported as missing a length since only
    /// `Content-Length` framing is supported.
    pub fn body_length(&self) -> Result<Option<usize>, MovelogError> {
        if self.transfer_encoding {
            return Err(MovelogError::MissingContentLength);
        }
        let mut declared: Option<usize> = None;
        for raw in &self.content_length {
            let trimmed = raw.trim();
            if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
                return Err(MovelogError::InvalidContentLength(raw.clone()));
            }
            let n: usize = trimmed
                .parse()
                .map_err(|_| MovelogError::InvalidContentLength(raw.clone()))?;
            match declared {
                Some(prev) if prev != n => {
                    return Err(MovelogError::InvalidContentLength(format!("{prev} vs {n}")));
                }
                _ => declared = Some(n),
            }
        }
        Ok(declared)
    }
}

/// Parse a request head out of `buf`.
///
/// Returns `Ok(None)` while the head is still incomplete, otherwise the head
/// and the offset where the body starts.
pub fn parse_head(buf: &[u8]) -> Result<Option<(RequestHead, usize)>, httparse::Error> {
    let mut headers_raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers_raw);

    let body_offset = match req.parse(buf)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    let version = req.version.unwrap_or(1);
    let mut keep_alive = version >= 1;
    let mut content_length = Vec::new();
    let mut transfer_encoding = false;

    for h in req.headers.iter() {
        if h.name.is_empty() {
            break;
        }
        let val = String::from_utf8_lossy(h.value);
        if h.name.eq_ignore_ascii_case("content-length") {
            content_length.push(val.into_owned());
        } else if h.name.eq_ignore_ascii_case("transfer-encoding") {
            transfer_encoding = true;
        } else if h.name.eq_ignore_ascii_case("connection") {
            for token in val.split(',').map(str::trim) {
                if token.eq_ignore_ascii_case("close") {
                    keep_alive = false;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    keep_alive = true;
                }
            }
        }
    }

    let head = RequestHead {
        method: req.method.unwrap_or("GET").to_string(),
        path: req.path.unwrap_or("/").to_string(),
        version,
        keep_alive,
        content_length,
        transfer_encoding,
    };
    Ok(Some((head, body_offset)))
}

// ── Response building ─────────────────────────────────────────

pub fn status_text(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}

/// Render a plain-text response with the CORS headers into `buf`.
pub fn build_response(buf: &mut Vec<u8>, status: u16, body: &[u8], keep_alive: bool) {
    buf.clear();
    buf.extend_from_slice(b"HTTP/1.1 ");
    let mut itoa_buf = itoa::Buffer::new();
    buf.extend_from_slice(itoa_buf.format(status).as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(status_text(status).as_bytes());
    buf.extend_from_slice(b"\r\n");
    for (k, v) in CORS_HEADERS {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    if !body.is_empty() {
        buf.extend_from_slice(b"content-type: text/plain; charset=utf-8\r\n");
    }
    buf.extend_from_slice(b"content-length: ");
    buf.extend_from_slice(itoa_buf.format(body.len()).as_bytes());
    buf.extend_from_slice(if keep_alive {
        b"\r\nconnection: keep-alive\r\n\r\n".as_slice()
    } else {
        b"\r\nconnection: close\r\n\r\n".as_slice()
    });
    buf.extend_from_slice(body);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(raw: &str) -> RequestHead {
        parse_head(raw.as_bytes()).unwrap().unwrap().0
    }

    // ── parse_head ───────────────────────────────────────────────

    #[test]
    fn partial_head_returns_none() {
        assert!(parse_head(b"POST / HTTP/1.1\r\nhost: x\r\n").unwrap().is_none());
    }

    #[test]
    fn complete_head_reports_body_offset() {
        let raw = b"POST /log HTTP/1.1\r\ncontent-length: 2\r\n\r\n[]";
        let (h, offset) = parse_head(raw).unwrap().unwrap();
        assert_eq!(h.method, "POST");
        assert_eq!(h.path, "/log");
        assert_eq!(&raw[offset..], b"[]");
        assert_eq!(h.body_length().unwrap(), Some(2));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_head(b"\x01\x02 nonsense\r\n\r\n").is_err());
    }

    #[test]
    fn http10_defaults_to_close() {
        assert!(!head("GET / HTTP/1.0\r\n\r\n").keep_alive);
        assert!(head("GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").keep_alive);
    }

    #[test]
    fn http11_defaults_to_keep_alive() {
        assert!(head("GET / HTTP/1.1\r\n\r\n").keep_alive);
        assert!(!head("GET / HTTP/1.1\r\nConnection: Close\r\n\r\n").keep_alive);
    }

    // ── body_length ──────────────────────────────────────────────

    #[test]
    fn missing_content_length_is_none() {
        assert_eq!(head("POST / HTTP/1.1\r\n\r\n").body_length().unwrap(), None);
    }

    #[test]
    fn non_numeric_content_length_is_invalid() {
        let err = head("POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n").body_length().unwrap_err();
        assert!(matches!(err, MovelogError::InvalidContentLength(_)));
        let err = head("POST / HTTP/1.1\r\nContent-Length: -1\r\n\r\n").body_length().unwrap_err();
        assert!(matches!(err, MovelogError::InvalidContentLength(_)));
    }

    #[test]
    fn conflicting_content_lengths_are_invalid() {
        let raw = "POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\n";
        assert!(head(raw).body_length().is_err());
        let same = "POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 3\r\n\r\n";
        assert_eq!(head(same).body_length().unwrap(), Some(3));
    }

    #[test]
    fn chunked_is_treated_as_missing_length() {
        let raw = "POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        assert!(matches!(head(raw).body_length(), Err(MovelogError::MissingContentLength)));
    }

    // ── build_response ───────────────────────────────────────────

    #[test]
    fn status_text_known_and_unknown() {
        assert_eq!(status_text(200), "OK");
        assert_eq!(status_text(411), "Length Required");
        assert_eq!(status_text(413), "Payload Too Large");
        assert_eq!(status_text(999), "Unknown");
    }

    #[test]
    fn response_carries_cors_headers_and_body() {
        let mut buf = Vec::new();
        build_response(&mut buf, 200, b"hello", true);
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("access-control-allow-origin: *\r\n"));
        assert!(text.contains("access-control-allow-methods: GET, POST, OPTIONS\r\n"));
        assert!(text.contains("access-control-allow-headers: Content-Type\r\n"));
        assert!(text.contains("content-type: text/plain; charset=utf-8\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.contains("connection: keep-alive\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn empty_body_omits_content_type() {
        let mut buf = Vec::new();
        build_response(&mut buf, 200, b"", false);
        let text = String::from_utf8(buf).unwrap();
        assert!(!text.contains("content-type"));
        assert!(text.contains("content-length: 0\r\n"));
        assert!(text.ends_with("connection: close\r\n\r\n"));
    }

    #[test]
    fn build_response_clears_buffer_first() {
        let mut buf = b"stale data".to_vec();
        build_response(&mut buf, 400, b"fresh", true);
        let text = String::from_utf8(buf).unwrap();
        assert!(!text.contains("stale data"));
        assert!(text.ends_with("fresh"));
    }
}
