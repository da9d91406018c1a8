//! Best-effort HTTP/1.1 wire-byte accounting.
//!
//! The engine reports data_sent/data_received per request. We estimate the
//! framing (request/status line + headers + CRLFs) instead of hooking the
//! socket, and make implicit Host/Content-Length headers explicit so the
//! numbers are deterministic.

use std::borrow::Cow;

use super::{Error, HttpRequest, Result};

pub fn estimate_request_bytes(req: &HttpRequest) -> Result<u64> {
    request_bytes(&req.method, &req.url, &req.headers, req.body.len() as u64)
}

pub(super) fn request_bytes(
    method: &http::Method,
    url: &str,
    headers: &[(String, String)],
    body_len: u64,
) -> Result<u64> {
    let parsed = url::Url::parse(url).map_err(|_| Error::InvalidUrl(url.to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::UnsupportedScheme(url.to_string()));
    }

    let uri: hyper::Uri = url.parse().map_err(|_| Error::InvalidUrl(url.to_string()))?;

    // "METHOD SP path SP HTTP/1.1 CRLF"
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let mut bytes = (method.as_str().len() as u64)
        .saturating_add(1)
        .saturating_add(path.len() as u64)
        .saturating_add(1)
        .saturating_add("HTTP/1.1".len() as u64)
        .saturating_add(2);

    for (k, v) in headers {
        bytes = bytes.saturating_add(header_bytes(k.as_bytes(), v.as_bytes()));
    }

    if !has_header(headers, "host")
        && let Some(host) = host_header_value(&parsed)
    {
        bytes = bytes.saturating_add(header_bytes(b"host", host.as_bytes()));
    }

    if body_len != 0 && !has_header(headers, "content-length") {
        let v = body_len.to_string();
        bytes = bytes.saturating_add(header_bytes(b"content-length", v.as_bytes()));
    }

    // End of headers, then the body.
    Ok(bytes.saturating_add(2).saturating_add(body_len))
}

pub(super) fn response_head_bytes(
    version: http::Version,
    status: http::StatusCode,
    headers: &http::HeaderMap,
) -> u64 {
    let version_str: Cow<'static, str> = match version {
        http::Version::HTTP_10 => Cow::Borrowed("HTTP/1.0"),
        http::Version::HTTP_2 => Cow::Borrowed("HTTP/2"),
        http::Version::HTTP_3 => Cow::Borrowed("HTTP/3"),
        _ => Cow::Borrowed("HTTP/1.1"),
    };

    // "HTTP/1.1 SP 200 CRLF" (reason-phrase intentionally ignored)
    let mut bytes = (version_str.len() as u64)
        .saturating_add(1)
        .saturating_add(status.as_str().len() as u64)
        .saturating_add(2);

    for (name, value) in headers.iter() {
        bytes = bytes.saturating_add(header_bytes(name.as_str().as_bytes(), value.as_bytes()));
    }
    bytes.saturating_add(2)
}

fn header_bytes(name: &[u8], value: &[u8]) -> u64 {
    // "name: value\r\n"
    (name.len() as u64)
        .saturating_add(2)
        .saturating_add(value.len() as u64)
        .saturating_add(2)
}

pub(super) fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

pub(super) fn host_header_value(parsed: &url::Url) -> Option<String> {
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) if port != 80 => Some(format!("{host}:{port}")),
        _ => Some(host.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_without_body_counts_request_line_and_host() {
        let n = request_bytes(&http::Method::GET, "http://example.com/api/products", &[], 0)
            .unwrap_or_else(|e| panic!("{e}"));

        // "GET /api/products HTTP/1.1\r\n" (28) + "host: example.com\r\n" (19) + "\r\n" (2)
        assert_eq!(n, 28 + 19 + 2);
    }

    #[test]
    fn body_adds_implicit_content_length() {
        let with_body = request_bytes(&http::Method::POST, "http://example.com/api/orders", &[], 10)
            .unwrap_or_else(|e| panic!("{e}"));
        let without = request_bytes(&http::Method::POST, "http://example.com/api/orders", &[], 0)
            .unwrap_or_else(|e| panic!("{e}"));

        // body (10) + "content-length: 10\r\n" (20)
        assert_eq!(with_body, without + 10 + 20);
    }

    #[test]
    fn non_default_port_appears_in_host_header() {
        let parsed = url::Url::parse("http://example.com:8080/").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            host_header_value(&parsed),
            Some("example.com:8080".to_string())
        );
    }

    #[test]
    fn rejects_non_http_schemes() {
        let err = request_bytes(&http::Method::GET, "ftp://example.com/", &[], 0);
        assert!(matches!(err, Err(Error::UnsupportedScheme(_))));
    }
}
