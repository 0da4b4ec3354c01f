//! Inbound request descriptor.

use crate::pattern::normalize_path;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use std::collections::HashMap;

/// Everything the matcher and responder need to know about one request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Normalized path (no repeated or trailing slashes)
    pub path: String,
    /// Header map with lower-cased names; repeated headers keep the first value
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Option<Bytes>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: normalize_path(path),
            headers: HashMap::new(),
            query: HashMap::new(),
            body: None,
        }
    }

    pub fn with_query(mut self, query_string: &str) -> Self {
        self.query = parse_query_string(query_string);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                self.headers
                    .entry(name.as_str().to_string())
                    .or_insert_with(|| value.to_string());
            }
        }
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = (!body.is_empty()).then_some(body);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Body as UTF-8 text, if it is valid UTF-8.
    pub fn body_text(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// Parse a query string into key-value pairs.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        if let Some((key, value)) = part.split_once('=') {
            params.insert(percent_decode(key), percent_decode(value));
        } else {
            params.insert(percent_decode(part), String::new());
        }
    }

    params
}

/// Decode `%XX` escapes and `+`. Malformed escapes are kept as-is.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                if let Some(byte) = hex {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(b'%');
            }
            b'+' => out.push(b' '),
            b => out.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string("foo=bar&baz=qux");
        assert_eq!(params.get("foo"), Some(&"bar".to_string()));
        assert_eq!(params.get("baz"), Some(&"qux".to_string()));

        let params = parse_query_string("name=John%20Doe&flag&city=S%C3%A3o+Paulo");
        assert_eq!(params.get("name"), Some(&"John Doe".to_string()));
        assert_eq!(params.get("flag"), Some(&String::new()));
        assert_eq!(params.get("city"), Some(&"São Paulo".to_string()));
    }

    #[test]
    fn test_malformed_escape_kept() {
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }

    #[test]
    fn test_descriptor_normalizes_path_and_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-mockmate-scenario", "beta".parse().unwrap());

        let descriptor = RequestDescriptor::new(Method::GET, "/users//42/")
            .with_headers(&headers)
            .with_body(Bytes::new());

        assert_eq!(descriptor.path, "/users/42");
        assert_eq!(descriptor.header("x-mockmate-scenario"), Some("beta"));
        assert_eq!(descriptor.header("X-MOCKMATE-SCENARIO"), Some("beta"));
        assert!(descriptor.body.is_none());
    }
}
