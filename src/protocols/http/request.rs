//! Parsed HTTP request.

use bytes::Bytes;
use std::collections::HashMap;

const DEFAULT_METHOD: &str = "GET";
const DEFAULT_PATH: &str = "/index";

/// A request as seen by the message handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Path with the query string removed for GET requests.
    pub path: String,
    pub version: String,
    /// Header fields, case-sensitive.
    pub headers: HashMap<String, String>,
    /// Query string parameters, or form fields of a POST body.
    /// Kept percent-encoded as received.
    pub query_params: HashMap<String, String>,
    /// Raw body bytes.
    pub content: Bytes,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self {
            method: DEFAULT_METHOD.to_string(),
            path: DEFAULT_PATH.to_string(),
            version: String::new(),
            headers: HashMap::new(),
            query_params: HashMap::new(),
            content: Bytes::new(),
        }
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the state of a freshly constructed request.
    pub fn clear(&mut self) {
        self.method.clear();
        self.method.push_str(DEFAULT_METHOD);
        self.path.clear();
        self.path.push_str(DEFAULT_PATH);
        self.version.clear();
        self.headers.clear();
        self.query_params.clear();
        self.content = Bytes::new();
    }

    /// Look up a header by exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Look up a query or form parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(String::as_str)
    }

    /// Serialize the request line and headers back to wire form.
    ///
    /// Header order follows the map and is not stable.
    pub fn serialize_head(&self) -> String {
        let mut out = format!("{} {} {}\r\n", self.method, self.path, self.version);
        for (key, value) in &self.headers {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let req = HttpRequest::new();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/index");
        assert!(req.version.is_empty());
        assert!(req.headers.is_empty());
        assert!(req.content.is_empty());
    }

    #[test]
    fn test_clear_restores_defaults() {
        let mut req = HttpRequest::new();
        req.method = "POST".to_string();
        req.path = "/upload".to_string();
        req.version = "HTTP/1.1".to_string();
        req.headers.insert("Host".to_string(), "x".to_string());
        req.query_params.insert("a".to_string(), "1".to_string());
        req.content = Bytes::from_static(b"body");

        req.clear();
        assert_eq!(req, HttpRequest::new());
    }

    #[test]
    fn test_accessors() {
        let mut req = HttpRequest::new();
        req.headers.insert("Host".to_string(), "example".to_string());
        req.query_params.insert("q".to_string(), "rust".to_string());
        assert_eq!(req.header("Host"), Some("example"));
        assert_eq!(req.header("host"), None);
        assert_eq!(req.param("q"), Some("rust"));
    }

    #[test]
    fn test_serialize_head() {
        let mut req = HttpRequest::new();
        req.path = "/hello".to_string();
        req.version = "HTTP/1.1".to_string();
        req.headers.insert("Host".to_string(), "x".to_string());
        assert_eq!(req.serialize_head(), "GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
    }
}
