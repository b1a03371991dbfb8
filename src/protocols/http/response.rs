//! HTTP response as produced by the message handler.
//!
//! The codec treats `content` as opaque: whatever the handler writes is
//! sent verbatim. [`HttpResponse::write_simple`] is a convenience for
//! handlers that want a minimal well-formed HTTP/1.1 reply.

use bytes::{BufMut, BytesMut};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub content: BytesMut,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.content.clear();
    }

    /// Append raw bytes to the response.
    pub fn write(&mut self, data: &[u8]) {
        self.content.extend_from_slice(data);
    }

    /// Replace the content with a status line, `Content-Type`,
    /// `Content-Length` and `body`.
    pub fn write_simple(&mut self, status: u16, reason: &str, content_type: &str, body: &[u8]) {
        self.content.clear();
        self.content.reserve(body.len() + 128);
        self.content
            .put_slice(format!("HTTP/1.1 {status} {reason}\r\n").as_bytes());
        self.content
            .put_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        self.content
            .put_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
        self.content.put_slice(body);
    }

    /// Copy the content into `buf`, truncating to its length.
    ///
    /// Returns the number of bytes copied.
    pub fn serialize_to(&self, buf: &mut [u8]) -> usize {
        let len = self.content.len().min(buf.len());
        buf[..len].copy_from_slice(&self.content[..len]);
        len
    }
}
