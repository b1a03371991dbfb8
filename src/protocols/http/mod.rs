//! HTTP/1.x connection codec.
//!
//! A deliberately small subset of HTTP/1:
//! - Request line, header fields and an optional `Content-Length` body
//! - Query strings on GET and form-encoded bodies on POST parsed into
//!   parameters (kept percent-encoded)
//! - One request in flight per connection; bytes that follow a request in
//!   the same read are kept and parsed as the next request
//!
//! The response is whatever the [`HttpHandler`] writes; no status line or
//! headers are added.
//!
//! ## Limits
//!
//! ```text
//! Header block:  64 KiB
//! Whole message:  8 MiB (requests are rejected, responses truncated)
//! ```

pub mod conn;
pub mod parser;
pub mod request;
pub mod response;

pub use conn::{HttpConn, HttpConnFactory, HttpHandler, MAX_HEADER, MAX_MESSAGE};
pub use parser::ParseError;
pub use request::HttpRequest;
pub use response::HttpResponse;
