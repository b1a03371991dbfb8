//! holy-http: a single-threaded reactor TCP server with a pluggable
//! per-connection codec and an HTTP/1.x codec built on it.

pub mod config;
pub mod protocols;
pub mod runtime;

pub use config::{Config, ConfigError};
pub use protocols::http::{HttpConn, HttpConnFactory, HttpHandler, HttpRequest, HttpResponse};
pub use runtime::{
    ConnFactory, Connection, ConnectionInfo, DefaultHandler, ReadStatus, Server, ServerHandle,
    ServerHandler, WriteStatus,
};
