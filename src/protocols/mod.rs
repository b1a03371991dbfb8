//! Protocol implementations.
//!
//! Each protocol provides a per-connection codec implementing
//! [`crate::runtime::Connection`] and a factory the server loop uses to
//! build one per accepted socket.
//!
//! - `http`: HTTP/1.x request/response codec

pub mod http;
