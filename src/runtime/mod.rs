//! Reactor runtime for connection-oriented servers.
//!
//! - `Demux`: readiness demultiplexer over mio (epoll/kqueue)
//! - `Listeners`: non-blocking TCP listeners, one per bind address
//! - `ConnectionRegistry`: fd-keyed connections plus a lock-protected
//!   directory other threads can read
//! - `Server`: the single-threaded event loop tying them together
//!
//! Protocols plug in by implementing [`Connection`] and [`ConnFactory`].

mod connection;
mod demux;
mod event_loop;
mod listener;

pub use connection::{
    Conn, ConnFactory, ConnMeta, Connection, ConnectionInfo, ConnectionRegistry, ReadStatus,
    SharedConnections, WriteStatus,
};
pub use demux::{Demux, FiredEvent, Mask, WAKE_TOKEN};
pub use event_loop::{DefaultHandler, Server, ServerHandle, ServerHandler};
pub use listener::Listeners;
