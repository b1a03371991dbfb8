//! Per-connection codec contract and the connection registry.
//!
//! The reactor drives any type implementing [`Connection`]; a [`ConnFactory`]
//! builds one per accepted socket. The registry owns every live connection
//! and publishes a read-only directory of them behind a readers-writer lock
//! so other threads can enumerate connections while the reactor runs.

use chrono::{DateTime, TimeZone, Utc};
use mio::net::TcpStream;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Outcome of a read pass over a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The socket would block before a full request arrived.
    ReadHalf,
    /// One full request was handled.
    ReadAll,
    /// Peer closed or a fatal socket error occurred.
    ReadClose,
    /// Size violation or syntactically invalid request.
    ReadError,
    /// Reserved for codecs with their own buffer limits.
    FullError,
    /// Reserved for codecs with their own parse failures.
    ParseError,
}

/// Outcome of a write pass over a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Every queued byte was written.
    WriteAll,
    /// The socket would block with bytes still queued.
    WriteHalf,
    /// Fatal socket error.
    WriteError,
}

/// A per-connection protocol codec driven by the reactor.
pub trait Connection {
    /// Read from `stream` and make as much progress as possible.
    fn get_request<R: Read>(&mut self, stream: &mut R) -> ReadStatus;

    /// Flush queued reply bytes to `stream`.
    fn send_reply<W: Write>(&mut self, stream: &mut W) -> WriteStatus;

    /// Whether a reply is queued for sending.
    fn is_reply(&self) -> bool;

    fn set_is_reply(&mut self, is_reply: bool);

    /// Whether bytes of a following request are already buffered.
    ///
    /// The reactor re-drives the read path after a reply completes when
    /// this is true, since no new readiness may ever arrive for them.
    fn has_buffered_input(&self) -> bool {
        false
    }
}

/// Builds the codec for a freshly accepted socket.
pub trait ConnFactory {
    type Conn: Connection;

    fn new_conn(&mut self, fd: RawFd, peer: &str) -> Self::Conn;
}

/// Identity and activity of a connection, shared with observer threads.
#[derive(Debug)]
pub struct ConnMeta {
    fd: RawFd,
    peer: String,
    /// Milliseconds since the Unix epoch.
    last_interaction: AtomicI64,
}

impl ConnMeta {
    pub fn new(fd: RawFd, peer: String) -> Self {
        Self {
            fd,
            peer,
            last_interaction: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Peer identity as `ip:port`.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Record activity now.
    pub fn touch(&self) {
        self.last_interaction
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_interaction(&self) -> DateTime<Utc> {
        let millis = self.last_interaction.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Snapshot for reporting.
    pub fn info(&self) -> ConnectionInfo {
        let last_interaction = self.last_interaction();
        let idle = (Utc::now() - last_interaction)
            .to_std()
            .unwrap_or(Duration::ZERO);
        ConnectionInfo {
            fd: self.fd,
            peer: self.peer.clone(),
            last_interaction,
            idle,
        }
    }
}

/// Point-in-time view of one connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub fd: RawFd,
    pub peer: String,
    pub last_interaction: DateTime<Utc>,
    pub idle: Duration,
}

/// Directory of live connections readable from any thread.
pub type SharedConnections = Arc<RwLock<HashMap<RawFd, Arc<ConnMeta>>>>;

/// A live connection: its socket, codec and shared identity.
pub struct Conn<C> {
    pub stream: TcpStream,
    pub codec: C,
    pub meta: Arc<ConnMeta>,
}

/// Registry of live connections keyed by file descriptor.
///
/// Codec state stays with the reactor; only the [`ConnMeta`] records are
/// visible through [`SharedConnections`]. Both maps change together under
/// the exclusive lock, so an observer never sees a connection that is half
/// inserted or already dropped.
pub struct ConnectionRegistry<C> {
    connections: HashMap<RawFd, Conn<C>>,
    shared: SharedConnections,
}

impl<C> ConnectionRegistry<C> {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            shared: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Handle for observer threads.
    pub fn shared(&self) -> SharedConnections {
        Arc::clone(&self.shared)
    }

    /// Insert a connection, replacing nothing.
    ///
    /// Returns the connection back if `fd` is already present.
    pub fn insert(&mut self, fd: RawFd, conn: Conn<C>) -> Result<(), Conn<C>> {
        if self.connections.contains_key(&fd) {
            return Err(conn);
        }
        let mut shared = self.shared.write().unwrap_or_else(PoisonError::into_inner);
        shared.insert(fd, Arc::clone(&conn.meta));
        self.connections.insert(fd, conn);
        Ok(())
    }

    /// Reactor-side lookup.
    ///
    /// Only the reactor mutates the registry, so no lock is needed to keep
    /// the entry alive for the duration of the borrow.
    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut Conn<C>> {
        self.connections.get_mut(&fd)
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.connections.contains_key(&fd)
    }

    /// Remove a connection, handing ownership back to the caller.
    pub fn remove(&mut self, fd: RawFd) -> Option<Conn<C>> {
        let mut shared = self.shared.write().unwrap_or_else(PoisonError::into_inner);
        shared.remove(&fd);
        self.connections.remove(&fd)
    }

    /// Remove every connection at once.
    pub fn drain(&mut self) -> Vec<Conn<C>> {
        let mut shared = self.shared.write().unwrap_or_else(PoisonError::into_inner);
        shared.clear();
        self.connections.drain().map(|(_, conn)| conn).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl<C> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::TcpListener;
    use std::os::unix::io::AsRawFd;

    struct Nop;

    fn connected_pair(listener: &TcpListener) -> (std::net::TcpStream, TcpStream) {
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        loop {
            match listener.accept() {
                Ok((stream, _)) => return (client, stream),
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("accept failed: {e}"),
            }
        }
    }

    #[test]
    fn test_meta_touch_and_info() {
        let meta = ConnMeta::new(7, "10.0.0.1:4000".to_string());
        let before = meta.last_interaction();
        std::thread::sleep(Duration::from_millis(5));
        meta.touch();
        assert!(meta.last_interaction() >= before);

        let info = meta.info();
        assert_eq!(info.fd, 7);
        assert_eq!(info.peer, "10.0.0.1:4000");
        assert!(info.idle < Duration::from_secs(5));
    }

    #[test]
    fn test_registry_insert_remove() {
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let (_client, stream) = connected_pair(&listener);
        let fd = stream.as_raw_fd();

        let mut registry: ConnectionRegistry<Nop> = ConnectionRegistry::new();
        let shared = registry.shared();

        let meta = Arc::new(ConnMeta::new(fd, "127.0.0.1:1".to_string()));
        registry
            .insert(
                fd,
                Conn {
                    stream,
                    codec: Nop,
                    meta,
                },
            )
            .ok()
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(fd));
        assert!(registry.get_mut(fd).is_some());
        assert_eq!(shared.read().unwrap().len(), 1);

        let removed = registry.remove(fd).unwrap();
        assert_eq!(removed.meta.fd(), fd);
        assert!(registry.is_empty());
        assert!(shared.read().unwrap().is_empty());
        assert!(registry.remove(fd).is_none());
    }

    #[test]
    fn test_registry_rejects_duplicate_fd() {
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let (_c1, s1) = connected_pair(&listener);
        let (_c2, s2) = connected_pair(&listener);
        let fd = s1.as_raw_fd();

        let mut registry: ConnectionRegistry<Nop> = ConnectionRegistry::new();
        let conn = |stream| Conn {
            stream,
            codec: Nop,
            meta: Arc::new(ConnMeta::new(fd, String::new())),
        };
        assert!(registry.insert(fd, conn(s1)).is_ok());
        assert!(registry.insert(fd, conn(s2)).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_drain() {
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut registry: ConnectionRegistry<Nop> = ConnectionRegistry::new();
        let mut clients = Vec::new();
        for _ in 0..3 {
            let (client, stream) = connected_pair(&listener);
            let fd = stream.as_raw_fd();
            let meta = Arc::new(ConnMeta::new(fd, String::new()));
            assert!(registry
                .insert(
                    fd,
                    Conn {
                        stream,
                        codec: Nop,
                        meta
                    }
                )
                .is_ok());
            clients.push(client);
        }

        let shared = registry.shared();
        let drained = registry.drain();
        assert_eq!(drained.len(), 3);
        assert!(registry.is_empty());
        assert!(shared.read().unwrap().is_empty());
    }
}
