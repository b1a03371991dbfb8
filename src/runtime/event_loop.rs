//! Single-threaded reactor.
//!
//! One thread owns the demultiplexer, the listeners and every connection.
//! Accept events create connections through the [`ConnFactory`]; client
//! events drive the connection's codec and flip the socket's interest
//! between readable (waiting for a request) and writable (flushing a reply).
//!
//! Other threads interact only through a [`ServerHandle`]: stopping the
//! loop and enumerating live connections.

use crate::config::Config;
use crate::runtime::connection::{
    Conn, ConnFactory, ConnMeta, Connection, ConnectionInfo, ConnectionRegistry, ReadStatus,
    SharedConnections, WriteStatus,
};
use crate::runtime::demux::{Demux, FiredEvent, Mask};
use crate::runtime::listener::Listeners;
use mio::net::TcpStream;
use mio::Waker;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Longest wait before retrying a listener whose accept failed.
const ACCEPT_RETRY: Duration = Duration::from_millis(50);

/// Server-level hooks, called on the reactor thread.
pub trait ServerHandler {
    /// Decide whether to keep a connection from `ip`. Rejected sockets are
    /// closed immediately.
    fn access_handle(&mut self, _ip: &str) -> bool {
        true
    }

    /// Called every `cron_interval` milliseconds.
    fn cron_handle(&mut self, _server: &ServerHandle) {}
}

/// Accepts everyone, does nothing on cron.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHandler;

impl ServerHandler for DefaultHandler {}

/// Thread-safe handle to a running server.
#[derive(Clone)]
pub struct ServerHandle {
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
    connections: SharedConnections,
}

impl ServerHandle {
    /// Ask the reactor to exit and wake it if it is waiting.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake server loop");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Number of live connections.
    pub fn conn_count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Snapshot of every live connection.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|meta| meta.info())
            .collect()
    }
}

/// What the event handler does after one branch.
enum Step {
    /// Nothing more to do for this event.
    Done,
    /// Go on with the next branch.
    Continue,
    /// Tear the connection down.
    Close,
}

/// Reactor server generic over the per-connection codec.
pub struct Server<F: ConnFactory, H = DefaultHandler> {
    demux: Demux,
    listeners: Listeners,
    registry: ConnectionRegistry<F::Conn>,
    factory: F,
    handler: H,
    cron_interval: Option<Duration>,
    /// Listeners that hit an accept error with connections possibly still
    /// queued. No new readiness edge arrives for those, so they are polled.
    pending_accept: Vec<RawFd>,
    handle: ServerHandle,
}

impl<F: ConnFactory> Server<F, DefaultHandler> {
    /// Bind the configured listeners with default hooks.
    pub fn new(config: &Config, factory: F) -> io::Result<Self> {
        Self::with_handler(config, factory, DefaultHandler)
    }
}

impl<F: ConnFactory, H: ServerHandler> Server<F, H> {
    /// Bind the configured listeners with custom hooks.
    pub fn with_handler(config: &Config, factory: F, handler: H) -> io::Result<Self> {
        let demux = Demux::new(config.events_capacity)?;
        let mut listeners = Listeners::bind(&config.bind_ips, config.port, config.backlog)?;
        listeners.register(&demux)?;

        let registry = ConnectionRegistry::new();
        let handle = ServerHandle {
            stop: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(demux.waker()?),
            connections: registry.shared(),
        };

        Ok(Self {
            demux,
            listeners,
            registry,
            factory,
            handler,
            cron_interval: (config.cron_interval > 0)
                .then(|| Duration::from_millis(config.cron_interval)),
            pending_accept: Vec::new(),
            handle,
        })
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Addresses the listeners are bound to.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.local_addrs()
    }

    pub fn conn_count(&self) -> usize {
        self.registry.len()
    }

    /// Run until [`ServerHandle::stop`] is called.
    ///
    /// Returns an error only if waiting on the demultiplexer fails.
    /// Every remaining connection is closed before returning.
    pub fn run(&mut self) -> io::Result<()> {
        info!(
            addrs = ?self.listeners.local_addrs(),
            cron_interval = ?self.cron_interval,
            "Server loop started"
        );

        let mut fired = Vec::new();
        let mut next_cron = self.cron_interval.map(|interval| Instant::now() + interval);

        let result = loop {
            if self.handle.is_stopped() {
                break Ok(());
            }

            let mut timeout = next_cron.map(|at| at.saturating_duration_since(Instant::now()));
            if !self.pending_accept.is_empty() {
                timeout = Some(timeout.map_or(ACCEPT_RETRY, |t| t.min(ACCEPT_RETRY)));
            }
            fired.clear();
            if let Err(e) = self.demux.wait(timeout, &mut fired) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Poll failed");
                break Err(e);
            }

            let retry = std::mem::take(&mut self.pending_accept);
            for event in fired.iter().copied() {
                if self.listeners.contains(event.fd) {
                    self.accept_connections(event.fd);
                } else {
                    self.handle_conn_event(event);
                }
            }
            for fd in retry {
                if !self.pending_accept.contains(&fd) {
                    self.accept_connections(fd);
                }
            }

            if let (Some(interval), Some(at)) = (self.cron_interval, next_cron) {
                let now = Instant::now();
                if now >= at {
                    self.handler.cron_handle(&self.handle);
                    next_cron = Some(now + interval);
                }
            }
        };

        self.cleanup();
        info!("Server loop stopped");
        result
    }

    fn accept_connections(&mut self, listener_fd: RawFd) {
        loop {
            match self.listeners.accept(listener_fd) {
                Ok(Some((stream, peer))) => {
                    if !self.handler.access_handle(&peer.ip().to_string()) {
                        debug!(peer = %peer, "Connection refused by access handler");
                        continue;
                    }
                    self.handle_new_conn(stream, peer);
                }
                Ok(None) => break,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    debug!(error = %e, "Accept interrupted");
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    if !self.pending_accept.contains(&listener_fd) {
                        self.pending_accept.push(listener_fd);
                    }
                    break;
                }
            }
        }
    }

    fn handle_new_conn(&mut self, stream: TcpStream, peer: SocketAddr) {
        // Sockets from a mio listener are already non-blocking.
        let fd = stream.as_raw_fd();
        let peer = peer.to_string();
        let codec = self.factory.new_conn(fd, &peer);
        let meta = Arc::new(ConnMeta::new(fd, peer));

        if let Err(conn) = self.registry.insert(fd, Conn { stream, codec, meta }) {
            warn!(fd, peer = %conn.meta.peer(), "Descriptor already registered");
            return;
        }

        let registered = match self.registry.get_mut(fd) {
            Some(conn) => self.demux.add(&mut conn.stream, fd, Mask::READABLE),
            None => return,
        };
        match registered {
            Ok(()) => debug!(fd, "Accepted connection"),
            Err(e) => {
                warn!(fd, error = %e, "Failed to register connection");
                self.registry.remove(fd);
            }
        }
    }

    fn handle_conn_event(&mut self, event: FiredEvent) {
        let fd = event.fd;
        let Some(conn) = self.registry.get_mut(fd) else {
            trace!(fd, "Event for unknown descriptor");
            return;
        };

        let mut should_close = false;

        if event.mask.contains(Mask::READABLE) {
            match on_readable(&self.demux, fd, conn) {
                Step::Done => return,
                Step::Continue => {}
                Step::Close => should_close = true,
            }
        }

        if !should_close && event.mask.contains(Mask::WRITABLE) {
            match on_writable(&self.demux, fd, conn) {
                Step::Done => return,
                Step::Continue => {}
                Step::Close => should_close = true,
            }
        }

        if should_close || event.mask.contains(Mask::ERROR) || event.mask.contains(Mask::HANGUP) {
            self.close_conn(fd);
        }
    }

    fn close_conn(&mut self, fd: RawFd) {
        if let Some(mut conn) = self.registry.remove(fd) {
            if let Err(e) = self.demux.delete(&mut conn.stream) {
                debug!(fd, error = %e, "Failed to deregister connection");
            }
            debug!(fd, peer = %conn.meta.peer(), "Connection closed");
        }
    }

    /// Close every connection still open.
    fn cleanup(&mut self) {
        let count = close_all(&self.demux, &mut self.registry);
        if count > 0 {
            info!(count, "Closed remaining connections");
        }
    }
}

impl<F: ConnFactory, H> Drop for Server<F, H> {
    fn drop(&mut self) {
        close_all(&self.demux, &mut self.registry);
    }
}

/// Deregister and drop every connection. Returns how many were closed.
fn close_all<C>(demux: &Demux, registry: &mut ConnectionRegistry<C>) -> usize {
    let conns = registry.drain();
    let count = conns.len();
    for mut conn in conns {
        let fd = conn.meta.fd();
        if let Err(e) = demux.delete(&mut conn.stream) {
            debug!(fd, error = %e, "Failed to deregister connection");
        }
    }
    count
}

fn on_readable<C: Connection>(demux: &Demux, fd: RawFd, conn: &mut Conn<C>) -> Step {
    let status = conn.codec.get_request(&mut conn.stream);
    conn.meta.touch();

    match status {
        ReadStatus::ReadAll if conn.codec.is_reply() => {
            match demux.modify(&mut conn.stream, fd, Mask::WRITABLE) {
                Ok(()) => Step::Continue,
                Err(e) => {
                    warn!(fd, error = %e, "Failed to watch for writability");
                    Step::Close
                }
            }
        }
        ReadStatus::ReadAll | ReadStatus::ReadHalf => Step::Done,
        status => {
            debug!(fd, peer = %conn.meta.peer(), ?status, "Read failed");
            Step::Close
        }
    }
}

fn on_writable<C: Connection>(demux: &Demux, fd: RawFd, conn: &mut Conn<C>) -> Step {
    match conn.codec.send_reply(&mut conn.stream) {
        WriteStatus::WriteAll => {
            conn.codec.set_is_reply(false);
            if let Err(e) = demux.modify(&mut conn.stream, fd, Mask::READABLE) {
                warn!(fd, error = %e, "Failed to watch for readability");
                return Step::Close;
            }
            // A following request may already be buffered with nothing left
            // on the socket to signal it.
            if conn.codec.has_buffered_input() {
                if let Step::Close = on_readable(demux, fd, conn) {
                    return Step::Close;
                }
            }
            Step::Continue
        }
        WriteStatus::WriteHalf => Step::Done,
        WriteStatus::WriteError => {
            debug!(fd, peer = %conn.meta.peer(), "Write failed");
            Step::Close
        }
    }
}
