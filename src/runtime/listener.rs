//! Listening endpoints.
//!
//! One port bound on every configured address (all interfaces when no
//! address is given). The set is fixed after startup.

use crate::runtime::demux::{Demux, Mask};
use mio::net::{TcpListener, TcpStream};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::info;

/// Bound, non-blocking listening sockets sharing one port.
pub struct Listeners {
    listeners: Vec<TcpListener>,
}

impl Listeners {
    /// Bind `port` on each address in `bind_ips`.
    ///
    /// An empty `bind_ips` binds the wildcard address.
    pub fn bind(bind_ips: &[String], port: u16, backlog: i32) -> io::Result<Self> {
        let ips: Vec<IpAddr> = if bind_ips.is_empty() {
            vec![IpAddr::V4(Ipv4Addr::UNSPECIFIED)]
        } else {
            bind_ips
                .iter()
                .map(|ip| {
                    ip.parse::<IpAddr>().map_err(|e| {
                        io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("invalid bind address '{ip}': {e}"),
                        )
                    })
                })
                .collect::<io::Result<_>>()?
        };

        let mut listeners: Vec<TcpListener> = Vec::with_capacity(ips.len());
        for ip in ips {
            // An ephemeral port is picked once and shared by every address.
            let port = match listeners.first() {
                Some(first) if port == 0 => first.local_addr()?.port(),
                _ => port,
            };
            let listener = create_listener(SocketAddr::new(ip, port), backlog)?;
            let listener = TcpListener::from_std(listener);
            info!(addr = %listener.local_addr()?, "Listening");
            listeners.push(listener);
        }

        Ok(Self { listeners })
    }

    /// Register every listener for readability.
    pub fn register(&mut self, demux: &Demux) -> io::Result<()> {
        for listener in &mut self.listeners {
            let fd = listener.as_raw_fd();
            demux.add(listener, fd, Mask::READABLE)?;
        }
        Ok(())
    }

    /// Check whether `fd` belongs to one of the listeners.
    pub fn contains(&self, fd: RawFd) -> bool {
        self.listeners.iter().any(|l| l.as_raw_fd() == fd)
    }

    /// Accept one pending connection on the listener owning `fd`.
    ///
    /// Returns `Ok(None)` once the backlog is drained.
    pub fn accept(&self, fd: RawFd) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        let listener = self
            .listeners
            .iter()
            .find(|l| l.as_raw_fd() == fd)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "listener not found"))?;

        match listener.accept() {
            Ok(pair) => Ok(Some(pair)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Addresses the listeners are actually bound to.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR set.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_loopback() {
        let listeners = Listeners::bind(&["127.0.0.1".to_string()], 0, 128).unwrap();
        assert_eq!(listeners.len(), 1);
        let addr = listeners.local_addrs()[0];
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_ephemeral_port_shared_across_addresses() {
        let ips = vec!["127.0.0.1".to_string(), "127.0.0.2".to_string()];
        let listeners = Listeners::bind(&ips, 0, 128).unwrap();
        assert_eq!(listeners.len(), 2);
        let addrs = listeners.local_addrs();
        assert_ne!(addrs[0].port(), 0);
        assert_eq!(addrs[0].port(), addrs[1].port());
        assert_eq!(addrs[1].ip(), "127.0.0.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_bind_wildcard_when_empty() {
        let listeners = Listeners::bind(&[], 0, 128).unwrap();
        assert_eq!(listeners.len(), 1);
        assert!(listeners.local_addrs()[0].ip().is_unspecified());
    }

    #[test]
    fn test_invalid_address() {
        let err = Listeners::bind(&["not-an-ip".to_string()], 0, 128)
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_accept_drains_to_none() {
        let listeners = Listeners::bind(&["127.0.0.1".to_string()], 0, 128).unwrap();
        let addr = listeners.local_addrs()[0];
        let fd = listeners.listeners[0].as_raw_fd();
        assert!(listeners.contains(fd));
        assert!(!listeners.contains(fd + 1000));

        assert!(listeners.accept(fd).unwrap().is_none());

        let _client = std::net::TcpStream::connect(addr).unwrap();
        let mut accepted = None;
        for _ in 0..100 {
            if let Some(pair) = listeners.accept(fd).unwrap() {
                accepted = Some(pair);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        let (_stream, peer) = accepted.expect("connection accepted");
        assert_eq!(peer.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(listeners.accept(fd).unwrap().is_none());
    }
}
