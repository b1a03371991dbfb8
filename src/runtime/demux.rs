//! Readiness demultiplexer.
//!
//! Thin wrapper over `mio::Poll` (epoll on Linux, kqueue on macOS). Sources
//! are registered under a token equal to their file descriptor, so fired
//! events map straight back to the connection registry.
//!
//! mio arms its sources edge-triggered. Callers get level-triggered behavior
//! as long as they drain a readable socket until `WouldBlock` or re-arm it
//! with [`Demux::modify`], which reports current readiness again.

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use std::fmt;
use std::io;
use std::ops::BitOr;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Token reserved for the shutdown waker. Never a valid descriptor.
pub const WAKE_TOKEN: Token = Token(usize::MAX);

/// Readiness bits carried by an interest set or a fired event.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Mask(u8);

impl Mask {
    pub const NONE: Mask = Mask(0);
    pub const READABLE: Mask = Mask(0b0001);
    pub const WRITABLE: Mask = Mask(0b0010);
    /// Only ever reported, never part of an interest set.
    pub const ERROR: Mask = Mask(0b0100);
    /// Only ever reported, never part of an interest set.
    pub const HANGUP: Mask = Mask(0b1000);

    /// Check whether every bit of `other` is set.
    pub fn contains(self, other: Mask) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Convert the interest part of the mask into a mio interest set.
    fn interest(self) -> io::Result<Interest> {
        match (self.contains(Mask::READABLE), self.contains(Mask::WRITABLE)) {
            (true, true) => Ok(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Ok(Interest::READABLE),
            (false, true) => Ok(Interest::WRITABLE),
            (false, false) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "interest mask must contain READABLE or WRITABLE",
            )),
        }
    }
}

impl BitOr for Mask {
    type Output = Mask;

    fn bitor(self, rhs: Mask) -> Mask {
        Mask(self.0 | rhs.0)
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Mask::READABLE, "READABLE"),
            (Mask::WRITABLE, "WRITABLE"),
            (Mask::ERROR, "ERROR"),
            (Mask::HANGUP, "HANGUP"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.contains(bit) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("NONE")?;
        }
        Ok(())
    }
}

/// A descriptor reported ready by [`Demux::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredEvent {
    pub fd: RawFd,
    pub mask: Mask,
}

impl FiredEvent {
    fn from_mio(event: &mio::event::Event) -> Self {
        let mut mask = Mask::NONE;
        if event.is_readable() {
            mask = mask | Mask::READABLE;
        }
        if event.is_writable() {
            mask = mask | Mask::WRITABLE;
        }
        if event.is_error() {
            mask = mask | Mask::ERROR;
        }
        if event.is_read_closed() && event.is_write_closed() {
            mask = mask | Mask::HANGUP;
        }
        FiredEvent {
            fd: event.token().0 as RawFd,
            mask,
        }
    }
}

/// Readiness demultiplexer owned by the reactor thread.
pub struct Demux {
    poll: Poll,
    events: Events,
}

impl Demux {
    /// Create a demultiplexer returning at most `capacity` events per wait.
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity.max(1)),
        })
    }

    /// Create a waker that interrupts an in-progress [`Demux::wait`].
    pub fn waker(&self) -> io::Result<Waker> {
        Waker::new(self.poll.registry(), WAKE_TOKEN)
    }

    /// Start watching `source` under descriptor `fd`.
    pub fn add<S>(&self, source: &mut S, fd: RawFd, mask: Mask) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll
            .registry()
            .register(source, Token(fd as usize), mask.interest()?)
    }

    /// Replace the interest set of an already watched source.
    pub fn modify<S>(&self, source: &mut S, fd: RawFd, mask: Mask) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll
            .registry()
            .reregister(source, Token(fd as usize), mask.interest()?)
    }

    /// Stop watching `source`.
    pub fn delete<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().deregister(source)
    }

    /// Block until at least one source is ready or `timeout` expires.
    ///
    /// Fired events are appended to `fired`. Waker events are swallowed;
    /// the caller checks its own stop flag after every wait.
    pub fn wait(
        &mut self,
        timeout: Option<Duration>,
        fired: &mut Vec<FiredEvent>,
    ) -> io::Result<()> {
        self.poll.poll(&mut self.events, timeout)?;
        fired.extend(
            self.events
                .iter()
                .filter(|event| event.token() != WAKE_TOKEN)
                .map(FiredEvent::from_mio),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::TcpListener;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_mask_bits() {
        let mask = Mask::READABLE | Mask::HANGUP;
        assert!(mask.contains(Mask::READABLE));
        assert!(mask.contains(Mask::HANGUP));
        assert!(!mask.contains(Mask::WRITABLE));
        assert!(!mask.contains(Mask::NONE));
        assert!(Mask::NONE.is_empty());
        assert_eq!(format!("{:?}", mask), "READABLE | HANGUP");
        assert_eq!(format!("{:?}", Mask::NONE), "NONE");
    }

    #[test]
    fn test_interest_requires_read_or_write() {
        assert!(Mask::ERROR.interest().is_err());
        assert!(Mask::READABLE.interest().is_ok());
        assert!((Mask::READABLE | Mask::WRITABLE).interest().is_ok());
    }

    #[test]
    fn test_wait_reports_readable_and_writable() {
        let mut demux = Demux::new(16).unwrap();
        let mut listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let lfd = listener.as_raw_fd();
        demux.add(&mut listener, lfd, Mask::READABLE).unwrap();

        let mut client = std::net::TcpStream::connect(addr).unwrap();

        let mut fired = Vec::new();
        while fired.is_empty() {
            demux.wait(Some(Duration::from_secs(5)), &mut fired).unwrap();
        }
        assert_eq!(fired[0].fd, lfd);
        assert!(fired[0].mask.contains(Mask::READABLE));

        let (mut stream, _) = listener.accept().unwrap();
        let sfd = stream.as_raw_fd();
        demux.add(&mut stream, sfd, Mask::WRITABLE).unwrap();
        fired.clear();
        while !fired.iter().any(|e| e.fd == sfd) {
            demux.wait(Some(Duration::from_secs(5)), &mut fired).unwrap();
        }
        let event = fired.iter().find(|e| e.fd == sfd).unwrap();
        assert!(event.mask.contains(Mask::WRITABLE));

        client.write_all(b"ping").unwrap();
        demux.modify(&mut stream, sfd, Mask::READABLE).unwrap();
        fired.clear();
        while !fired.iter().any(|e| e.fd == sfd && e.mask.contains(Mask::READABLE)) {
            demux.wait(Some(Duration::from_secs(5)), &mut fired).unwrap();
        }

        demux.delete(&mut stream).unwrap();
    }

    #[test]
    fn test_waker_is_swallowed() {
        let mut demux = Demux::new(4).unwrap();
        let waker = demux.waker().unwrap();
        waker.wake().unwrap();
        let mut fired = Vec::new();
        demux.wait(Some(Duration::from_secs(1)), &mut fired).unwrap();
        assert!(fired.is_empty());
    }
}
