use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

/// Which side(s) of a `Transport` a caller wants to know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u8);

impl Interest {
    pub const READABLE: Interest = Interest(0b01);
    pub const WRITABLE: Interest = Interest(0b10);

    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;
    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

/// Result of a `Transport::poll_ready` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// The byte-stream transport the endpoint is layered on: blocking and
/// non-blocking read/write, a readiness-polling facility, and a half-close
/// operation.
///
/// `TcpStream` is the only implementation this crate ships; the trait
/// exists so the I/O worker (`crate::endpoint`) can be driven in tests
/// against an in-process loopback pair without a real network round trip
/// beyond localhost.
pub trait Transport: Read + Write + Send {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Level-triggered readiness poll: blocks up to `timeout` and reports
    /// which requested interest(s) are ready, or neither if the timeout
    /// elapsed first. Implementations on edge-triggered readiness APIs
    /// must loop internally until the level-triggered contract holds.
    fn poll_ready(&self, interest: Interest, timeout: Duration) -> io::Result<Readiness>;

    fn shutdown_write(&self) -> io::Result<()>;

    /// Disable the read side. Used to unblock a peer thread parked in a
    /// blocking read on this same underlying socket — a pending read
    /// returns immediately (as EOF or an error) once this is called.
    fn shutdown_read(&self) -> io::Result<()>;

    /// Duplicate this transport so a second handle can call
    /// `shutdown_read`/`shutdown_write` from another thread while the
    /// original continues to be read from and written to.
    fn try_clone(&self) -> io::Result<Self>
    where
        Self: Sized;
}

impl Transport for TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn poll_ready(&self, interest: Interest, timeout: Duration) -> io::Result<Readiness> {
        let mut events: i16 = 0;
        if interest.contains(Interest::READABLE) {
            events |= libc::POLLIN;
        }
        if interest.contains(Interest::WRITABLE) {
            events |= libc::POLLOUT;
        }

        let mut pfd = libc::pollfd {
            fd: self.as_raw_fd(),
            events,
            revents: 0,
        };

        // `poll(2)` takes a signed millisecond timeout; saturate rather
        // than overflow for callers that pass an enormous Duration.
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

        let rv = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rv < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Readiness {
            readable: (pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR)) != 0,
            writable: (pfd.revents & (libc::POLLOUT | libc::POLLERR)) != 0,
        })
    }

    fn shutdown_write(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Write)
    }

    fn shutdown_read(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Read)
    }

    fn try_clone(&self) -> io::Result<Self> {
        TcpStream::try_clone(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    #[test]
    fn poll_ready_reports_writable_immediately() {
        let (server, _client) = loopback_pair();
        let readiness = server
            .poll_ready(Interest::WRITABLE, Duration::from_millis(100))
            .unwrap();
        assert!(readiness.writable);
    }

    #[test]
    fn poll_ready_times_out_when_nothing_arrives() {
        let (server, _client) = loopback_pair();
        let readiness = server
            .poll_ready(Interest::READABLE, Duration::from_millis(20))
            .unwrap();
        assert!(!readiness.readable);
    }

    #[test]
    fn poll_ready_reports_readable_after_a_write() {
        let (server, mut client) = loopback_pair();
        client.write_all(b"hi").unwrap();
        let readiness = server
            .poll_ready(Interest::READABLE, Duration::from_millis(500))
            .unwrap();
        assert!(readiness.readable);
    }
}
