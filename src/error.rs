use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

/// One of the five HTTP error responses the handshake parser can emit.
///
/// Carries enough to render the exact status line (and, for 426, the
/// `Connection`/`Upgrade` headers) without the endpoint needing its own
/// copy of HTTP status text.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("400 Bad Request")]
    BadRequest,

    #[error("404 Not Found")]
    NotFound,

    #[error("405 Method Not Allowed")]
    MethodNotAllowed,

    #[error("408 Request Timeout")]
    RequestTimeout,

    #[error("426 Upgrade Required")]
    UpgradeRequired,
}

impl HandshakeError {
    /// Status line (without trailing CRLF) for this error.
    pub fn status_line(&self) -> &'static str {
        match self {
            HandshakeError::BadRequest => "HTTP/1.1 400 Bad Request",
            HandshakeError::NotFound => "HTTP/1.1 404 Not Found",
            HandshakeError::MethodNotAllowed => "HTTP/1.1 405 Method Not Allowed",
            HandshakeError::RequestTimeout => "HTTP/1.1 408 Request Timeout",
            HandshakeError::UpgradeRequired => "HTTP/1.1 426 Upgrade Required",
        }
    }

    /// Whether `Connection: Upgrade` / `Upgrade: websocket` headers accompany
    /// the status line (only the 426 response carries them).
    pub fn carries_upgrade_headers(&self) -> bool {
        matches!(self, HandshakeError::UpgradeRequired)
    }

    /// Render the full HTTP response this error produces.
    pub fn to_response(&self) -> String {
        if self.carries_upgrade_headers() {
            format!(
                "{}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n",
                self.status_line()
            )
        } else {
            format!("{}\r\n\r\n", self.status_line())
        }
    }
}

/// Unified error type for the endpoint's public API and internal worker.
///
/// Handshake, protocol, transport, usage and timeout errors all surface
/// through this one enum.
#[derive(Error, Debug)]
pub enum Error {
    /// The handshake failed; the matching HTTP error response has already
    /// been written to the transport before this is raised from `accept`.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),

    /// A framing rule other than opcode validity was violated (RSV bits,
    /// fragmentation ordering, oversized payloads). Maps to close code 1002.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// The peer used an opcode outside RFC 6455's defined set. Maps to close
    /// code 1003, distinct from `Protocol`'s 1002.
    #[error("unsupported opcode")]
    UnsupportedOpcode,

    /// The endpoint is closed; no further send/recv/ping is possible.
    #[error("websocket is closed")]
    Closed,

    /// A blocking call did not resolve before its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The promise behind a call was cancelled before it resolved.
    #[error("operation was cancelled")]
    Cancelled,

    /// Programmer error: `accept` called twice, or an operation attempted
    /// before a successful `accept`.
    #[error("usage error: {0}")]
    Usage(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
