//! A synchronous, thread-based server-side WebSocket endpoint.
//!
//! This crate wraps one accepted `TcpStream` (or anything implementing
//! [`Transport`]) in an [`Endpoint`]: it performs the HTTP/1.1 Upgrade
//! handshake, then spawns a single background I/O worker thread that owns
//! the socket and mediates between application threads calling
//! `send`/`recv`/`ping`/`close` and the wire.
//!
//! It follows [RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455) as
//! a server-only subset: no TLS, no client-role handshakes, no
//! `permessage-deflate`, no subprotocol negotiation. See [`Endpoint`] for
//! the main entry point, or [`WsServer`] for a ready-to-use accept loop.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod promise;
pub mod server;
pub mod timer;
pub mod transport;

pub use config::EndpointConfig;
pub use endpoint::{Endpoint, OutboundData};
pub use error::{Error, HandshakeError, Result};
pub use frame::OpCode;
pub use message::Message;
pub use server::{ServerEvent, WsServer};
pub use transport::{Interest, Readiness, Transport};
