//! A ready-to-use accept loop built on top of [`Endpoint`].
//!
//! [`WsServer`] runs one accept thread, spawns one thread per connection to
//! perform the handshake, and forwards lifecycle events over a
//! `std::sync::mpsc` channel that itself implements `Iterator`. Using
//! [`WsServer`] is optional — a caller can always drive [`Endpoint::accept`]
//! directly against its own listener.

use crate::config::EndpointConfig;
use crate::endpoint::Endpoint;
use crate::error::Error;
use std::collections::HashMap;
use std::io;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Identifies one accepted connection for the lifetime of a `WsServer`.
///
/// A monotonic counter is enough here: the id is only ever compared for
/// equality within one process, so there's no need to pull in a UUID crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_connection_id() -> ConnectionId {
    ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// A validator applied to every incoming handshake, shared across
/// connection threads.
pub type Validator = dyn Fn(&str, &HashMap<String, String>) -> bool + Send + Sync;

/// Lifecycle notification for one connection, delivered in the order the
/// accept thread and per-connection handshake threads observe them.
pub enum ServerEvent {
    /// The handshake succeeded; the worker thread is already running and
    /// the endpoint is ready for `send`/`recv`/`ping`.
    Connected(ConnectionId, Endpoint<TcpStream>),
    /// The handshake failed (bad request, timeout, rejected by the
    /// validator, ...). The matching HTTP error response has already been
    /// written and the transport closed.
    HandshakeFailed(ConnectionId, Error),
    /// `TcpListener::accept` itself failed. The server keeps running;
    /// most causes (e.g. a transient `EMFILE`) are not fatal to the
    /// listener itself.
    AcceptError(io::Error),
}

/// Binds a `TcpListener` and spawns one thread per accepted connection to
/// run the HTTP Upgrade handshake, forwarding the outcome as a
/// [`ServerEvent`].
pub struct WsServer {
    events: mpsc::Receiver<ServerEvent>,
    accept_thread: Option<JoinHandle<()>>,
}

impl WsServer {
    /// Start accepting connections on `addr`. Returns as soon as the
    /// listener is bound; connections are handled on background threads.
    pub fn bind(addr: impl ToSocketAddrs, config: EndpointConfig) -> io::Result<Self> {
        Self::bind_with_validator(addr, config, None)
    }

    /// Like [`WsServer::bind`], but applies a caller-supplied predicate to
    /// every handshake.
    pub fn bind_with_validator(
        addr: impl ToSocketAddrs,
        config: EndpointConfig,
        validate: Option<&'static Validator>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let (tx, rx) = mpsc::channel();

        let accept_thread = std::thread::spawn(move || {
            for incoming in listener.incoming() {
                let id = next_connection_id();
                let stream = match incoming {
                    Ok(stream) => stream,
                    Err(err) => {
                        if tx.send(ServerEvent::AcceptError(err)).is_err() {
                            return;
                        }
                        continue;
                    }
                };

                let tx = tx.clone();
                let config = config.clone();
                std::thread::spawn(move || {
                    let endpoint = Endpoint::with_config(stream, config.clone());
                    let handshake_timeout = Some(config.handshake_timeout);
                    let event = match endpoint.accept(handshake_timeout, validate) {
                        Ok(_) => ServerEvent::Connected(id, endpoint),
                        Err(err) => ServerEvent::HandshakeFailed(id, err),
                    };
                    let _ = tx.send(event);
                });
            }
        });

        Ok(WsServer {
            events: rx,
            accept_thread: Some(accept_thread),
        })
    }

    /// Block for the next lifecycle event, or `None` once the accept
    /// thread has stopped and every in-flight handshake has reported in.
    pub fn next_event(&self) -> Option<ServerEvent> {
        self.events.recv().ok()
    }

    /// Like [`WsServer::next_event`], bounded by `timeout`.
    pub fn next_event_timeout(&self, timeout: Duration) -> Result<ServerEvent, mpsc::RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }
}

impl Iterator for WsServer {
    type Item = ServerEvent;

    fn next(&mut self) -> Option<ServerEvent> {
        self.events.recv().ok()
    }
}

impl Drop for WsServer {
    fn drop(&mut self) {
        // The listener itself is dropped with `incoming()`'s iterator once
        // the accept thread's `for` loop unwinds; in-flight handshake
        // threads are not forcibly stopped, just left to finish on their own.
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn client_handshake_request(key: &str) -> String {
        format!(
            "GET /chat HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
             Sec-WebSocket-Key: {key}\r\n\r\n"
        )
    }

    #[test]
    fn reports_handshake_failure_for_garbage_input() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server = WsServer::bind(addr, EndpointConfig::default()).unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"not a websocket request\r\n\r\n").unwrap();

        match server.next_event_timeout(Duration::from_secs(2)) {
            Ok(ServerEvent::HandshakeFailed(_, _)) => {}
            Ok(ServerEvent::Connected(_, _)) => panic!("garbage input should not accept"),
            Ok(ServerEvent::AcceptError(err)) => panic!("unexpected accept error: {err}"),
            Err(err) => panic!("timed out waiting for handshake event: {err}"),
        }

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 400"));
    }

    #[test]
    fn accepts_a_valid_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server = WsServer::bind(addr, EndpointConfig::default()).unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        client
            .write_all(client_handshake_request("dGhlIHNhbXBsZSBub25jZQ==").as_bytes())
            .unwrap();

        match server.next_event_timeout(Duration::from_secs(2)) {
            Ok(ServerEvent::Connected(_, endpoint)) => {
                assert!(!endpoint.closed());
                endpoint.close();
            }
            Ok(ServerEvent::HandshakeFailed(_, err)) => panic!("handshake unexpectedly failed: {err}"),
            Ok(ServerEvent::AcceptError(err)) => panic!("unexpected accept error: {err}"),
            Err(err) => panic!("timed out waiting for connect event: {err}"),
        }
    }
}
