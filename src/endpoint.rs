use crate::config::EndpointConfig;
use crate::error::Error;
use crate::frame::{encode_frame, Frame, OpCode};
use crate::handshake::perform_handshake;
use crate::message::{read_message, Message, Received};
use crate::promise::Promise;
use crate::transport::{Interest, Transport};
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

const REASON_NORMAL: u16 = 1000;
const REASON_PROTOCOL_ERROR: u16 = 1002;
const REASON_NOT_SUPPORTED: u16 = 1003;

/// Something a caller wants written to the wire: a data frame and the
/// promise that resolves once it has actually been sent (or fails because
/// the endpoint closed first). Ping frames carry the same shape, fulfilled
/// by the matching Pong instead of by the write itself.
struct OutputItem {
    opcode: OpCode,
    payload: Vec<u8>,
    sent: Option<Promise<()>>,
}

/// Everything the application threads and the I/O worker both touch. Queues,
/// flags and the owned transport are all behind this one lock so the FIFO
/// send ordering and close-latch semantics hold regardless of which side
/// reaches them first.
struct State {
    input: VecDeque<Message>,
    output: VecDeque<OutputItem>,
    pings: HashMap<[u8; 4], Promise<()>>,
    handshake_done: bool,
    closed: bool,
    close_requested: Option<u16>,
    code: Option<u16>,
    reason: Option<String>,
}

impl State {
    fn new() -> Self {
        State {
            input: VecDeque::new(),
            output: VecDeque::new(),
            pings: HashMap::new(),
            handshake_done: false,
            closed: false,
            close_requested: None,
            code: None,
            reason: None,
        }
    }
}

struct Shared<T: Transport + 'static> {
    state: Mutex<State>,
    cv: Condvar,
    config: EndpointConfig,
    accepted: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// A duplicate of the transport handed to the worker, kept here purely
    /// so `close()` can shut down the read side from the calling thread and
    /// unblock the worker out of a blocking read on a stalled peer.
    close_handle: Mutex<Option<T>>,
}

/// A server-side WebSocket connection: one accepted transport, a background
/// I/O worker thread, and a synchronous `send`/`recv`/`ping`/`close` API.
/// Clone is cheap — it shares the same worker and queues, the way a socket
/// handle would.
pub struct Endpoint<T: Transport + 'static> {
    transport_slot: Arc<Mutex<Option<T>>>,
    shared: Arc<Shared<T>>,
}

impl<T: Transport + 'static> Clone for Endpoint<T> {
    fn clone(&self) -> Self {
        Endpoint {
            transport_slot: Arc::clone(&self.transport_slot),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport + 'static> Endpoint<T> {
    /// Wrap a freshly-accepted transport. `accept` must be called before
    /// `send`/`recv`/`ping` will do anything but fail with `Error::Usage`.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, EndpointConfig::default())
    }

    pub fn with_config(transport: T, config: EndpointConfig) -> Self {
        Endpoint {
            transport_slot: Arc::new(Mutex::new(Some(transport))),
            shared: Arc::new(Shared {
                state: Mutex::new(State::new()),
                cv: Condvar::new(),
                config,
                accepted: AtomicBool::new(false),
                worker: Mutex::new(None),
                close_handle: Mutex::new(None),
            }),
        }
    }

    /// Perform the HTTP Upgrade handshake and, on success, start the I/O
    /// worker thread. May be called exactly once: a failed `accept` cannot
    /// be retried — the endpoint is left closed.
    pub fn accept(
        &self,
        timeout: Option<Duration>,
        validate: Option<&(dyn Fn(&str, &HashMap<String, String>) -> bool + Send + Sync)>,
    ) -> Result<(String, HashMap<String, String>), Error> {
        if self.shared.accepted.swap(true, Ordering::SeqCst) {
            return Err(Error::Usage("accept called more than once"));
        }

        let mut slot = self.transport_slot.lock().unwrap();
        let transport = slot
            .as_mut()
            .expect("transport_slot is populated until accept consumes it");

        match perform_handshake(transport, &self.shared.config, timeout, validate) {
            Ok((uri, headers)) => {
                let owned = slot.take().unwrap();
                drop(slot);
                self.shared.state.lock().unwrap().handshake_done = true;
                self.spawn_worker(owned);
                Ok((uri, headers))
            }
            Err(err) => {
                drop(slot);
                self.mark_closed_after_failed_handshake();
                Err(err)
            }
        }
    }

    fn mark_closed_after_failed_handshake(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.closed = true;
        self.shared.cv.notify_all();
    }

    fn spawn_worker(&self, transport: T) {
        if let Ok(dup) = transport.try_clone() {
            *self.shared.close_handle.lock().unwrap() = Some(dup);
        }
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::spawn(move || run_worker(transport, shared));
        *self.shared.worker.lock().unwrap() = Some(handle);
    }

    /// Queue `message` for the worker to send and block until it has been
    /// written (or the endpoint closes first). `timeout` bounds the wait;
    /// on timeout the promise is cancelled so the worker skips the write if
    /// it dequeues the item afterwards.
    pub fn send(&self, message: impl Into<OutboundData>, timeout: Option<Duration>) -> Result<(), Error> {
        let outbound = message.into();
        let promise: Promise<()> = Promise::new();
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.closed {
                return Err(Error::Closed);
            }
            if !state.handshake_done {
                return Err(Error::Usage("send called before a successful accept"));
            }
            state.output.push_back(OutputItem {
                opcode: outbound.opcode(),
                payload: outbound.into_payload(),
                sent: Some(promise.clone()),
            });
        }
        match promise.get(timeout) {
            Err(Error::Timeout) => {
                promise.cancel();
                Err(Error::Timeout)
            }
            other => other,
        }
    }

    /// Block until a message is available, the endpoint closes, or
    /// `timeout` elapses.
    pub fn recv(&self, timeout: Option<Duration>) -> Result<Message, Error> {
        let mut state = self.shared.state.lock().unwrap();
        if !state.handshake_done && !state.closed {
            return Err(Error::Usage("recv called before a successful accept"));
        }

        loop {
            if let Some(message) = state.input.pop_front() {
                return Ok(message);
            }
            if state.closed {
                return Err(Error::Closed);
            }

            state = match timeout {
                None => self.shared.cv.wait(state).unwrap(),
                Some(timeout) => {
                    let (guard, result) = self.shared.cv.wait_timeout(state, timeout).unwrap();
                    if result.timed_out() && guard.input.is_empty() && !guard.closed {
                        return Err(Error::Timeout);
                    }
                    guard
                }
            };
        }
    }

    /// Send a Ping carrying a random 4-byte nonce and block until the
    /// matching Pong arrives (returns `true`) or `timeout` elapses (`false`).
    pub fn ping(&self, timeout: Duration) -> Result<bool, Error> {
        let mut nonce = [0u8; 4];
        rand::thread_rng().fill(&mut nonce);

        let promise: Promise<()> = Promise::new();
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.closed {
                return Err(Error::Closed);
            }
            if !state.handshake_done {
                return Err(Error::Usage("ping called before a successful accept"));
            }
            state.pings.insert(nonce, promise.clone());
            state.output.push_back(OutputItem {
                opcode: OpCode::Ping,
                payload: nonce.to_vec(),
                sent: None,
            });
        }

        match promise.get(Some(timeout)) {
            Ok(()) => Ok(true),
            Err(Error::Timeout) => {
                self.shared.state.lock().unwrap().pings.remove(&nonce);
                Ok(false)
            }
            Err(Error::Closed) | Err(Error::Cancelled) => Ok(false),
            Err(other) => Err(other),
        }
    }

    /// Request an orderly close with the normal closure code and block
    /// until the worker has finished shutting the transport down. Safe to
    /// call from multiple threads, and safe to call more than once.
    ///
    /// The worker only checks `close_requested` between readiness polls, so
    /// a worker parked in a blocking read on a silent peer wouldn't see the
    /// request in time. Shutting down the read side from this thread (on a
    /// duplicate handle) unblocks that read immediately; the worker sees
    /// the resulting error, still honors `close_requested` for the outgoing
    /// Close frame's code, and runs the rest of its close sequence as usual.
    pub fn close(&self) {
        self.request_close(REASON_NORMAL);

        if let Some(handle) = self.shared.close_handle.lock().unwrap().as_ref() {
            let _ = handle.shutdown_read();
        }

        let mut handle_slot = self.shared.worker.lock().unwrap();
        if let Some(handle) = handle_slot.take() {
            drop(handle_slot);
            let _ = handle.join();
        } else {
            drop(handle_slot);
            // No worker ever started (accept failed or was never called);
            // closed is already latched in that case.
            let state = self.shared.state.lock().unwrap();
            let _ = self
                .shared
                .cv
                .wait_while(state, |state| !state.closed)
                .unwrap();
        }
    }

    fn request_close(&self, code: u16) {
        let mut state = self.shared.state.lock().unwrap();
        if state.closed || state.close_requested.is_some() {
            return;
        }
        state.close_requested = Some(code);
        self.shared.cv.notify_all();
    }

    pub fn closed(&self) -> bool {
        self.shared.state.lock().unwrap().closed
    }

    pub fn code(&self) -> Option<u16> {
        self.shared.state.lock().unwrap().code
    }

    pub fn reason(&self) -> Option<String> {
        self.shared.state.lock().unwrap().reason.clone()
    }
}

/// What `send` accepts: an owned string (sent as Text) or bytes (sent as
/// Binary), matching `Message`'s two variants.
pub enum OutboundData {
    Text(String),
    Binary(Vec<u8>),
}

impl OutboundData {
    fn opcode(&self) -> OpCode {
        match self {
            OutboundData::Text(_) => OpCode::Text,
            OutboundData::Binary(_) => OpCode::Binary,
        }
    }

    fn into_payload(self) -> Vec<u8> {
        match self {
            OutboundData::Text(s) => s.into_bytes(),
            OutboundData::Binary(b) => b,
        }
    }
}

impl From<String> for OutboundData {
    fn from(value: String) -> Self {
        OutboundData::Text(value)
    }
}

impl From<&str> for OutboundData {
    fn from(value: &str) -> Self {
        OutboundData::Text(value.to_string())
    }
}

impl From<Vec<u8>> for OutboundData {
    fn from(value: Vec<u8>) -> Self {
        OutboundData::Binary(value)
    }
}

impl From<&[u8]> for OutboundData {
    fn from(value: &[u8]) -> Self {
        OutboundData::Binary(value.to_vec())
    }
}

impl From<Message> for OutboundData {
    fn from(value: Message) -> Self {
        match value {
            Message::Text(s) => OutboundData::Text(s),
            Message::Binary(b) => OutboundData::Binary(b),
        }
    }
}

/// The background I/O worker: poll readiness, drain the output queue,
/// dispatch whatever arrived, and run the close sequence in-line the
/// moment any of those steps calls for it. Runs until the transport is
/// closed, at which point the thread returns and the handle in `Shared`
/// becomes joinable.
fn run_worker<T: Transport>(mut transport: T, shared: Arc<Shared<T>>) {
    loop {
        let close_now = {
            let state = shared.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.close_requested
        };
        if let Some(code) = close_now {
            perform_close(&mut transport, &shared, Some(code), None);
            return;
        }

        let readiness = match transport.poll_ready(
            Interest::READABLE | Interest::WRITABLE,
            shared.config.poll_interval,
        ) {
            Ok(readiness) => readiness,
            Err(err) => {
                log::warn!("websocket worker: readiness poll failed: {err}");
                perform_close(&mut transport, &shared, None, None);
                return;
            }
        };

        if readiness.writable {
            let broken = drain_output(&mut transport, &shared);
            if broken {
                perform_close(&mut transport, &shared, None, None);
                return;
            }
        }

        if readiness.readable {
            match read_message(
                &mut transport,
                shared.config.max_frame_payload,
                shared.config.max_message_size,
            ) {
                Ok(Received::Message(message)) => {
                    let mut state = shared.state.lock().unwrap();
                    state.input.push_back(message);
                    shared.cv.notify_all();
                }
                Ok(Received::Control { opcode, payload }) => {
                    if handle_control(opcode, payload, &mut transport, &shared) {
                        return;
                    }
                }
                Err(Error::UnsupportedOpcode) => {
                    log::warn!("websocket worker: peer sent an unsupported opcode");
                    perform_close(&mut transport, &shared, Some(REASON_NOT_SUPPORTED), None);
                    return;
                }
                Err(Error::Protocol(message)) => {
                    log::warn!("websocket worker: protocol error: {message}");
                    perform_close(&mut transport, &shared, Some(REASON_PROTOCOL_ERROR), None);
                    return;
                }
                Err(err) => {
                    log::warn!("websocket worker: read failed: {err}");
                    // A read error here can be a genuinely broken connection,
                    // or it can be the read side having just been shut down
                    // by `close()` on another thread to unblock this exact
                    // read — in the latter case a close was already
                    // requested, so honor its code instead of closing blind.
                    let code = shared.state.lock().unwrap().close_requested;
                    perform_close(&mut transport, &shared, code, None);
                    return;
                }
            }
        }
    }
}

/// Pop and send every queued item. Returns `true` if a write failed and the
/// connection must be closed. Promises resolve in FIFO order as each frame
/// actually lands on the wire, matching the queue's drain order.
fn drain_output<T: Transport>(transport: &mut T, shared: &Arc<Shared<T>>) -> bool {
    loop {
        let item = {
            let mut state = shared.state.lock().unwrap();
            match state.output.pop_front() {
                Some(item) => item,
                None => return false,
            }
        };

        if let Some(promise) = &item.sent {
            if promise.cancelled() {
                continue;
            }
        }

        let frame = Frame::new(true, item.opcode, item.payload);
        match encode_frame(transport, &frame) {
            Ok(()) => {
                if let Some(promise) = item.sent {
                    promise.set_result(());
                }
            }
            Err(err) => {
                log::warn!("websocket worker: send failed: {err}");
                return true;
            }
        }
    }
}

/// Dispatch a control frame. Returns `true` if the worker should stop
/// running (a Close frame was received and handled).
fn handle_control<T: Transport>(
    opcode: OpCode,
    payload: Vec<u8>,
    transport: &mut T,
    shared: &Arc<Shared<T>>,
) -> bool {
    match opcode {
        OpCode::Ping => {
            let mut state = shared.state.lock().unwrap();
            state.output.push_back(OutputItem {
                opcode: OpCode::Pong,
                payload,
                sent: None,
            });
            false
        }
        OpCode::Pong => {
            if let Ok(key) = <[u8; 4]>::try_from(payload.as_slice()) {
                let promise = shared.state.lock().unwrap().pings.remove(&key);
                if let Some(promise) = promise {
                    if !promise.cancelled() {
                        promise.set_result(());
                    }
                }
            }
            false
        }
        OpCode::Close => {
            let (code, reason) = if payload.len() >= 2 {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
                (Some(code), Some(reason))
            } else {
                (None, Some(String::new()))
            };
            {
                let mut state = shared.state.lock().unwrap();
                state.code = code;
                state.reason = reason;
            }
            perform_close(transport, shared, None, None);
            true
        }
        _ => unreachable!("decode_frame/read_message never yield a non-control opcode here"),
    }
}

/// Run the close sequence exactly once: optionally emit a Close frame,
/// half-close the write side, drop the transport, latch `closed`, and
/// fail every promise still waiting on this endpoint.
fn perform_close<T: Transport>(
    transport: &mut T,
    shared: &Arc<Shared<T>>,
    send_code: Option<u16>,
    reason: Option<&str>,
) {
    let handshake_done = shared.state.lock().unwrap().handshake_done;

    if let Some(code) = send_code {
        if handshake_done {
            let mut payload = code.to_be_bytes().to_vec();
            if let Some(reason) = reason {
                let cap = shared.config.close_reason_cap.min(reason.len());
                payload.extend_from_slice(reason.as_bytes()[..cap].as_ref());
            }
            let frame = Frame::new(true, OpCode::Close, payload);
            if let Err(err) = encode_frame(transport, &frame) {
                log::warn!("websocket worker: failed to send close frame: {err}");
            }
        }
    }

    if let Err(err) = transport.shutdown_write() {
        log::warn!("websocket worker: failed to shut down write side: {err}");
    }

    let mut state = shared.state.lock().unwrap();
    state.closed = true;

    while let Some(item) = state.output.pop_front() {
        if let Some(promise) = item.sent {
            if !promise.cancelled() {
                promise.set_error(Error::Closed);
            }
        }
    }
    for (_, promise) in state.pings.drain() {
        if !promise.cancelled() {
            promise.set_error(Error::Closed);
        }
    }

    shared.cv.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    fn client_handshake_request(key: &str) -> String {
        format!(
            "GET /chat HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
             Sec-WebSocket-Key: {key}\r\n\r\n"
        )
    }

    fn mask_frame(fin: bool, opcode: OpCode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(((fin as u8) << 7) | opcode.as_u8());
        let len = payload.len();
        if len < 126 {
            out.push(0x80 | len as u8);
        } else {
            out.push(0x80 | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        out.extend_from_slice(&key);
        out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        out
    }

    #[test]
    fn accept_then_echo_round_trip() {
        use std::io::{Read, Write};

        let (server, mut client) = loopback_pair();
        let endpoint = Endpoint::new(server);
        let worker = std::thread::spawn({
            let endpoint = endpoint.clone();
            move || endpoint.accept(Some(Duration::from_secs(1)), None)
        });

        client
            .write_all(client_handshake_request("dGhlIHNhbXBsZSBub25jZQ==").as_bytes())
            .unwrap();
        let mut response = [0u8; 256];
        let n = client.read(&mut response).unwrap();
        let response = String::from_utf8_lossy(&response[..n]);
        assert!(response.starts_with("HTTP/1.1 101"));

        worker.join().unwrap().unwrap();

        client
            .write_all(&mask_frame(true, OpCode::Text, b"hello", [1, 2, 3, 4]))
            .unwrap();
        let message = endpoint.recv(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(message, Message::Text("hello".to_string()));

        endpoint.send("world", Some(Duration::from_secs(1))).unwrap();
        let mut buf = [0u8; 32];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(buf[0], 0x80 | OpCode::Text.as_u8());
        assert_eq!(&buf[2..2 + 5], b"world");

        endpoint.close();
        assert!(endpoint.closed());
    }

    #[test]
    fn send_and_recv_fail_before_accept() {
        let (server, _client) = loopback_pair();
        let endpoint = Endpoint::new(server);
        assert!(matches!(
            endpoint.send("hi", Some(Duration::from_millis(10))),
            Err(Error::Usage(_))
        ));
        assert!(matches!(
            endpoint.recv(Some(Duration::from_millis(10))),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn accept_cannot_be_retried() {
        let (server, _client) = loopback_pair();
        let endpoint = Endpoint::new(server);
        let _ = endpoint.accept(Some(Duration::from_millis(10)), None);
        assert!(matches!(
            endpoint.accept(Some(Duration::from_millis(10)), None),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn send_timeout_cancels_the_promise_so_it_is_not_written_later() {
        use std::io::Write;

        let (server, mut client) = loopback_pair();
        let endpoint = Endpoint::new(server);
        let worker = std::thread::spawn({
            let endpoint = endpoint.clone();
            move || endpoint.accept(Some(Duration::from_secs(1)), None)
        });
        client
            .write_all(client_handshake_request("dGhlIHNhbXBsZSBub25jZQ==").as_bytes())
            .unwrap();
        worker.join().unwrap().unwrap();

        // A timeout this short races the worker's next poll, but either way
        // the call must report Timeout rather than silently succeeding.
        let result = endpoint.send("hi", Some(Duration::from_nanos(1)));
        assert!(matches!(result, Err(Error::Timeout)) || result.is_ok());

        endpoint.close();
    }

    #[test]
    fn close_unblocks_a_worker_parked_on_a_partial_frame() {
        use std::io::Write;
        use std::sync::mpsc;

        let (server, mut client) = loopback_pair();
        let endpoint = Endpoint::new(server);
        let worker = std::thread::spawn({
            let endpoint = endpoint.clone();
            move || endpoint.accept(Some(Duration::from_secs(1)), None)
        });
        client
            .write_all(client_handshake_request("dGhlIHNhbXBsZSBub25jZQ==").as_bytes())
            .unwrap();
        let mut response = [0u8; 256];
        std::io::Read::read(&mut client, &mut response).unwrap();
        worker.join().unwrap().unwrap();

        // Send only a frame header claiming a payload that never arrives,
        // parking the worker's read_exact mid-frame with the peer silent.
        client.write_all(&[0x82, 0x7e, 0x00, 0x10]).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let (tx, rx) = mpsc::channel();
        std::thread::spawn({
            let endpoint = endpoint.clone();
            move || {
                endpoint.close();
                let _ = tx.send(());
            }
        });
        rx.recv_timeout(Duration::from_secs(2))
            .expect("close() must return even with the worker parked in a blocking read");
        assert!(endpoint.closed());
    }
}
