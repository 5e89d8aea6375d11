//! Throughput/latency harness for a running echo server (see
//! `demos/echo_server.rs` or `src/main.rs`). Spawns `connection_count`
//! raw-socket WebSocket clients, each sending `message_count` fixed-size
//! messages and waiting for the echo before sending the next, then reports
//! the average per-message latency.
//!
//! This crate is server-only, so this tool speaks just enough of the client
//! side of RFC 6455 by hand — a masked-frame writer and a minimal
//! handshake request — reusing `socket_flow::frame::decode_frame` to read
//! the server's unmasked replies. One OS thread drives each connection,
//! and results are collected over `std::sync::mpsc`.

use socket_flow::frame::decode_frame;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::time::{Duration, Instant};

const CONNECTION_COUNT: usize = 100;
const MESSAGE_COUNT: usize = 1000;
const MESSAGE_SIZE: usize = 16384;

fn client_handshake_request(host: &str) -> String {
    // A fixed key is fine here: this tool only needs the server to accept
    // the upgrade, it never checks `Sec-WebSocket-Accept` itself.
    format!(
        "GET / HTTP/1.1\r\nHost: {host}\r\nConnection: Upgrade\r\n\
         Upgrade: websocket\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
    )
}

fn perform_client_handshake(stream: &mut TcpStream, host: &str) {
    stream
        .write_all(client_handshake_request(host).as_bytes())
        .expect("failed to write handshake request");

    let mut buf = [0u8; 1024];
    let mut received = Vec::new();
    loop {
        let n = stream.read(&mut buf).expect("failed to read handshake response");
        received.extend_from_slice(&buf[..n]);
        if received.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    assert!(
        received.starts_with(b"HTTP/1.1 101"),
        "server rejected the handshake"
    );
}

/// A masked binary frame, client -> server. The server's `decode_frame`
/// expects exactly this shape.
fn masked_binary_frame(payload: &[u8]) -> Vec<u8> {
    let mut mask_key = [0u8; 4];
    for (i, byte) in mask_key.iter_mut().enumerate() {
        *byte = (i as u8).wrapping_mul(73).wrapping_add(11);
    }

    let mut frame = vec![0x80 | 0x2]; // FIN=1, opcode=binary
    let len = payload.len();
    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len < 1 << 16 {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(&mask_key);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask_key[i % 4]));
    frame
}

fn run_client(addr: &str) -> Duration {
    let mut stream = TcpStream::connect(addr).expect("failed to connect");
    perform_client_handshake(&mut stream, addr);

    let payload = vec![b'a'; MESSAGE_SIZE];
    let frame = masked_binary_frame(&payload);

    let start = Instant::now();
    for _ in 0..MESSAGE_COUNT {
        stream.write_all(&frame).expect("send failed");
        decode_frame(&mut stream, 1 << 24).expect("echo read failed");
    }
    start.elapsed()
}

fn main() {
    let addr = "127.0.0.1:9002";
    let (tx, rx) = mpsc::channel();

    let handles: Vec<_> = (0..CONNECTION_COUNT)
        .map(|_| {
            let tx = tx.clone();
            std::thread::spawn(move || {
                let duration = run_client(addr);
                let _ = tx.send(duration);
            })
        })
        .collect();
    drop(tx);

    let mut total = Duration::ZERO;
    for duration in rx {
        total += duration;
    }
    for handle in handles {
        let _ = handle.join();
    }

    let avg_latency = total / (CONNECTION_COUNT as u32 * MESSAGE_COUNT as u32);
    println!("average latency: {avg_latency:?}");
}
