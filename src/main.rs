//! A minimal echo server, kept as the binary target mainly so `cargo run`
//! has something to do against this crate. See `demos/echo_server.rs` and
//! `demos/custom_server.rs` for the same idea built on
//! `socket_flow::server::WsServer` instead of a raw `TcpListener`.

use log::{error, info};
use socket_flow::{Endpoint, EndpointConfig, Message, OutboundData};
use std::net::TcpListener;
use std::time::Duration;

fn main() {
    env_logger::init();

    let addr = "127.0.0.1:9002";
    let listener = TcpListener::bind(addr).expect("can't listen");
    info!("listening on {addr}");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                error!("accept failed: {err}");
                continue;
            }
        };

        std::thread::spawn(move || {
            let peer = stream.peer_addr().ok();
            let endpoint = Endpoint::with_config(stream, EndpointConfig::default());

            if let Err(err) = endpoint.accept(Some(Duration::from_secs(10)), None) {
                error!("handshake failed for {peer:?}: {err}");
                return;
            }
            info!("peer connected: {peer:?}");

            loop {
                match endpoint.recv(None) {
                    Ok(message) => {
                        let echoed: OutboundData = match message {
                            Message::Text(text) => text.into(),
                            Message::Binary(data) => data.into(),
                        };
                        if let Err(err) = endpoint.send(echoed, None) {
                            error!("send failed for {peer:?}: {err}");
                            break;
                        }
                    }
                    Err(err) => {
                        info!("connection {peer:?} done: {err}");
                        break;
                    }
                }
            }
            endpoint.close();
        });
    }
}
