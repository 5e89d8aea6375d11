//! The smallest possible server: one thread per connection, driving
//! `Endpoint` directly against a raw `TcpListener`. Compare
//! `demos/custom_server.rs`, which uses `socket_flow::server::WsServer`
//! instead of spawning the accept/handshake threads by hand.

use log::{error, info};
use socket_flow::{Endpoint, EndpointConfig, Message, OutboundData};
use std::net::TcpListener;
use std::time::Duration;

fn main() {
    env_logger::init();

    let addr = "127.0.0.1:9002";
    let listener = TcpListener::bind(addr).expect("can't listen");
    info!("listening on: {addr}");

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
            info!("peer address: {peer:?}");

            loop {
                match endpoint.recv(None) {
                    Ok(message) => {
                        let reply: OutboundData = match message {
                            Message::Text(text) => text.into(),
                            Message::Binary(data) => data.into(),
                        };
                        if endpoint.send(reply, None).is_err() {
                            error!("failed to send message");
                            break;
                        }
                    }
                    Err(err) => {
                        error!("received error from the connection: {err}");
                        break;
                    }
                }
            }
            endpoint.close();
        });
    }
}
