//! A small broadcast chat server built on `socket_flow::server::WsServer`:
//! every accepted client's messages are echoed to every other connected
//! client. The accept loop runs over `WsServer`'s `Iterator<Item =
//! ServerEvent>`, and each client's messages are read on its own thread.

use log::{error, info};
use socket_flow::server::{ConnectionId, ServerEvent, WsServer};
use socket_flow::{Endpoint, EndpointConfig, Message, OutboundData};
use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

type Clients = Arc<Mutex<HashMap<ConnectionId, Endpoint<TcpStream>>>>;

fn outbound_copy(message: &Message) -> OutboundData {
    match message {
        Message::Text(text) => text.clone().into(),
        Message::Binary(data) => data.clone().into(),
    }
}

fn broadcast(clients: &Clients, from: ConnectionId, message: &Message) {
    let targets: Vec<Endpoint<TcpStream>> = clients
        .lock()
        .unwrap()
        .iter()
        .filter(|(id, _)| **id != from)
        .map(|(_, endpoint)| endpoint.clone())
        .collect();

    for target in targets {
        if target.send(outbound_copy(message), None).is_err() {
            error!("broadcast send failed");
        }
    }
}

fn main() {
    env_logger::init();

    let port = 8080u16;
    let server = WsServer::bind(("127.0.0.1", port), EndpointConfig::default())
        .expect("could not bind listener");
    info!("server started on 127.0.0.1:{port}");

    let clients: Clients = Arc::new(Mutex::new(HashMap::new()));

    for event in server {
        match event {
            ServerEvent::Connected(id, endpoint) => {
                info!("new client {id:?} connected");
                clients.lock().unwrap().insert(id, endpoint.clone());

                let clients = Arc::clone(&clients);
                std::thread::spawn(move || loop {
                    match endpoint.recv(None) {
                        Ok(message) => {
                            info!("message from client {id:?}: {message:?}");
                            broadcast(&clients, id, &message);
                        }
                        Err(err) => {
                            info!("client {id:?} disconnected: {err}");
                            clients.lock().unwrap().remove(&id);
                            break;
                        }
                    }
                });
            }
            ServerEvent::HandshakeFailed(id, err) => {
                error!("handshake failed for connection {id:?}: {err}");
            }
            ServerEvent::AcceptError(err) => {
                error!("accept error: {err}");
            }
        }
    }
}
