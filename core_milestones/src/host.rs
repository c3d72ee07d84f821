use std::io::{self, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use bevy::prelude::Resource;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

/// One instruction for the game-side glue: run a privileged command or show
/// text to every connected player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum HostDirective {
    Execute(String),
    Broadcast(String),
}

/// Fire-and-forget seam between the engine and the hosting game server. The
/// engine never learns whether a directive was delivered; failures are logged
/// on the receiving side.
#[derive(Resource, Clone)]
pub struct HostLink {
    sender: Sender<HostDirective>,
}

impl HostLink {
    pub fn channel() -> (Self, Receiver<HostDirective>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    pub fn execute(&self, action: &str) {
        self.dispatch(HostDirective::Execute(action.to_owned()));
    }

    pub fn broadcast(&self, message: &str) {
        self.dispatch(HostDirective::Broadcast(message.to_owned()));
    }

    fn dispatch(&self, directive: HostDirective) {
        if let Err(err) = self.sender.send(directive) {
            log::warn!("Host directive dropped, receiver gone: {}", err);
        }
    }
}

/// Fans directives out to connected game-side clients as length-prefixed JSON
/// frames. A client that stops reading is dropped; the engine never blocks.
pub struct DirectiveServer {
    sender: Sender<Vec<u8>>,
}

impl DirectiveServer {
    pub fn forward(&self, directive: &HostDirective) {
        let payload = match serde_json::to_vec(directive) {
            Ok(payload) => payload,
            Err(err) => {
                log::error!("Failed to encode host directive: {}", err);
                return;
            }
        };
        if let Err(err) = self.sender.send(payload) {
            log::error!("Failed to queue host directive: {}", err);
        }
    }
}

pub fn start_directive_server(bind_addr: std::net::SocketAddr) -> Option<DirectiveServer> {
    let listener = match TcpListener::bind(bind_addr) {
        Ok(listener) => listener,
        Err(err) => {
            log::warn!(
                "Directive server bind failed at {}: {}. Forwarding disabled.",
                bind_addr,
                err
            );
            return None;
        }
    };

    if let Err(err) = listener.set_nonblocking(true) {
        log::warn!("set_nonblocking failed for directive listener: {}", err);
        return None;
    }

    let (sender, receiver) = unbounded::<Vec<u8>>();
    let clients: Arc<Mutex<Vec<TcpStream>>> = Arc::new(Mutex::new(Vec::new()));
    let accept_clients = Arc::clone(&clients);

    thread::spawn(move || loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                log::info!("Directive client connected: {}", addr);
                if let Err(err) = stream.set_nodelay(true) {
                    log::warn!("Failed to set TCP_NODELAY for client {}: {}", addr, err);
                }
                accept_clients
                    .lock()
                    .expect("directive clients mutex poisoned")
                    .push(stream);
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(50));
            }
            Err(err) => {
                log::error!("Error accepting directive client: {}", err);
                thread::sleep(std::time::Duration::from_millis(200));
            }
        }

        while let Ok(payload) = receiver.try_recv() {
            broadcast_frame(&clients, &payload);
        }
    });

    Some(DirectiveServer { sender })
}

fn write_frame(stream: &mut TcpStream, frame: &[u8]) -> io::Result<()> {
    let len = frame.len() as u32;
    let mut buffer = Vec::with_capacity(4 + frame.len());
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(frame);
    stream.write_all(&buffer)
}

fn broadcast_frame(clients: &Arc<Mutex<Vec<TcpStream>>>, frame: &[u8]) {
    let mut guard = clients.lock().expect("directive clients mutex poisoned");
    guard.retain_mut(|stream| match write_frame(stream, frame) {
        Ok(_) => true,
        Err(err) => {
            log::warn!("Dropping directive client: {}", err);
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_delivers_directives_in_order() {
        let (link, receiver) = HostLink::channel();
        link.execute("give @a emerald 1");
        link.broadcast("hello");
        assert_eq!(
            receiver.try_recv().unwrap(),
            HostDirective::Execute("give @a emerald 1".to_string())
        );
        assert_eq!(
            receiver.try_recv().unwrap(),
            HostDirective::Broadcast("hello".to_string())
        );
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn dispatch_with_dropped_receiver_does_not_panic() {
        let (link, receiver) = HostLink::channel();
        drop(receiver);
        link.execute("say into the void");
    }

    #[test]
    fn directive_encodes_as_tagged_json() {
        let payload = serde_json::to_string(&HostDirective::Execute("say hi".to_string()))
            .expect("directive should encode");
        assert_eq!(payload, r#"{"kind":"execute","body":"say hi"}"#);
    }
}
