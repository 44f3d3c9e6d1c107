use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

use crate::proto::command::Reply;
use crate::proto::parser::format_reply;
use crate::transport::Transport;

/// Address of the most recent inbound datagram; every reply goes there.
#[derive(Debug, Clone, Default)]
pub struct PeerAddr(Arc<Mutex<Option<SocketAddr>>>);

impl PeerAddr {
    pub fn record(&self, addr: SocketAddr) {
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = Some(addr);
    }

    pub fn get(&self) -> Option<SocketAddr> {
        *self.0.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Serializes replies and sends them to the current peer.
///
/// Send failures are logged and dropped; they never stop the engine.
#[derive(Clone)]
pub struct Outbox {
    transport: Arc<dyn Transport>,
    peer: PeerAddr,
}

impl Outbox {
    pub fn new(transport: Arc<dyn Transport>, peer: PeerAddr) -> Self {
        Self { transport, peer }
    }

    pub fn send(&self, reply: &Reply) {
        let Some(peer) = self.peer.get() else {
            warn!("no peer yet, dropping {:?}", reply);
            return;
        };
        let line = format_reply(reply);
        match self.transport.send_to(line.as_bytes(), peer) {
            Ok(_) => debug!(%peer, "sent {}", line),
            Err(e) => error!(%peer, "error sending message: {}", e),
        }
    }
}
