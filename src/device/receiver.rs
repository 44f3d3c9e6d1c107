use anyhow::{Context, Result};
use std::io;

use tracing::{debug, error, warn};

use super::outbox::PeerAddr;
use super::queue::InboundQueue;
use super::{Event, RawMessage};
use crate::transport::Transport;

/// Pull datagrams off the transport until it fails.
///
/// Returns only on a hard receive error; the queue is closed first so the
/// dispatcher can drain what is left and exit.
pub fn run(transport: &dyn Transport, queue: &InboundQueue<Event>, peer: &PeerAddr) -> Result<()> {
    loop {
        let (bytes, from) = match transport.recv_from() {
            Ok(datagram) => datagram,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("receive failed: {}", e);
                queue.close();
                return Err(e).context("receiving datagram");
            }
        };

        if bytes.is_empty() {
            warn!(%from, "empty message received");
            continue;
        }

        debug!(%from, len = bytes.len(), "datagram");
        // Record before queueing so the reply to this message goes back to its sender.
        peer.record(from);
        queue.push(Event::Datagram(RawMessage { bytes, from }));
    }
}
