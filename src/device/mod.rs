use anyhow::{Context, Result};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::thread;

use tracing::{info, warn};

use crate::cli::DeviceOpts;
use crate::config::{self, DeviceIdentity};
use crate::transport::{Transport, UdpTransport, local_ip};

pub mod broadcaster;
pub mod dispatcher;
pub mod outbox;
pub mod queue;
pub mod receiver;
pub mod state;

use dispatcher::Dispatcher;
use outbox::{Outbox, PeerAddr};
use queue::InboundQueue;
use state::{RunEnd, TestState};

/// One received datagram, owned.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub bytes: Vec<u8>,
    pub from: SocketAddr,
}

/// What the dispatcher consumes.
#[derive(Debug)]
pub enum Event {
    Datagram(RawMessage),
    /// Completion signal from a broadcaster.
    RunEnded { run: u64, end: RunEnd },
}

pub fn run(opts: DeviceOpts) -> Result<()> {
    let config = {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        config::resolve(&opts, &mut input, &mut io::stdout())?
    };

    let ip = match opts.ip {
        Some(ip) => ip,
        None => local_ip().unwrap_or_else(|e| {
            warn!("could not resolve local address ({:#}), binding all interfaces", e);
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        }),
    };
    let transport = UdpTransport::bind(SocketAddr::new(ip, config.port))?;
    let addr = transport.local_addr()?;

    info!(
        model = %config.identity.model,
        serial = %config.identity.serial,
        %addr,
        "device connection open, ready for transmission (Ctrl+C to terminate)"
    );

    serve(config.identity, Arc::new(transport))
}

/// Run the engine on `transport` until the receiver hits a fatal error.
pub fn serve(identity: DeviceIdentity, transport: Arc<dyn Transport>) -> Result<()> {
    let queue = Arc::new(InboundQueue::new());
    let state = Arc::new(TestState::new());
    let peer = PeerAddr::default();
    let outbox = Outbox::new(Arc::clone(&transport), peer.clone());

    let dispatcher = Dispatcher::new(identity, state, Arc::clone(&queue), outbox);
    let dispatcher = thread::Builder::new()
        .name("dispatcher".into())
        .spawn(move || dispatcher.run())
        .context("spawning dispatcher")?;

    let result = receiver::run(&*transport, &queue, &peer);
    if dispatcher.join().is_err() {
        warn!("dispatcher panicked");
    }
    result
}
