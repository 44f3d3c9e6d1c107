use anyhow::{Context, Result};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

/// Largest datagram the device accepts.
pub const BUFFER_SIZE: usize = 1024;

/// Connectionless byte transport the engine talks through.
pub trait Transport: Send + Sync + 'static {
    fn send_to(&self, payload: &[u8], peer: SocketAddr) -> io::Result<usize>;
    /// Blocks until one datagram arrives. Each call returns a fresh buffer.
    fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)>;
}

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket =
            UdpSocket::bind(addr).with_context(|| format!("binding UDP socket to {addr}"))?;
        Ok(Self { socket })
    }

    /// Ephemeral socket for the probe client; `timeout` bounds every receive.
    pub fn ephemeral(timeout: Duration) -> Result<Self> {
        let socket =
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).context("binding probe socket")?;
        let transport = Self { socket };
        transport
            .set_read_timeout(timeout)
            .context("setting probe read timeout")?;
        Ok(transport)
    }

    /// Bound the next receives. A zero duration is rounded up to 1 ms.
    pub fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, payload: &[u8], peer: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(payload, peer)
    }

    fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; BUFFER_SIZE];
        let (len, src) = self.socket.recv_from(&mut buf)?;
        buf.truncate(len);
        Ok((buf, src))
    }
}

/// Outward-facing IPv4 address of this host.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
pub fn local_ip() -> Result<IpAddr> {
    let probe =
        UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).context("creating route probe socket")?;
    probe
        .connect((Ipv4Addr::new(10, 255, 255, 255), 9))
        .context("selecting outbound route")?;
    let addr = probe.local_addr().context("reading route probe address")?;
    Ok(addr.ip())
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::mpsc::{self, Receiver, Sender};

    /// In-memory transport: the test feeds datagrams in and reads replies out.
    pub struct MockTransport {
        inbound: Mutex<Receiver<(Vec<u8>, SocketAddr)>>,
        outbound: Sender<(String, SocketAddr)>,
    }

    pub struct MockPeer {
        pub inbound: Sender<(Vec<u8>, SocketAddr)>,
        pub outbound: Receiver<(String, SocketAddr)>,
    }

    impl MockTransport {
        pub fn pair() -> (Self, MockPeer) {
            let (in_tx, in_rx) = mpsc::channel();
            let (out_tx, out_rx) = mpsc::channel();
            (
                Self {
                    inbound: Mutex::new(in_rx),
                    outbound: out_tx,
                },
                MockPeer {
                    inbound: in_tx,
                    outbound: out_rx,
                },
            )
        }
    }

    impl Transport for MockTransport {
        fn send_to(&self, payload: &[u8], peer: SocketAddr) -> io::Result<usize> {
            let text = String::from_utf8_lossy(payload).into_owned();
            self.outbound
                .send((text, peer))
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))?;
            Ok(payload.len())
        }

        fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
            let rx = self
                .inbound
                .lock()
                .map_err(|_| io::Error::other("inbound lock poisoned"))?;
            rx.recv()
                .map_err(|_| io::Error::new(io::ErrorKind::ConnectionReset, "inbound closed"))
        }
    }

    impl MockPeer {
        pub fn send(&self, msg: &str, from: SocketAddr) {
            self.inbound.send((msg.as_bytes().to_vec(), from)).unwrap();
        }

        pub fn recv(&self, timeout: Duration) -> Option<String> {
            self.outbound.recv_timeout(timeout).ok().map(|(m, _)| m)
        }

        pub fn recv_with_peer(&self, timeout: Duration) -> Option<(String, SocketAddr)> {
            self.outbound.recv_timeout(timeout).ok()
        }
    }
}
