use anyhow::{Context, Result, bail};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cli::{ProbeAction, ProbeOpts};
use crate::proto::command::{Command, Reply, StatusSample, TestCommand};
use crate::proto::parser::{format_command, parse_reply};
use crate::stats::{TelemetryStats, write_csv};
use crate::transport::{Transport, UdpTransport};

/// Everything the device sent back for one probe command.
#[derive(Debug, Default)]
pub struct Outcome {
    pub replies: Vec<Reply>,
    pub stats: TelemetryStats,
}

impl Outcome {
    pub fn samples(&self) -> impl Iterator<Item = &StatusSample> {
        self.replies.iter().filter_map(|r| match r {
            Reply::Status(s) => Some(s),
            _ => None,
        })
    }
}

pub fn run(opts: ProbeOpts) -> Result<()> {
    let timeout = Duration::from_millis(opts.timeout_ms);
    let transport = UdpTransport::ephemeral(timeout)?;
    debug!("[probe] bound {}", transport.local_addr()?);

    let session = Session::new(&transport, opts.target, timeout);
    let outcome = session.perform(&opts.action)?;

    if let ProbeAction::Start(start) = &opts.action {
        outcome.stats.log();
        if let Some(path) = &start.output {
            let rows = write_csv(path, outcome.samples())?;
            info!("[probe] wrote {} samples to {}", rows, path.display());
        }
    }
    if let Some(Reply::Error { msg }) = outcome.replies.last() {
        bail!("device rejected command: {}", msg);
    }
    Ok(())
}

/// One controller conversation with a device, over a single socket.
///
/// Every command goes out from the same local port, so replies and the
/// STATUS stream all come back to it.
pub struct Session<'a> {
    transport: &'a UdpTransport,
    target: SocketAddr,
    timeout: Duration,
}

impl<'a> Session<'a> {
    pub fn new(transport: &'a UdpTransport, target: SocketAddr, timeout: Duration) -> Self {
        Self {
            transport,
            target,
            timeout,
        }
    }

    /// Run `action`, including the optional ID handshake and timed cancel of a start.
    ///
    /// With `--identify` the ID reply is the first entry of the outcome.
    pub fn perform(&self, action: &ProbeAction) -> Result<Outcome> {
        let ProbeAction::Start(start) = action else {
            return self.exchange(action, None);
        };

        let identity = if start.identify {
            let id = self.exchange(&ProbeAction::Id, None)?;
            id.replies.into_iter().next()
        } else {
            None
        };

        let stop_after = start.stop_after_ms.map(Duration::from_millis);
        let mut outcome = self.exchange(action, stop_after)?;
        if let Some(id) = identity {
            outcome.replies.insert(0, id);
        }
        Ok(outcome)
    }

    /// Send one command and collect replies until the exchange is over.
    ///
    /// `timeout` bounds the silence between datagrams; once a run has
    /// started it is stretched by one sample interval. With `stop_after`,
    /// STOP is sent that long after STARTED.
    pub fn exchange(
        &self,
        action: &ProbeAction,
        stop_after: Option<Duration>,
    ) -> Result<Outcome> {
        self.send(&action.to_command())?;

        let mut outcome = Outcome::default();
        let mut wait = self.timeout;
        let mut stop_at: Option<Instant> = None;

        loop {
            if stop_at.is_some_and(|at| Instant::now() >= at) {
                stop_at = None;
                info!("[probe] cancelling run");
                self.send(&Command::Test(TestCommand::Stop))?;
            }

            let until_stop = stop_at.map(|at| at.saturating_duration_since(Instant::now()));
            let stop_bounded = until_stop.is_some_and(|d| d < wait);
            let limit = until_stop.filter(|_| stop_bounded).unwrap_or(wait);
            self.transport
                .set_read_timeout(limit)
                .context("setting read timeout")?;

            let (bytes, from) = match self.transport.recv_from() {
                Ok(datagram) => datagram,
                Err(e) if is_timeout(&e) => {
                    if stop_bounded {
                        continue;
                    }
                    bail!("no reply from {} before timeout", self.target)
                }
                Err(e) => return Err(e).context("receiving reply"),
            };
            let text = String::from_utf8_lossy(&bytes);
            let reply = match parse_reply(&text) {
                Ok(r) => r,
                Err(e) => {
                    warn!(%from, "[probe] ignoring {:?}: {}", text, e);
                    continue;
                }
            };

            match &reply {
                Reply::Status(s) => {
                    info!(
                        "[probe] t={}ms mV={} mA={}",
                        s.elapsed_ms, s.milli_volts, s.milli_amps
                    );
                    outcome.stats.add(s);
                }
                Reply::Id { model, serial } => info!("[probe] model={} serial={}", model, serial),
                Reply::Started => {
                    info!("[probe] test started");
                    if let ProbeAction::Start(start) = action {
                        wait = self.timeout + Duration::from_millis(start.rate);
                        stop_at = stop_after.and_then(|d| Instant::now().checked_add(d));
                    }
                }
                Reply::Stopped => info!("[probe] test stopped"),
                Reply::Error { msg } => warn!("[probe] device error: {}", msg),
            }

            let done = is_terminal(action, &reply);
            outcome.replies.push(reply);
            if done {
                return Ok(outcome);
            }
        }
    }

    fn send(&self, cmd: &Command) -> Result<()> {
        let line = format_command(cmd);
        self.transport
            .send_to(line.as_bytes(), self.target)
            .with_context(|| format!("sending to {}", self.target))?;
        info!("[probe] -> {} {}", self.target, line);
        Ok(())
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn is_terminal(action: &ProbeAction, reply: &Reply) -> bool {
    match (action, reply) {
        (_, Reply::Error { .. }) => true,
        (ProbeAction::Id, Reply::Id { .. }) => true,
        (ProbeAction::Start(_) | ProbeAction::Stop, Reply::Stopped) => true,
        _ => false,
    }
}
