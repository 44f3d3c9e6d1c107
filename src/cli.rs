use clap::{Args, Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::config::{MIN_PORT, parse_identity_field};
use crate::proto::command::{Command, TestCommand};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "udp-device-sim",
    about = "Emulated test device (ID / TEST / STATUS over UDP) and a probe client"
)]
pub struct Cli {
    /// Verbose logging (RUST_LOG overrides)
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Run the emulated device
    Device(DeviceOpts),
    /// Send one command to a device and print its replies
    Probe(ProbeOpts),
}

#[derive(Args, Debug, Clone)]
pub struct DeviceOpts {
    /// Device model reported in ID replies (prompted if omitted)
    #[arg(long, value_parser = parse_identity_field)]
    pub model: Option<String>,
    /// Serial number reported in ID replies (prompted if omitted)
    #[arg(long, value_parser = parse_identity_field)]
    pub serial: Option<String>,
    /// UDP port to listen on (prompted if omitted)
    #[arg(long, value_parser = clap::value_parser!(u16).range(MIN_PORT as i64..))]
    pub port: Option<u16>,
    /// Address to bind; defaults to this host's outward-facing address
    #[arg(long)]
    pub ip: Option<IpAddr>,
}

#[derive(Args, Debug, Clone)]
pub struct ProbeOpts {
    /// Device address, e.g. 192.168.1.20:8080
    #[arg(long)]
    pub target: SocketAddr,
    /// Give up after this long without any datagram
    #[arg(long, default_value_t = 2_000)]
    pub timeout_ms: u64,
    #[command(subcommand)]
    pub action: ProbeAction,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ProbeAction {
    /// Ask the device to identify itself
    Id,
    /// Start a test run and collect STATUS samples until it stops
    Start(StartOpts),
    /// Cancel the running test
    Stop,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct StartOpts {
    /// Test duration in milliseconds
    #[arg(long)]
    pub duration: u64,
    /// Sample interval in milliseconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub rate: u64,
    /// Query ID before starting, on the same socket
    #[arg(long, default_value_t = false)]
    pub identify: bool,
    /// Cancel the run this long after STARTED and wait for STOPPED
    #[arg(long)]
    pub stop_after_ms: Option<u64>,
    /// Write received samples as CSV (time_ms,mv,ma)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl ProbeAction {
    pub fn to_command(&self) -> Command {
        match self {
            ProbeAction::Id => Command::Id,
            ProbeAction::Start(start) => Command::Test(TestCommand::Start {
                duration_ms: start.duration,
                rate_ms: start.rate,
            }),
            ProbeAction::Stop => Command::Test(TestCommand::Stop),
        }
    }
}
