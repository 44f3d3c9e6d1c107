use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod device;
mod probe;
mod proto;
mod stats;
mod transport;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing(args.debug);
    match args.cmd {
        cli::Cmd::Device(opts) => device::run(opts),
        cli::Cmd::Probe(opts) => probe::run(opts),
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}
