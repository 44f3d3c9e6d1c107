use anyhow::{Result, bail};
use std::io::{BufRead, Write};

use crate::cli::DeviceOpts;

pub const MIN_PORT: u16 = 1024;
pub const MAX_PORT: u16 = 65535;

/// Who the device claims to be in `ID` replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub model: String,
    pub serial: String,
}

impl DeviceIdentity {
    pub fn new(model: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            serial: serial.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub identity: DeviceIdentity,
    pub port: u16,
}

/// clap value parser for identity fields: they are spliced into the wire format.
pub fn parse_identity_field(s: &str) -> Result<String, String> {
    check_identity_field(s).map(|_| s.to_string())
}

fn check_identity_field(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("must not be empty".into());
    }
    if s.contains([';', '=']) {
        return Err("must not contain ';' or '='".into());
    }
    Ok(())
}

/// Fill in whatever the command line left out by prompting on `input`.
pub fn resolve<R: BufRead, W: Write>(
    opts: &DeviceOpts,
    input: &mut R,
    out: &mut W,
) -> Result<DeviceConfig> {
    let needs_prompt = opts.model.is_none() || opts.serial.is_none() || opts.port.is_none();
    if needs_prompt {
        writeln!(out, "\nEnter details for the test device:")?;
    }

    let model = match &opts.model {
        Some(m) => m.clone(),
        None => prompt_field(input, out, "Device Model")?,
    };
    let serial = match &opts.serial {
        Some(s) => s.clone(),
        None => prompt_field(input, out, "Serial Number")?,
    };
    let port = match opts.port {
        Some(p) => p,
        None => prompt_port(input, out)?,
    };

    Ok(DeviceConfig {
        identity: DeviceIdentity { model, serial },
        port,
    })
}

fn read_answer<R: BufRead>(input: &mut R) -> Result<String> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        bail!("input closed while reading device details");
    }
    Ok(line.trim().to_string())
}

fn prompt_field<R: BufRead, W: Write>(input: &mut R, out: &mut W, label: &str) -> Result<String> {
    loop {
        write!(out, "{label}: ")?;
        out.flush()?;
        let answer = read_answer(input)?;
        match check_identity_field(&answer) {
            Ok(()) => return Ok(answer),
            Err(why) => writeln!(out, "*** {label} {why} - please try again ***")?,
        }
    }
}

fn prompt_port<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> Result<u16> {
    loop {
        write!(out, "Port Number ({MIN_PORT}-{MAX_PORT}): ")?;
        out.flush()?;
        let answer = read_answer(input)?;
        match answer.parse::<u16>() {
            Ok(p) if p >= MIN_PORT => return Ok(p),
            _ => writeln!(
                out,
                "*** Port number is outside valid range - please try again ***"
            )?,
        }
    }
}
