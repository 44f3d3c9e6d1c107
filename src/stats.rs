use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use tracing::info;

use crate::proto::command::StatusSample;

/// Min / max / mean of one telemetry channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Channel {
    pub min: u32,
    pub max: u32,
    sum: u64,
    count: u64,
}

impl Channel {
    fn add(&mut self, v: u32) {
        if self.count == 0 {
            self.min = v;
            self.max = v;
        } else {
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
        self.sum += v as u64;
        self.count += 1;
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }
}

/// Running summary of the STATUS samples seen by the probe.
#[derive(Debug, Clone)]
pub struct TelemetryStats {
    pub samples: u64,
    pub mv: Channel,
    pub ma: Channel,
    pub last_elapsed_ms: Option<u64>,
    t0: Instant,
}

impl TelemetryStats {
    pub fn new() -> Self {
        Self {
            samples: 0,
            mv: Channel::default(),
            ma: Channel::default(),
            last_elapsed_ms: None,
            t0: Instant::now(),
        }
    }

    pub fn add(&mut self, s: &StatusSample) {
        self.samples += 1;
        self.mv.add(s.milli_volts);
        self.ma.add(s.milli_amps);
        self.last_elapsed_ms = Some(s.elapsed_ms);
    }

    pub fn log(&self) {
        if self.samples == 0 {
            info!("[probe] no STATUS samples received");
            return;
        }
        info!(
            "[probe] samples={} device_time={}ms wall={:.2}s mV min/max/avg={}/{}/{:.1} mA min/max/avg={}/{}/{:.1}",
            self.samples,
            self.last_elapsed_ms.unwrap_or(0),
            self.t0.elapsed().as_secs_f64(),
            self.mv.min,
            self.mv.max,
            self.mv.mean().unwrap_or(0.0),
            self.ma.min,
            self.ma.max,
            self.ma.mean().unwrap_or(0.0),
        );
    }
}

impl Default for TelemetryStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Write one `time_ms,mv,ma` row per sample, with a header line.
pub fn write_csv<'a>(
    path: &Path,
    samples: impl IntoIterator<Item = &'a StatusSample>,
) -> Result<usize> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "time_ms,mv,ma")?;
    let mut rows = 0;
    for s in samples {
        writeln!(out, "{},{},{}", s.elapsed_ms, s.milli_volts, s.milli_amps)?;
        rows += 1;
    }
    out.flush()
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(rows)
}
