use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use super::queue::InboundQueue;
use super::state::{RunEnd, TestState};
use super::{Event, outbox::Outbox};
use crate::proto::command::{Reply, SIGNAL_LIMIT, StatusSample};

/// Parameters of one accepted START.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSpec {
    pub id: u64,
    pub duration_ms: u64,
    pub rate_ms: u64,
}

/// Launch the status broadcaster for a run that already won `try_start`.
pub fn spawn(
    run: RunSpec,
    state: Arc<TestState>,
    outbox: Outbox,
    events: Arc<InboundQueue<Event>>,
) -> io::Result<JoinHandle<RunEnd>> {
    thread::Builder::new()
        .name(format!("broadcast-{}", run.id))
        .spawn(move || {
            let end = broadcast(run, &state, &outbox, &mut rand::thread_rng());
            events.push(Event::RunEnded { run: run.id, end });
            end
        })
}

/// Emit one sample per tick until the duration is covered or a STOP lands,
/// then return the state machine to Idle.
///
/// A natural completion is acknowledged here; a cancelled run is acknowledged
/// by the dispatcher once it sees the `RunEnded` event.
pub fn broadcast<R: Rng + ?Sized>(
    run: RunSpec,
    state: &TestState,
    outbox: &Outbox,
    rng: &mut R,
) -> RunEnd {
    let rate = Duration::from_millis(run.rate_ms);
    let mut elapsed: u64 = 0;

    while elapsed <= run.duration_ms {
        if state.observe_cancelled() {
            debug!(run = run.id, elapsed, "cancellation observed");
            break;
        }
        outbox.send(&Reply::Status(sample_at(elapsed, rng)));
        // Models the device polling cadence.
        thread::sleep(rate);
        elapsed = match elapsed.checked_add(run.rate_ms) {
            Some(next) => next,
            None => break,
        };
    }

    let end = state.finish();
    if end == RunEnd::Completed {
        outbox.send(&Reply::Stopped);
        info!(run = run.id, "finished sending test data");
    }
    end
}

pub fn sample_at<R: Rng + ?Sized>(elapsed_ms: u64, rng: &mut R) -> StatusSample {
    StatusSample {
        elapsed_ms,
        milli_volts: rng.gen_range(0..SIGNAL_LIMIT),
        milli_amps: rng.gen_range(0..SIGNAL_LIMIT),
    }
}
