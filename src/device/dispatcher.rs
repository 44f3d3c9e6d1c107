use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::broadcaster::{self, RunSpec};
use super::outbox::Outbox;
use super::queue::InboundQueue;
use super::state::{RunEnd, TestState};
use super::{Event, RawMessage};
use crate::config::DeviceIdentity;
use crate::proto::command::{
    Command, MSG_ALREADY_STARTED, MSG_ALREADY_STOPPED, Reply, TestCommand,
};
use crate::proto::parser::parse_command;

/// Single consumer of the inbound queue.
///
/// Handles one event at a time and never waits on a broadcaster; runs it
/// launched report back through `Event::RunEnded`.
pub struct Dispatcher {
    identity: DeviceIdentity,
    state: Arc<TestState>,
    events: Arc<InboundQueue<Event>>,
    outbox: Outbox,
    next_run: u64,
    // Runs whose STOP was accepted and whose STOPPED ack is still due.
    stop_acks_owed: BTreeSet<u64>,
}

impl Dispatcher {
    pub fn new(
        identity: DeviceIdentity,
        state: Arc<TestState>,
        events: Arc<InboundQueue<Event>>,
        outbox: Outbox,
    ) -> Self {
        Self {
            identity,
            state,
            events,
            outbox,
            next_run: 0,
            stop_acks_owed: BTreeSet::new(),
        }
    }

    /// Drain the queue until it is closed and empty.
    pub fn run(mut self) {
        while let Some(event) = self.events.pop() {
            self.handle(event);
        }
        info!("dispatcher stopped");
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Datagram(msg) => self.handle_datagram(msg),
            Event::RunEnded { run, end } => self.handle_run_ended(run, end),
        }
    }

    fn handle_datagram(&mut self, msg: RawMessage) {
        let text = String::from_utf8_lossy(&msg.bytes);
        debug!(from = %msg.from, backlog = self.events.len(), "got {:?}", text);

        match parse_command(&text) {
            Ok(cmd) => self.handle_command(cmd),
            Err(e) => {
                warn!(from = %msg.from, "malformed command {:?}: {}", text, e);
                self.outbox.send(&Reply::error(e.to_string()));
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Id => self.outbox.send(&Reply::Id {
                model: self.identity.model.clone(),
                serial: self.identity.serial.clone(),
            }),
            Command::Test(TestCommand::Start {
                duration_ms,
                rate_ms,
            }) => self.start_test(duration_ms, rate_ms),
            Command::Test(TestCommand::Stop) => self.stop_test(),
            Command::Other(tag) => debug!("ignoring message type {}", tag),
        }
    }

    fn start_test(&mut self, duration_ms: u64, rate_ms: u64) {
        // A cancelled run stays busy until its STOPPED ack has gone out.
        if !self.stop_acks_owed.is_empty() {
            debug!(owed = ?self.stop_acks_owed, "START rejected, stop ack pending");
            self.outbox.send(&Reply::error(MSG_ALREADY_STARTED));
            return;
        }
        if !self.state.try_start() {
            self.outbox.send(&Reply::error(MSG_ALREADY_STARTED));
            return;
        }

        self.next_run += 1;
        let run = RunSpec {
            id: self.next_run,
            duration_ms,
            rate_ms,
        };
        info!(run = run.id, duration_ms, rate_ms, "running test");
        self.outbox.send(&Reply::Started);

        if let Err(e) = broadcaster::spawn(
            run,
            Arc::clone(&self.state),
            self.outbox.clone(),
            Arc::clone(&self.events),
        ) {
            error!(run = run.id, "could not spawn status broadcaster: {}", e);
            self.state.finish();
            self.outbox.send(&Reply::Stopped);
        }
    }

    fn stop_test(&mut self) {
        if !self.state.request_cancel() {
            debug!(state = ?self.state.current(), "STOP rejected");
            self.outbox.send(&Reply::error(MSG_ALREADY_STOPPED));
            return;
        }
        info!(run = self.next_run, "cancel command received, stopping test");
        // Only the latest run can be Running, so it is the one being cancelled.
        self.stop_acks_owed.insert(self.next_run);
    }

    fn handle_run_ended(&mut self, run: u64, end: RunEnd) {
        match end {
            RunEnd::Completed => debug!(run, "run completed"),
            RunEnd::Cancelled => {
                if self.stop_acks_owed.remove(&run) {
                    self.outbox.send(&Reply::Stopped);
                    info!(run, "test stopped");
                } else {
                    warn!(run, "run cancelled without a pending STOP");
                }
            }
        }
    }
}
