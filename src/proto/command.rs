/// Inbound request from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // ---- Discovery ----
    Id,

    // ---- Test orchestration ----
    Test(TestCommand),

    // Anything else is dropped by the dispatcher.
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCommand {
    Start { duration_ms: u64, rate_ms: u64 },
    Stop,
}

/// Outbound message from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    // ---- Discovery ----
    Id { model: String, serial: String },

    // ---- Test orchestration ----
    Started,
    Stopped,
    Error { msg: String },

    // ---- Telemetry ----
    Status(StatusSample),
}

impl Reply {
    pub fn error(msg: impl Into<String>) -> Self {
        Reply::Error { msg: msg.into() }
    }
}

/// One telemetry tick of a running test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSample {
    pub elapsed_ms: u64,
    pub milli_volts: u32,
    pub milli_amps: u32,
}

/// Exclusive upper bound for synthetic MV/MA readings.
pub const SIGNAL_LIMIT: u32 = 1000;

pub const MSG_ALREADY_STARTED: &str = "Test was already started";
pub const MSG_ALREADY_STOPPED: &str = "Test was already stopped";
