// src/proto/parser.rs
use std::{collections::BTreeMap, str::FromStr};

use thiserror::Error;
use tracing::debug;

use super::command::{Command, Reply, StatusSample, TestCommand};

pub const DELIMITER: char = ';';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid integer for {0}: {1}")]
    BadInt(&'static str, String),
    #[error("invalid value for {0}: {1}")]
    BadEnum(&'static str, String),
    #[error("unknown tag: {0}")]
    UnknownTag(String),
    #[error("semantic error: {0}")]
    Semantic(&'static str),
}

/// A decoded `TAG;KEY=VALUE;...` message.
///
/// Lookups are order-independent; when a key repeats, the first occurrence wins.
/// Fields that are not `KEY=VALUE` pairs are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fields {
    pub tag: String,
    map: BTreeMap<String, String>,
}

impl Fields {
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let tag = message_type(raw).ok_or(ParseError::Empty)?.to_string();
        let mut map = BTreeMap::new();

        for tok in trim_wire(raw).split(DELIMITER).skip(1) {
            if tok.is_empty() {
                continue;
            }
            let Some((k, v)) = tok.split_once('=') else {
                debug!("skipping field without '=': {:?}", tok);
                continue;
            };
            map.entry(k.to_string()).or_insert_with(|| v.to_string());
        }

        Ok(Self { tag, map })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    fn req(&self, k: &'static str) -> Result<&str, ParseError> {
        self.get(k).ok_or(ParseError::MissingField(k))
    }

    fn req_u64(&self, k: &'static str) -> Result<u64, ParseError> {
        self.req(k).and_then(|v| {
            v.parse::<u64>()
                .map_err(|_| ParseError::BadInt(k, v.to_string()))
        })
    }

    fn req_u32(&self, k: &'static str) -> Result<u32, ParseError> {
        self.req(k).and_then(|v| {
            v.parse::<u32>()
                .map_err(|_| ParseError::BadInt(k, v.to_string()))
        })
    }
}

/// Leading type token: text before the first `;`, or the whole message.
/// A `TYPE=<tag>` first field is accepted as well.
pub fn message_type(raw: &str) -> Option<&str> {
    let s = trim_wire(raw);
    let first = s.split(DELIMITER).next().unwrap_or_default().trim();
    let tag = first.strip_prefix("TYPE=").unwrap_or(first);
    if tag.is_empty() { None } else { Some(tag) }
}

// Datagrams from C-string senders may carry NUL padding; line tools add CR/LF.
fn trim_wire(raw: &str) -> &str {
    raw.trim_matches(|c: char| c == '\0' || c == '\r' || c == '\n' || c == ' ')
}

/// Public API: parse an inbound datagram into a command.
pub fn parse_command(raw: &str) -> Result<Command, ParseError> {
    let tag = message_type(raw).ok_or(ParseError::Empty)?;

    match tag {
        "ID" => Ok(Command::Id),
        "TEST" => {
            let fields = Fields::parse(raw)?;
            let cmd = fields.req("CMD")?;
            let verb =
                TestVerb::from_str(cmd).map_err(|_| ParseError::BadEnum("CMD", cmd.to_string()))?;
            match verb {
                TestVerb::Start => {
                    let duration_ms = fields.req_u64("DURATION")?;
                    let rate_ms = fields.req_u64("RATE")?;
                    if rate_ms == 0 {
                        return Err(ParseError::Semantic("RATE must be greater than zero"));
                    }
                    Ok(Command::Test(TestCommand::Start {
                        duration_ms,
                        rate_ms,
                    }))
                }
                TestVerb::Stop => Ok(Command::Test(TestCommand::Stop)),
            }
        }
        other => Ok(Command::Other(other.to_string())),
    }
}

/// Public API: parse a device reply (used by the probe client).
pub fn parse_reply(raw: &str) -> Result<Reply, ParseError> {
    let fields = Fields::parse(raw)?;

    match fields.tag.as_str() {
        "ID" => Ok(Reply::Id {
            model: fields.req("MODEL")?.to_string(),
            serial: fields.req("Serial")?.to_string(),
        }),
        "TEST" => {
            let result = fields.req("RESULT")?;
            match result {
                "STARTED" => Ok(Reply::Started),
                "STOPPED" => Ok(Reply::Stopped),
                "ERROR" => Ok(Reply::Error {
                    msg: fields.get("MSG").unwrap_or_default().to_string(),
                }),
                _ => Err(ParseError::BadEnum("RESULT", result.to_string())),
            }
        }
        "STATUS" => Ok(Reply::Status(StatusSample {
            elapsed_ms: fields.req_u64("TIME")?,
            milli_volts: fields.req_u32("MV")?,
            milli_amps: fields.req_u32("MA")?,
        })),
        _ => Err(ParseError::UnknownTag(fields.tag)),
    }
}

/// Public API: serialize a device reply.
pub fn format_reply(reply: &Reply) -> String {
    match reply {
        Reply::Id { model, serial } => format!("ID;MODEL={model};Serial={serial};"),
        Reply::Started => "TEST;RESULT=STARTED;".to_string(),
        Reply::Stopped => "TEST;RESULT=STOPPED;".to_string(),
        // ERROR is the one reply without a trailing delimiter.
        Reply::Error { msg } => {
            format!("TEST;RESULT=ERROR;MSG={}", msg.replace(DELIMITER, ","))
        }
        Reply::Status(s) => format!(
            "STATUS;TIME={};MV={};MA={};",
            s.elapsed_ms, s.milli_volts, s.milli_amps
        ),
    }
}

/// Public API: serialize a request (used by the probe client).
pub fn format_command(cmd: &Command) -> String {
    match cmd {
        Command::Id => "ID".to_string(),
        Command::Test(TestCommand::Start {
            duration_ms,
            rate_ms,
        }) => format!("TEST;CMD=START;DURATION={duration_ms};RATE={rate_ms};"),
        Command::Test(TestCommand::Stop) => "TEST;CMD=STOP;".to_string(),
        Command::Other(tag) => tag.clone(),
    }
}

#[derive(Debug, Clone, Copy)]
enum TestVerb {
    Start,
    Stop,
}

impl FromStr for TestVerb {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "START" => Ok(TestVerb::Start),
            "STOP" => Ok(TestVerb::Stop),
            _ => Err(()),
        }
    }
}

/* ---------- tests ---------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_bare_and_delimited() {
        assert_eq!(parse_command("ID").unwrap(), Command::Id);
        assert_eq!(parse_command("ID;").unwrap(), Command::Id);
        assert_eq!(parse_command("ID\0\0\0").unwrap(), Command::Id);
        assert_eq!(parse_command("TYPE=ID;").unwrap(), Command::Id);
    }

    #[test]
    fn parse_test_start() {
        let cmd = parse_command("TEST;CMD=START;DURATION=5000;RATE=500;").unwrap();
        assert_eq!(
            cmd,
            Command::Test(TestCommand::Start {
                duration_ms: 5000,
                rate_ms: 500
            })
        );
    }

    #[test]
    fn parse_test_stop() {
        assert_eq!(
            parse_command("TEST;CMD=STOP;").unwrap(),
            Command::Test(TestCommand::Stop)
        );
    }

    #[test]
    fn field_lookup_ignores_order() {
        let a = Fields::parse("TEST;CMD=START;DURATION=5000;RATE=500;").unwrap();
        let b = Fields::parse("TEST;RATE=500;CMD=START;DURATION=5000;").unwrap();
        for f in [&a, &b] {
            assert_eq!(f.tag, "TEST");
            assert_eq!(f.get("CMD"), Some("START"));
            assert_eq!(f.get("DURATION"), Some("5000"));
            assert_eq!(f.get("RATE"), Some("500"));
            // repeated lookups see the same value
            assert_eq!(f.get("CMD"), Some("START"));
        }
        assert_eq!(
            parse_command("TEST;RATE=500;CMD=START;DURATION=5000").unwrap(),
            parse_command("TEST;CMD=START;DURATION=5000;RATE=500;").unwrap()
        );
    }

    #[test]
    fn unknown_type_is_passed_through() {
        assert_eq!(
            parse_command("PING;X=1;").unwrap(),
            Command::Other("PING".into())
        );
    }

    #[test]
    fn format_replies() {
        let id = Reply::Id {
            model: "PSU-9".into(),
            serial: "0042".into(),
        };
        assert_eq!(format_reply(&id), "ID;MODEL=PSU-9;Serial=0042;");
        assert_eq!(format_reply(&Reply::Started), "TEST;RESULT=STARTED;");
        assert_eq!(format_reply(&Reply::Stopped), "TEST;RESULT=STOPPED;");
        assert_eq!(
            format_reply(&Reply::error(crate::proto::command::MSG_ALREADY_STARTED)),
            "TEST;RESULT=ERROR;MSG=Test was already started"
        );
        let status = Reply::Status(StatusSample {
            elapsed_ms: 250,
            milli_volts: 12,
            milli_amps: 999,
        });
        assert_eq!(format_reply(&status), "STATUS;TIME=250;MV=12;MA=999;");
    }

    #[test]
    fn parse_replies_from_wire() {
        assert_eq!(
            parse_reply("ID;MODEL=Device;Serial=1;").unwrap(),
            Reply::Id {
                model: "Device".into(),
                serial: "1".into()
            }
        );
        assert_eq!(
            parse_reply("TEST;RESULT=ERROR;MSG=Test was already stopped").unwrap(),
            Reply::error("Test was already stopped")
        );
        assert_eq!(
            parse_reply("STATUS;TIME=750;MV=1;MA=2;").unwrap(),
            Reply::Status(StatusSample {
                elapsed_ms: 750,
                milli_volts: 1,
                milli_amps: 2
            })
        );
        assert!(matches!(
            parse_reply("HELLO;"),
            Err(ParseError::UnknownTag(_))
        ));
    }

    #[test]
    fn format_commands() {
        let start = Command::Test(TestCommand::Start {
            duration_ms: 1000,
            rate_ms: 250,
        });
        assert_eq!(
            format_command(&start),
            "TEST;CMD=START;DURATION=1000;RATE=250;"
        );
        assert_eq!(
            format_command(&Command::Test(TestCommand::Stop)),
            "TEST;CMD=STOP;"
        );
        assert_eq!(format_command(&Command::Id), "ID");
    }

    #[test]
    fn test_error_cases() {
        // Empty datagram
        assert!(matches!(parse_command(""), Err(ParseError::Empty)));
        assert!(matches!(parse_command("\0\0"), Err(ParseError::Empty)));

        // Missing CMD
        assert!(matches!(
            parse_command("TEST;DURATION=10;RATE=5;"),
            Err(ParseError::MissingField("CMD"))
        ));

        // START without RATE
        assert!(matches!(
            parse_command("TEST;CMD=START;DURATION=10;"),
            Err(ParseError::MissingField("RATE"))
        ));

        // Bad integer
        assert_eq!(
            parse_command("TEST;CMD=START;DURATION=abc;RATE=500;"),
            Err(ParseError::BadInt("DURATION", "abc".into()))
        );

        // Negative values are not durations
        assert!(matches!(
            parse_command("TEST;CMD=START;DURATION=100;RATE=-5;"),
            Err(ParseError::BadInt("RATE", _))
        ));

        // Zero rate would never advance the timeline
        assert!(matches!(
            parse_command("TEST;CMD=START;DURATION=100;RATE=0;"),
            Err(ParseError::Semantic(_))
        ));

        // Unknown verb
        assert!(matches!(
            parse_command("TEST;CMD=PAUSE;"),
            Err(ParseError::BadEnum("CMD", _))
        ));

        // Stray non-pair fields do not hide a valid command
        assert_eq!(
            parse_command("TEST;CMD=STOP;EXTRA;"),
            Ok(Command::Test(TestCommand::Stop))
        );
        assert_eq!(
            parse_command("TEST;oops;CMD=START;DURATION=100;RATE=10"),
            Ok(Command::Test(TestCommand::Start {
                duration_ms: 100,
                rate_ms: 10
            }))
        );
        // ...but a required field still has to be a pair
        assert!(matches!(
            parse_command("TEST;CMD;"),
            Err(ParseError::MissingField("CMD"))
        ));
    }
}
