//! The control-channel command grammar and dispatcher.
//!
//! Inbound text is parsed into a closed [`Command`] variant before anything
//! touches the controller. The wire grammar is the deployed one:
//!
//! ```text
//! toggle:<pin-or-actuator>   e.g. toggle:relay, toggle:13
//! setTarget:<float>
//! resetBatch
//! ```

use flowdose_config::Pins;
use thiserror::Error;

use crate::batch::{BatchController, CommandOutcome};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    ToggleRelay,
    ToggleValve,
    SetTarget(f64),
    ResetBatch,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("unknown actuator {0:?}")]
    UnknownActuator(String),
    #[error("invalid target value {0:?}")]
    InvalidTarget(String),
}

/// Bound the echoed input so hostile lines cannot bloat logs.
fn excerpt(s: &str) -> String {
    const MAX: usize = 48;
    if s.len() <= MAX {
        s.to_string()
    } else {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i < MAX)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        format!("{}…", &s[..cut])
    }
}

impl Command {
    pub fn parse(text: &str, pins: Pins) -> Result<Self, CommandParseError> {
        let text = text.trim();
        if let Some(which) = text.strip_prefix("toggle:") {
            let which = which.trim();
            if which.eq_ignore_ascii_case("relay") {
                return Ok(Self::ToggleRelay);
            }
            if which.eq_ignore_ascii_case("valve") {
                return Ok(Self::ToggleValve);
            }
            if let Ok(pin) = which.parse::<u8>() {
                if pin == pins.relay {
                    return Ok(Self::ToggleRelay);
                }
                if pin == pins.valve {
                    return Ok(Self::ToggleValve);
                }
            }
            return Err(CommandParseError::UnknownActuator(excerpt(which)));
        }
        if let Some(value) = text.strip_prefix("setTarget:") {
            let value = value.trim();
            return value
                .parse::<f64>()
                .map(Self::SetTarget)
                .map_err(|_| CommandParseError::InvalidTarget(excerpt(value)));
        }
        if text == "resetBatch" {
            return Ok(Self::ResetBatch);
        }
        Err(CommandParseError::Unknown(excerpt(text)))
    }
}

/// Applies commands to the controller and guarantees the post-command
/// resync: a client that sent a rejected or malformed command still observes
/// the authoritative state instead of guessing.
#[derive(Debug, Clone, Copy)]
pub struct CommandProcessor {
    pins: Pins,
}

impl CommandProcessor {
    pub fn new(pins: Pins) -> Self {
        Self { pins }
    }

    /// Parse and apply one line of command text.
    pub fn apply_text(
        &self,
        ctl: &mut BatchController,
        text: &str,
        now_ms: u64,
        now_utc: DateTime<Utc>,
    ) -> Result<CommandOutcome, CommandParseError> {
        match Command::parse(text, self.pins) {
            Ok(cmd) => Ok(self.apply(ctl, cmd, now_ms, now_utc)),
            Err(e) => {
                ctl.request_resync();
                Err(e)
            }
        }
    }

    pub fn apply(
        &self,
        ctl: &mut BatchController,
        cmd: Command,
        now_ms: u64,
        now_utc: DateTime<Utc>,
    ) -> CommandOutcome {
        let outcome = match cmd {
            Command::ToggleRelay => ctl.toggle_relay(now_ms, now_utc),
            Command::ToggleValve => ctl.toggle_valve(),
            Command::SetTarget(v) => ctl.set_target(v),
            Command::ResetBatch => ctl.reset(),
        };
        match outcome {
            // Applied transitions queue their own resync.
            CommandOutcome::Applied => {}
            CommandOutcome::NoOp => ctl.request_resync(),
            CommandOutcome::Rejected(reason) => {
                tracing::warn!(?cmd, %reason, "command rejected");
                ctl.request_resync();
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn pins() -> Pins {
        Pins {
            relay: 13,
            valve: 16,
        }
    }

    #[rstest]
    #[case("toggle:relay", Command::ToggleRelay)]
    #[case("toggle:RELAY", Command::ToggleRelay)]
    #[case("toggle:13", Command::ToggleRelay)]
    #[case("toggle:valve", Command::ToggleValve)]
    #[case("toggle:16", Command::ToggleValve)]
    #[case("  toggle: relay ", Command::ToggleRelay)]
    #[case("setTarget:500", Command::SetTarget(500.0))]
    #[case("setTarget:0.25", Command::SetTarget(0.25))]
    #[case("resetBatch", Command::ResetBatch)]
    fn parses_the_closed_grammar(#[case] text: &str, #[case] expect: Command) {
        assert_eq!(Command::parse(text, pins()), Ok(expect));
    }

    #[rstest]
    #[case("toggle:7")]
    #[case("toggle:pump")]
    #[case("toggle:")]
    fn unknown_actuators_are_rejected(#[case] text: &str) {
        assert!(matches!(
            Command::parse(text, pins()),
            Err(CommandParseError::UnknownActuator(_))
        ));
    }

    #[rstest]
    #[case("setTarget:abc")]
    #[case("setTarget:")]
    fn malformed_targets_are_rejected(#[case] text: &str) {
        assert!(matches!(
            Command::parse(text, pins()),
            Err(CommandParseError::InvalidTarget(_))
        ));
    }

    #[rstest]
    #[case("")]
    #[case("resetbatch")]
    #[case("relayOn")]
    #[case("{\"type\":\"status\"}")]
    fn anything_else_is_unknown(#[case] text: &str) {
        assert!(matches!(
            Command::parse(text, pins()),
            Err(CommandParseError::Unknown(_))
        ));
    }

    #[test]
    fn excerpt_bounds_hostile_input() {
        let long = "x".repeat(10_000);
        let err = Command::parse(&long, pins()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.len() < 120, "unbounded echo: {} bytes", msg.len());
    }
}
