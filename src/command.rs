//! Operator commands relayed to the sensor.
//!
//! The operator types one of three words; each maps to a fixed payload that
//! is written to the sensor verbatim:
//!
//! ```text
//! start -> "start"
//! stop  -> "stop"
//! exit  -> "stop", then the connection is closed locally
//! ```
//!
//! Matching is case-insensitive and ignores surrounding whitespace. Anything
//! else is unrecognized and never reaches the wire.

/// Parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask the sensor to begin streaming readings
    Start,
    /// Ask the sensor to stop streaming readings
    Stop,
    /// Stop the sensor and drop the connection
    Exit,
    /// Input that matches no command
    Unrecognized(String),
}

impl Command {
    /// Parse one line of operator input.
    pub fn parse(line: &str) -> Command {
        let word = line.trim();

        if word.eq_ignore_ascii_case("start") {
            Command::Start
        } else if word.eq_ignore_ascii_case("stop") {
            Command::Stop
        } else if word.eq_ignore_ascii_case("exit") {
            Command::Exit
        } else {
            Command::Unrecognized(word.to_string())
        }
    }

    /// Bytes sent to the sensor for this command, if any.
    pub fn payload(&self) -> Option<&'static [u8]> {
        match self {
            Command::Start => Some(b"start"),
            Command::Stop | Command::Exit => Some(b"stop"),
            Command::Unrecognized(_) => None,
        }
    }
}
