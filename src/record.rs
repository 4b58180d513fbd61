//! Telemetry records received from the sensor.
//!
//! A record is a JSON object sent by the sensor. Before it is persisted the
//! server stamps it with its own receipt time in a `timestamp` field,
//! replacing any value the sensor may have supplied.
//!
//! Log lines use `", "` and `": "` separators and escape every character
//! outside printable ASCII as `\uXXXX`:
//!
//! ```text
//! {"temp": 21.5, "name": "caf\u00e9", "timestamp": "2024-01-01T12:00:00.000000"}
//! ```
//!
//! Numbers are written back with the digits the sensor sent.

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::str;

/// Name of the field the server writes its receipt time into
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// ISO-8601 local time with microseconds, e.g. `2024-01-01T12:00:00.000000`
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// One decoded telemetry object
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    fields: Map<String, Value>,
}

/// Why a frame could not be turned into a record
#[derive(Debug)]
pub enum DecodeError {
    /// Frame is not valid UTF-8
    InvalidUtf8(str::Utf8Error),
    /// Frame is not valid JSON
    InvalidJson(serde_json::Error),
    /// Frame is valid JSON but not an object
    NotAnObject(&'static str),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidUtf8(e) => write!(f, "Invalid UTF-8: {}", e),
            DecodeError::InvalidJson(e) => write!(f, "Invalid JSON: {}", e),
            DecodeError::NotAnObject(kind) => write!(f, "Expected a JSON object, got {}", kind),
        }
    }
}

impl std::error::Error for DecodeError {}

impl TelemetryRecord {
    /// Decode a frame as a UTF-8 JSON object.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let text = str::from_utf8(frame).map_err(DecodeError::InvalidUtf8)?;
        let value: Value = serde_json::from_str(text).map_err(DecodeError::InvalidJson)?;

        match value {
            Value::Object(fields) => Ok(TelemetryRecord { fields }),
            Value::Array(_) => Err(DecodeError::NotAnObject("an array")),
            Value::String(_) => Err(DecodeError::NotAnObject("a string")),
            Value::Number(_) => Err(DecodeError::NotAnObject("a number")),
            Value::Bool(_) => Err(DecodeError::NotAnObject("a boolean")),
            Value::Null => Err(DecodeError::NotAnObject("null")),
        }
    }

    /// Set the server receipt time, overwriting any sensor-supplied value.
    ///
    /// An existing `timestamp` key keeps its position; otherwise the field is
    /// appended after the sensor's own fields.
    pub fn stamp(&mut self, received_at: DateTime<Local>) {
        self.fields.insert(
            TIMESTAMP_FIELD.to_string(),
            Value::String(format_timestamp(received_at)),
        );
    }

    /// Serialize as one JSON object on a single line, newline included.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut out = Vec::with_capacity(128);
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, LogFormatter);
        self.fields.serialize(&mut serializer)?;
        out.push(b'\n');
        // LogFormatter escapes everything outside ASCII
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

impl std::fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let line = self.to_line().map_err(|_| std::fmt::Error)?;
        f.write_str(line.trim_end())
    }
}

/// Single-line JSON with spaced separators and ASCII-only output
struct LogFormatter;

impl Formatter for LogFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            if c.is_ascii() && c != '\x7f' {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = i + c.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Format a receipt time the way it is written to the log.
pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, TimeZone};

    fn fixed_time() -> DateTime<Local> {
        let naive = NaiveDateTime::parse_from_str("2024-01-01 12:00:00.25", "%Y-%m-%d %H:%M:%S%.f")
            .unwrap();
        Local.from_local_datetime(&naive).earliest().unwrap()
    }

    #[test]
    fn test_decode_object() {
        let record = TelemetryRecord::decode(br#"{"temp": 21.5}"#).unwrap();
        assert_eq!(record.field_count(), 1);
        assert_eq!(record.get("temp"), Some(&Value::from(21.5)));
    }

    #[test]
    fn test_decode_tolerates_surrounding_whitespace() {
        assert!(TelemetryRecord::decode(b"  {\"batt\": 80}\r\n").is_ok());
    }

    #[test]
    fn test_decode_invalid_json() {
        match TelemetryRecord::decode(b"{\"temp\": ") {
            Err(DecodeError::InvalidJson(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_invalid_utf8() {
        match TelemetryRecord::decode(&[0x7b, 0xff, 0xfe, 0x7d]) {
            Err(DecodeError::InvalidUtf8(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        for frame in [&b"[1, 2]"[..], b"42", b"\"hi\"", b"true", b"null"] {
            match TelemetryRecord::decode(frame) {
                Err(DecodeError::NotAnObject(_)) => {}
                other => panic!("unexpected for {:?}: {:?}", frame, other),
            }
        }
    }

    #[test]
    fn test_decode_rejects_two_objects_in_one_frame() {
        assert!(TelemetryRecord::decode(br#"{"a":1}{"b":2}"#).is_err());
    }

    #[test]
    fn test_stamp_appends_timestamp_last() {
        let mut record = TelemetryRecord::decode(br#"{"temp": 21.5, "hum": 40}"#).unwrap();
        record.stamp(fixed_time());
        assert_eq!(
            record.to_line().unwrap(),
            "{\"temp\": 21.5, \"hum\": 40, \"timestamp\": \"2024-01-01T12:00:00.250000\"}\n"
        );
    }

    #[test]
    fn test_stamp_overwrites_sensor_timestamp() {
        let mut record =
            TelemetryRecord::decode(br#"{"timestamp": "bogus", "temp": 1}"#).unwrap();
        record.stamp(fixed_time());
        assert_eq!(record.field_count(), 2);
        assert_eq!(
            record.to_line().unwrap(),
            "{\"timestamp\": \"2024-01-01T12:00:00.250000\", \"temp\": 1}\n"
        );
    }

    #[test]
    fn test_timestamp_format() {
        let formatted = format_timestamp(fixed_time());
        assert_eq!(formatted, "2024-01-01T12:00:00.250000");
        assert!(NaiveDateTime::parse_from_str(&formatted, TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn test_display_has_no_newline() {
        let record = TelemetryRecord::decode(br#"{"co": 35.2}"#).unwrap();
        assert_eq!(record.to_string(), "{\"co\": 35.2}");
    }

    #[test]
    fn test_large_integers_keep_their_digits() {
        let mut record = TelemetryRecord::decode(
            br#"{"temp": 21.5, "big": 123456789012345678901234567890, "tiny": 1.0000000000000000001}"#,
        )
        .unwrap();
        record.stamp(fixed_time());
        assert_eq!(
            record.to_line().unwrap(),
            "{\"temp\": 21.5, \"big\": 123456789012345678901234567890, \
             \"tiny\": 1.0000000000000000001, \"timestamp\": \"2024-01-01T12:00:00.250000\"}\n"
        );
    }

    #[test]
    fn test_non_ascii_is_escaped() {
        let record =
            TelemetryRecord::decode("{\"name\": \"café\", \"unit\": \"°C 🌡\", \"tab\": \"a\\tb\"}".as_bytes())
                .unwrap();
        assert_eq!(
            record.to_line().unwrap(),
            "{\"name\": \"caf\\u00e9\", \"unit\": \"\\u00b0C \\ud83c\\udf21\", \"tab\": \"a\\tb\"}\n"
        );
    }

    #[test]
    fn test_nested_values_use_spaced_separators() {
        let record = TelemetryRecord::decode(br#"{"acc":[1,2,3],"gps":{"lat":1.5,"lon":-2}}"#).unwrap();
        assert_eq!(
            record.to_line().unwrap(),
            "{\"acc\": [1, 2, 3], \"gps\": {\"lat\": 1.5, \"lon\": -2}}\n"
        );
    }
}
