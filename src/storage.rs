//! Append-only telemetry log.
//!
//! One file, one JSON object per line. The file is opened (and created if
//! missing) when a session starts and closed when it ends; records from
//! every session accumulate in the same file.

use chrono::Local;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::record::TelemetryRecord;

/// Open handle to the telemetry log for one session
#[derive(Debug)]
pub struct TelemetryLog {
    file: File,
    path: PathBuf,
    appended: u64,
}

impl TelemetryLog {
    /// Open the log for appending, creating it if absent.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!(path = %path.display(), "Opened telemetry log");
        Ok(TelemetryLog {
            file,
            path,
            appended: 0,
        })
    }

    /// Stamp a record with the current local time and append it as one line.
    pub async fn append(&mut self, mut record: TelemetryRecord) -> io::Result<TelemetryRecord> {
        record.stamp(Local::now());
        let line = record.to_line()?;

        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        self.appended += 1;

        debug!(bytes = line.len(), total = self.appended, "Appended record");
        Ok(record)
    }

    /// Records appended through this handle
    pub fn appended(&self) -> u64 {
        self.appended
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TIMESTAMP_FIELD;
    use serde_json::Value;

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        assert!(!path.exists());

        let log = TelemetryLog::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(log.appended(), 0);
        assert_eq!(log.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_append_writes_stamped_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");

        let mut log = TelemetryLog::open(&path).await.unwrap();
        let record = TelemetryRecord::decode(br#"{"temp": 21.5}"#).unwrap();
        let stored = log.append(record).await.unwrap();
        assert_eq!(log.appended(), 1);

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["temp"], Value::from(21.5));
        assert!(lines[0][TIMESTAMP_FIELD].is_string());
        assert_eq!(stored.field_count(), 2);
    }

    #[tokio::test]
    async fn test_append_keeps_sensor_number_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");

        let mut log = TelemetryLog::open(&path).await.unwrap();
        let record =
            TelemetryRecord::decode(br#"{"id": 123456789012345678901234567890, "v": 1.10}"#).unwrap();
        log.append(record).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("{\"id\": 123456789012345678901234567890, \"v\": 1.10, \"timestamp\": \""));
        assert!(raw.ends_with("\"}\n"));
    }

    #[tokio::test]
    async fn test_reopen_appends_after_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "{\"earlier\":true}\n").unwrap();

        {
            let mut log = TelemetryLog::open(&path).await.unwrap();
            log.append(TelemetryRecord::decode(b"{\"n\":1}").unwrap())
                .await
                .unwrap();
        }
        {
            let mut log = TelemetryLog::open(&path).await.unwrap();
            log.append(TelemetryRecord::decode(b"{\"n\":2}").unwrap())
                .await
                .unwrap();
        }

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["earlier"], Value::Bool(true));
        assert_eq!(lines[1]["n"], Value::from(1));
        assert_eq!(lines[2]["n"], Value::from(2));
    }

    #[tokio::test]
    async fn test_open_fails_in_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("data.json");
        assert!(TelemetryLog::open(&path).await.is_err());
    }
}
