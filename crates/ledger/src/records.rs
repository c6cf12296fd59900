//! Append-only record log
//!
//! One JSON object per line. Access and alert records share the stream.

use crate::LedgerError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Logged for every accepted heartbeat
#[derive(Debug, Clone, Serialize)]
pub struct AccessRecord {
    pub ip: String,
    pub id: String,
    pub at: DateTime<Utc>,
}

/// Logged for every delivered alert
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub id: String,
    pub at: DateTime<Utc>,
}

enum Command {
    Line(String),
    Flush(oneshot::Sender<()>),
}

/// Line-delimited JSON record sink.
///
/// Records are encoded by the caller and written by a dedicated thread, so
/// appending never blocks on disk I/O. Lines are written in append order.
pub struct RecordLog {
    tx: mpsc::UnboundedSender<Command>,
}

impl RecordLog {
    /// Open `path` for appending, creating it if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!("Appending records to {}", path.display());
        Ok(Self::from_writer(file))
    }

    /// Write records to an arbitrary sink
    pub fn from_writer<W: Write + Send + 'static>(mut writer: W) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();

        std::thread::spawn(move || {
            while let Some(command) = rx.blocking_recv() {
                match command {
                    Command::Line(line) => {
                        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
                            error!("Failed to write record log: {}", e);
                        }
                    }
                    Command::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Record log writer stopped");
        });

        Self { tx }
    }

    /// Drop every record
    pub fn discard() -> Self {
        Self::from_writer(io::sink())
    }

    /// Append one record. Failures are reported, never returned.
    pub fn append<R: Serialize>(&self, record: &R) {
        match serde_json::to_string(record) {
            Ok(line) => self.send_line(line),
            Err(e) => {
                warn!("Failed to encode record: {}", e);
                self.send_line(format!("Failed to encode record: {}", e));
            }
        }
    }

    /// Wait until every record appended so far is written
    pub async fn flush(&self) {
        let (done, written) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).is_ok() {
            let _ = written.await;
        }
    }

    fn send_line(&self, line: String) {
        if self.tx.send(Command::Line(line)).is_err() {
            error!("Record log writer is gone, record dropped");
        }
    }
}

impl std::fmt::Debug for RecordLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordLog").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::ser::Error as _;

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("boom"))
        }
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_records_are_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchdog.log");
        let log = RecordLog::open(&path).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        log.append(&AccessRecord {
            ip: "10.0.0.1:5555".to_string(),
            id: "svc-a".to_string(),
            at,
        });
        log.append(&AlertRecord {
            id: "svc-a".to_string(),
            at,
        });
        log.flush().await;

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);

        let access: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(access["ip"], "10.0.0.1:5555");
        assert_eq!(access["id"], "svc-a");
        assert_eq!(access["at"], "2024-03-01T12:00:00Z");

        let alert: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(alert["id"], "svc-a");
        assert!(alert.get("ip").is_none());
    }

    #[tokio::test]
    async fn test_open_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchdog.log");
        std::fs::write(&path, "earlier\n").unwrap();

        let log = RecordLog::open(&path).unwrap();
        log.append(&AlertRecord {
            id: "x".to_string(),
            at: Utc::now(),
        });
        log.flush().await;

        let lines = read_lines(&path);
        assert_eq!(lines[0], "earlier");
        assert_eq!(lines.len(), 2);
    }

    #[tokio::test]
    async fn test_encoding_failure_writes_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchdog.log");
        let log = RecordLog::open(&path).unwrap();

        log.append(&Unencodable);
        log.flush().await;

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Failed to encode record"));
    }

    #[tokio::test]
    async fn test_appends_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchdog.log");
        let log = RecordLog::open(&path).unwrap();

        for i in 0..100 {
            log.append(&AlertRecord {
                id: i.to_string(),
                at: Utc::now(),
            });
        }
        log.flush().await;

        let ids: Vec<String> = read_lines(&path)
            .iter()
            .map(|line| {
                let record: serde_json::Value = serde_json::from_str(line).unwrap();
                record["id"].as_str().unwrap().to_string()
            })
            .collect();
        let expected: Vec<String> = (0..100).map(|i: i32| i.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = RecordLog::open(dir.path().join("missing").join("watchdog.log"));
        assert!(matches!(result, Err(LedgerError::RecordLog(_))));
    }
}
