//! Structured event reporting (SPEC_FULL.md §6 "Event sink"). Well-known
//! codes: `RANGE_START`, `RANGE_COMPLETE`, `CHUNK_VFY_OK`, `CHUNK_VFY_FAIL`,
//! `AUTO_BUFFER_ON`, `READ_AHEAD`, `ERROR_DOWNLOAD`, `ERROR_HASH`,
//! `SHUTDOWN_BEGIN`, `SHUTDOWN_COMPLETE`.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;

/// A single structured event: a well-known code plus arbitrary key-value
/// fields, rendered as a `tracing` event by [`TracingEventSink`] or a JSON
/// line by [`JsonFileEventSink`].
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub code: &'static str,
    pub fields: Vec<(&'static str, String)>,
}

impl Event {
    #[must_use]
    pub fn new(code: &'static str) -> Self {
        Self {
            code,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.fields.push((key, value.to_string()));
        self
    }
}

pub const RANGE_START: &str = "RANGE_START";
pub const RANGE_COMPLETE: &str = "RANGE_COMPLETE";
pub const CHUNK_VFY_OK: &str = "CHUNK_VFY_OK";
pub const CHUNK_VFY_FAIL: &str = "CHUNK_VFY_FAIL";
pub const AUTO_BUFFER_ON: &str = "AUTO_BUFFER_ON";
pub const READ_AHEAD: &str = "READ_AHEAD";
pub const ERROR_DOWNLOAD: &str = "ERROR_DOWNLOAD";
pub const ERROR_HASH: &str = "ERROR_HASH";
pub const SHUTDOWN_BEGIN: &str = "SHUTDOWN_BEGIN";
pub const SHUTDOWN_COMPLETE: &str = "SHUTDOWN_COMPLETE";

/// Receives structured events from a painter. Implementors must not block
/// the caller for long; the default implementation just logs.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Default sink: forwards every event to `tracing`, `WARN` for the two
/// error codes and `DEBUG` otherwise.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        let fields = event
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        match event.code {
            ERROR_DOWNLOAD | ERROR_HASH | CHUNK_VFY_FAIL => {
                tracing::warn!(code = event.code, "{fields}");
            }
            _ => {
                tracing::debug!(code = event.code, "{fields}");
            }
        }
    }
}

/// Sink that silently drops every event. Useful in tests that don't care
/// about observability output.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: Event) {}
}

/// Writes each event as a newline-delimited JSON object to `F.log`
/// (SPEC_FULL.md §6's "optional structured event log"). Serialization
/// failures and write errors are logged via `tracing` rather than panicking
/// — losing one log line is not worth tearing down a download.
pub struct JsonFileEventSink {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonFileEventSink {
    /// Open (creating if absent, appending if present) the log file at
    /// `path`.
    ///
    /// # Errors
    /// Propagates I/O errors opening the file.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonFileEventSink {
    fn emit(&self, event: Event) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event for F.log");
                return;
            }
        };
        let mut file = self.file.lock().expect("event log mutex poisoned");
        if let Err(e) = writeln!(file, "{line}") {
            tracing::warn!(error = %e, "failed to append to F.log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_builder_collects_fields() {
        let event = Event::new(RANGE_START).with("offset", 0u64).with("length", 4096u64);
        assert_eq!(event.fields.len(), 2);
        assert_eq!(event.fields[0], ("offset", "0".to_string()));
    }

    #[test]
    fn null_sink_accepts_any_event() {
        let sink = NullEventSink;
        sink.emit(Event::new(CHUNK_VFY_OK));
    }

    #[test]
    fn json_file_sink_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("artifact.log");
        let sink = JsonFileEventSink::open(&log_path).unwrap();
        sink.emit(Event::new(RANGE_START).with("offset", 0u64));
        sink.emit(Event::new(RANGE_COMPLETE).with("bytes", 1024u64));

        let contents = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["code"], "RANGE_START");
    }
}
