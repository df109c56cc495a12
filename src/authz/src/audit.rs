//! Fan-out audit pipeline for authorization decisions
//!
//! The [`AuditLogger`] stamps each event with an ID and timestamp and hands
//! it to every registered [`AuditWriter`] in order. A failing writer never
//! stops the others; the last error is reported back to the caller.
//!
//! Writers:
//! - [`StdoutWriter`] - one JSON line per event on stdout
//! - [`FileWriter`] - append-only JSON lines, synced after every event
//! - [`BatchWriter`] - batching placeholder for an external object store
//! - [`MemoryWriter`] - in-process buffer

use crate::error::AuditError;
use crate::model::{Clearance, DeviceId, Layer};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Recorded decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditDecision {
    Allow,
    Deny,
}

/// Immutable record of one authorization decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID, assigned by the logger when empty
    #[serde(default)]
    pub event_id: String,

    /// UTC time of the decision, assigned by the logger when absent
    pub timestamp: Option<DateTime<Utc>>,

    /// Who asked: `device-<id>`, `anonymous`, or `unknown` for rejected input
    pub actor: String,

    pub clearance: Option<Clearance>,
    pub device_id: Option<DeviceId>,
    pub layer: Option<Layer>,

    /// Route acted upon
    pub action: String,

    pub method: String,

    /// Full request target (path and query)
    pub resource: String,

    pub decision: AuditDecision,
    pub reason: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub additional_data: serde_json::Map<String, serde_json::Value>,
}

impl AuditEvent {
    /// Create an event with a fresh ID and the current time
    pub fn new(
        decision: AuditDecision,
        action: impl Into<String>,
        resource: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            event_id: generate_event_id(),
            timestamp: Some(Utc::now()),
            actor: String::new(),
            clearance: None,
            device_id: None,
            layer: None,
            action: action.into(),
            method: String::new(),
            resource: resource.into(),
            decision,
            reason: reason.into(),
            request_id: None,
            source_ip: None,
            status_code: None,
            additional_data: serde_json::Map::new(),
        }
    }

    /// Fill in the event ID and timestamp if the caller left them out
    fn stamp(&mut self) {
        if self.event_id.is_empty() {
            self.event_id = generate_event_id();
        }
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now());
        }
    }
}

/// Generate an event ID of the form `evt-<32 hex chars>`
pub fn generate_event_id() -> String {
    format!("evt-{}", Uuid::new_v4().simple())
}

/// Sink for audit events
///
/// Implementations lock internally; the logger calls `write` concurrently
/// from many requests.
pub trait AuditWriter: Send + Sync {
    /// Short name used in diagnostics
    fn name(&self) -> &'static str;

    fn write(&self, event: &AuditEvent) -> Result<(), AuditError>;

    fn close(&self) -> Result<(), AuditError>;
}

struct LoggerState {
    writers: Vec<Arc<dyn AuditWriter>>,
    enabled: bool,
}

/// Audit logger fanning events out to its writers
pub struct AuditLogger {
    state: RwLock<LoggerState>,
}

impl AuditLogger {
    /// Create an enabled logger with no writers
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LoggerState {
                writers: Vec::new(),
                enabled: true,
            }),
        }
    }

    pub fn add_writer(&self, writer: Arc<dyn AuditWriter>) {
        debug!(writer = writer.name(), "Audit writer added");
        self.state.write().writers.push(writer);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.write().enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.state.read().enabled
    }

    pub fn writer_count(&self) -> usize {
        self.state.read().writers.len()
    }

    /// Write an event to every writer
    ///
    /// No-op when disabled. Every writer is attempted; the last failure is
    /// returned.
    pub fn log(&self, mut event: AuditEvent) -> Result<(), AuditError> {
        let writers = {
            let state = self.state.read();
            if !state.enabled {
                return Ok(());
            }
            state.writers.clone()
        };

        event.stamp();

        let mut last_error = None;
        for writer in &writers {
            if let Err(e) = writer.write(&event) {
                warn!(writer = writer.name(), event_id = %event.event_id, error = %e, "Audit write failed");
                last_error = Some(e);
            }
        }

        last_error.map_or(Ok(()), Err)
    }

    /// Close every writer, returning the last failure
    pub fn close(&self) -> Result<(), AuditError> {
        let state = self.state.write();

        let mut last_error = None;
        for writer in &state.writers {
            if let Err(e) = writer.close() {
                warn!(writer = writer.name(), error = %e, "Audit writer close failed");
                last_error = Some(e);
            }
        }

        last_error.map_or(Ok(()), Err)
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes each event as a JSON line on stdout
pub struct StdoutWriter {
    out: Mutex<io::Stdout>,
}

impl StdoutWriter {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(io::stdout()),
        }
    }
}

impl Default for StdoutWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditWriter for StdoutWriter {
    fn name(&self) -> &'static str {
        "stdout"
    }

    fn write(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let line = serde_json::to_string(event)?;
        let mut out = self.out.lock();
        writeln!(out, "{}", line)?;
        Ok(())
    }

    fn close(&self) -> Result<(), AuditError> {
        self.out.lock().flush()?;
        Ok(())
    }
}

/// Appends events as JSON lines to a file, syncing after each write
pub struct FileWriter {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileWriter {
    /// Open (or create) the audit file in append mode
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        debug!(path = %path.display(), "Audit file opened");

        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditWriter for FileWriter {
    fn name(&self) -> &'static str {
        "file"
    }

    fn write(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(AuditError::Closed("file"))?;
        file.write_all(&line)?;
        file.sync_all()?;
        Ok(())
    }

    fn close(&self) -> Result<(), AuditError> {
        if let Some(file) = self.file.lock().take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

/// Default number of events per upload batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Batching writer for an external immutable object store
///
/// Disabled by default. When enabled it queues events and resets the queue
/// once `batch_size` is reached; no upload target is wired yet, so full
/// batches are discarded with a warning.
pub struct BatchWriter {
    endpoint: String,
    bucket: String,
    enabled: bool,
    batch_size: usize,
    batch: Mutex<Vec<AuditEvent>>,
}

impl BatchWriter {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            enabled: false,
            batch_size: DEFAULT_BATCH_SIZE,
            batch: Mutex::new(Vec::with_capacity(DEFAULT_BATCH_SIZE)),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Events queued for the next batch
    pub fn pending(&self) -> usize {
        self.batch.lock().len()
    }
}

impl AuditWriter for BatchWriter {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn write(&self, event: &AuditEvent) -> Result<(), AuditError> {
        if !self.enabled {
            return Ok(());
        }

        let mut batch = self.batch.lock();
        batch.push(event.clone());

        if batch.len() >= self.batch_size {
            // TODO: upload to the object store once a client is wired in
            warn!(
                endpoint = %self.endpoint,
                bucket = %self.bucket,
                events = batch.len(),
                "Audit batch full with no upload target; discarding"
            );
            batch.clear();
        }

        Ok(())
    }

    fn close(&self) -> Result<(), AuditError> {
        if !self.enabled {
            return Ok(());
        }

        let mut batch = self.batch.lock();
        if !batch.is_empty() {
            warn!(events = batch.len(), "Discarding unflushed audit batch on close");
        }
        batch.clear();
        Ok(())
    }
}

/// Keeps events in memory
#[derive(Default)]
pub struct MemoryWriter {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event written so far
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditWriter for MemoryWriter {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn close(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and always fails
    #[derive(Default)]
    struct FailingWriter {
        writes: AtomicUsize,
        closes: AtomicUsize,
    }

    impl AuditWriter for FailingWriter {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn write(&self, _event: &AuditEvent) -> Result<(), AuditError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(AuditError::Io(io::Error::new(io::ErrorKind::Other, "disk full")))
        }

        fn close(&self) -> Result<(), AuditError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Err(AuditError::Closed("failing"))
        }
    }

    fn bare_event() -> AuditEvent {
        AuditEvent {
            event_id: String::new(),
            timestamp: None,
            ..AuditEvent::new(AuditDecision::Deny, "/api/restricted", "/api/restricted?x=1", "test")
        }
    }

    #[test]
    fn test_log_assigns_id_and_timestamp() {
        let logger = AuditLogger::new();
        let memory = Arc::new(MemoryWriter::new());
        logger.add_writer(memory.clone());

        logger.log(bare_event()).unwrap();

        let events = memory.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].event_id.starts_with("evt-"));
        assert_eq!(events[0].event_id.len(), 36);
        assert!(events[0].timestamp.is_some());
    }

    #[test]
    fn test_log_keeps_caller_id() {
        let logger = AuditLogger::new();
        let memory = Arc::new(MemoryWriter::new());
        logger.add_writer(memory.clone());

        let mut event = bare_event();
        event.event_id = "evt-fixed".to_string();
        logger.log(event).unwrap();

        assert_eq!(memory.events()[0].event_id, "evt-fixed");
    }

    #[test]
    fn test_disabled_logger_skips_writers() {
        let logger = AuditLogger::new();
        let failing = Arc::new(FailingWriter::default());
        logger.add_writer(failing.clone());
        logger.set_enabled(false);

        assert!(logger.log(bare_event()).is_ok());
        assert_eq!(failing.writes.load(Ordering::SeqCst), 0);
        assert!(!logger.is_enabled());
    }

    #[test]
    fn test_failure_does_not_block_other_writers() {
        let logger = AuditLogger::new();
        let failing = Arc::new(FailingWriter::default());
        let memory = Arc::new(MemoryWriter::new());
        logger.add_writer(failing.clone());
        logger.add_writer(memory.clone());

        let result = logger.log(bare_event());

        assert!(matches!(result, Err(AuditError::Io(_))));
        assert_eq!(failing.writes.load(Ordering::SeqCst), 1);
        assert_eq!(memory.len(), 1);
        assert_eq!(logger.writer_count(), 2);
    }

    #[test]
    fn test_close_reaches_every_writer() {
        let logger = AuditLogger::new();
        let failing = Arc::new(FailingWriter::default());
        logger.add_writer(failing.clone());
        logger.add_writer(Arc::new(MemoryWriter::new()));

        assert!(matches!(logger.close(), Err(AuditError::Closed("failing"))));
        assert_eq!(failing.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_file_writer_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");

        let writer = FileWriter::open(&path).unwrap();
        let mut first = bare_event();
        first.stamp();
        let mut second = bare_event();
        second.stamp();
        second.decision = AuditDecision::Allow;

        writer.write(&first).unwrap();
        writer.write(&second).unwrap();
        writer.close().unwrap();

        let lines: Vec<String> = BufReader::new(File::open(&path).unwrap())
            .lines()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines.len(), 2);

        let parsed: AuditEvent = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(parsed.event_id, second.event_id);
        assert_eq!(parsed.decision, AuditDecision::Allow);

        assert!(matches!(writer.write(&first), Err(AuditError::Closed("file"))));
    }

    #[test]
    fn test_batch_writer_disabled_by_default() {
        let writer = BatchWriter::new("localhost:9000", "audit");
        writer.write(&bare_event()).unwrap();
        assert_eq!(writer.pending(), 0);
    }

    #[test]
    fn test_batch_writer_resets_at_batch_size() {
        let writer = BatchWriter::new("localhost:9000", "audit")
            .with_enabled(true)
            .with_batch_size(3);

        writer.write(&bare_event()).unwrap();
        writer.write(&bare_event()).unwrap();
        assert_eq!(writer.pending(), 2);

        writer.write(&bare_event()).unwrap();
        assert_eq!(writer.pending(), 0);

        writer.write(&bare_event()).unwrap();
        writer.close().unwrap();
        assert_eq!(writer.pending(), 0);
    }

    #[test]
    fn test_event_json_shape() {
        let mut event = AuditEvent::new(AuditDecision::Allow, "/api/public", "/api/public", "allowed by rule 'Public'");
        event.actor = "device-3".to_string();
        event.device_id = Some(3);
        event.layer = Some(Layer::Transport);
        event.clearance = Some(Clearance::LEVEL_4);
        event.method = "GET".to_string();

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["decision"], "allow");
        assert_eq!(value["layer"], "transport");
        assert_eq!(value["clearance"], 0x0404_0404u32);
        assert_eq!(value["device_id"], 3);
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(value.get("request_id").is_none());
        assert!(value.get("status_code").is_none());
    }

    #[test]
    fn test_concurrent_logging() {
        let logger = Arc::new(AuditLogger::new());
        let memory = Arc::new(MemoryWriter::new());
        logger.add_writer(memory.clone());

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let logger = Arc::clone(&logger);
                scope.spawn(move || {
                    for _ in 0..25 {
                        logger.log(bare_event()).unwrap();
                    }
                });
            }
        });

        let events = memory.events();
        assert_eq!(events.len(), 100);
        let unique: std::collections::HashSet<_> = events.iter().map(|e| e.event_id.clone()).collect();
        assert_eq!(unique.len(), 100);
    }
}
