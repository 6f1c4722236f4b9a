//! Structured JSONL event log.
//!
//! One JSON object per line, one line per request outcome. The log is
//! advisory: a failed write never changes what the debugger does.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;

use crate::diagnostics::Site;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    Alloc,
    AllocFail,
    Free,
    InvalidFree,
    WildWrite,
    Leak,
    Reset,
}

impl LogEvent {
    #[must_use]
    pub const fn level(self) -> LogLevel {
        match self {
            Self::Alloc | Self::Free | Self::Reset => LogLevel::Info,
            Self::AllocFail | Self::Leak => LogLevel::Warn,
            Self::InvalidFree | Self::WildWrite => LogLevel::Error,
        }
    }
}

/// A single log record.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp_ms: u64,
    pub seq: u64,
    pub level: LogLevel,
    pub event: LogEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<Site>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LogEntry {
    #[must_use]
    pub fn new(event: LogEvent) -> Self {
        Self {
            timestamp_ms: now_ms(),
            seq: 0,
            level: event.level(),
            event,
            site: None,
            ptr: None,
            size: None,
            detail: None,
        }
    }

    #[must_use]
    pub fn with_site(mut self, site: Site) -> Self {
        self.site = Some(site);
        self
    }

    #[must_use]
    pub fn with_ptr(mut self, ptr: usize) -> Self {
        self.ptr = Some(format!("{ptr:#x}"));
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Shared in-memory sink, mainly for tests.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    /// Everything written so far, split into lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes [`LogEntry`] lines to a file, stdout, or a buffer.
pub struct LogEmitter {
    writer: Box<dyn Write + Send>,
    seq: u64,
}

impl LogEmitter {
    pub fn to_file(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::to_writer(BufWriter::new(file)))
    }

    #[must_use]
    pub fn to_stdout() -> Self {
        Self::to_writer(io::stdout())
    }

    /// Emitter backed by a [`LogBuffer`] the caller can read back.
    #[must_use]
    pub fn to_buffer() -> (Self, LogBuffer) {
        let buffer = LogBuffer::default();
        (Self::to_writer(buffer.clone()), buffer)
    }

    #[must_use]
    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Box::new(writer),
            seq: 0,
        }
    }

    /// Stamp the entry with the next sequence number and write it.
    pub fn emit(&mut self, mut entry: LogEntry) -> io::Result<()> {
        self.seq += 1;
        entry.seq = self.seq;
        let line = entry.to_jsonl().map_err(io::Error::other)?;
        writeln!(self.writer, "{line}")
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for LogEmitter {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
