//! Append-only text logger: `<timestamp> [<name>] <message>` per line.
//!
//! Records from concurrent restart workers are serialized at the sink: each
//! record is rendered up front and written with a single `write_all` under the
//! sink lock, then flushed before the lock is released.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;

/// Timestamp layout used for every record.
const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

type SharedSink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Cheap-to-clone handle onto a shared log sink.
#[derive(Clone)]
pub struct Logger {
    name: Arc<str>,
    sink: SharedSink,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("name", &self.name).finish()
    }
}

impl Logger {
    /// Logger writing to the process error stream.
    #[must_use]
    pub fn stderr(name: impl Into<String>) -> Self {
        Self::to_writer(name, io::stderr())
    }

    /// Logger writing to an arbitrary sink.
    #[must_use]
    pub fn to_writer(name: impl Into<String>, writer: impl Write + Send + 'static) -> Self {
        Self {
            name: Arc::from(name.into()),
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Logger backed by an in-memory sink, for tests and embedding.
    #[must_use]
    pub fn memory(name: impl Into<String>) -> (Self, MemorySink) {
        let sink = MemorySink::default();
        (Self::to_writer(name, sink.clone()), sink)
    }

    /// Daemon name stamped on every record.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write one record. Sink failures are swallowed: there is nowhere left to
    /// report them.
    pub fn log(&self, message: impl fmt::Display) {
        let record = format!(
            "{} [{}] {}\n",
            Local::now().format(TIMESTAMP_FORMAT),
            self.name,
            message
        );
        let mut sink = self.sink.lock();
        let _ = sink.write_all(record.as_bytes());
        let _ = sink.flush();
    }
}

/// Clonable in-memory sink that keeps everything written to it.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    /// Full captured text.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    /// Captured records, one entry per line.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }

    /// Number of captured lines containing `needle`.
    #[must_use]
    pub fn count_containing(&self, needle: &str) -> usize {
        self.lines().iter().filter(|line| line.contains(needle)).count()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
