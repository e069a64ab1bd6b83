use std::sync::Arc;

use chrono::Utc;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use parking_lot::Mutex;

use crate::processing::ring_buffer::RingBuffer;

/// Shared handle to the most recent captured log lines.
#[derive(Clone)]
pub struct LogBuffer {
    lines: Arc<Mutex<RingBuffer<String>>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(RingBuffer::new(capacity))),
        }
    }

    pub fn push(&self, line: String) {
        self.lines.lock().push(line);
    }

    /// Captured lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lines.lock().reset();
    }
}

/// `log` backend that keeps a tail of recent lines for bug reports and
/// forwards every record to an optional inner logger.
pub struct LogCapture {
    inner: Option<Box<dyn Log>>,
    buffer: LogBuffer,
    level: LevelFilter,
}

impl LogCapture {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: None,
            buffer: LogBuffer::new(capacity),
            level: LevelFilter::Info,
        }
    }

    /// Also forward records to `inner` (e.g. an `env_logger::Logger`).
    pub fn with_inner(mut self, inner: Box<dyn Log>) -> Self {
        self.inner = Some(inner);
        self
    }

    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    pub fn buffer(&self) -> LogBuffer {
        self.buffer.clone()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.buffer.snapshot()
    }

    /// Installs this capture as the global logger.
    pub fn install(self) -> Result<LogBuffer, SetLoggerError> {
        let buffer = self.buffer();
        let level = self.level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(level);
        Ok(buffer)
    }

    fn format(record: &Record) -> String {
        format!(
            "{} {:<5} {}: {}",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            record.level(),
            record.target(),
            record.args()
        )
    }
}

impl Log for LogCapture {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.buffer.push(Self::format(record));
        }
        if let Some(inner) = &self.inner {
            if inner.enabled(record.metadata()) {
                inner.log(record);
            }
        }
    }

    fn flush(&self) {
        if let Some(inner) = &self.inner {
            inner.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    fn emit(capture: &LogCapture, level: Level, message: &str) {
        capture.log(
            &Record::builder()
                .args(format_args!("{}", message))
                .level(level)
                .target("game::net")
                .build(),
        );
    }

    #[test]
    fn keeps_most_recent_lines() {
        let capture = LogCapture::new(2);
        emit(&capture, Level::Info, "first");
        emit(&capture, Level::Warn, "second");
        emit(&capture, Level::Error, "third");

        let lines = capture.snapshot();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("WARN  game::net: second"), "{}", lines[0]);
        assert!(lines[1].ends_with("ERROR game::net: third"), "{}", lines[1]);
    }

    #[test]
    fn filters_below_level() {
        let capture = LogCapture::new(8).with_level(LevelFilter::Warn);
        emit(&capture, Level::Debug, "noise");
        emit(&capture, Level::Warn, "kept");

        assert_eq!(capture.buffer().len(), 1);
    }

    #[test]
    fn buffer_handles_share_lines() {
        let capture = LogCapture::new(8);
        let handle = capture.buffer();
        emit(&capture, Level::Info, "shared");
        assert_eq!(handle.snapshot().len(), 1);

        handle.clear();
        assert!(capture.snapshot().is_empty());
    }
}
