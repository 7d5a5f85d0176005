use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use super::colors::color_enabled;
use super::record::{format_record, format_record_colored, LogRecord};

/// A log output. Sinks receive every record that passed the level gate, in
/// registration order; their errors are reported to stderr by the caller
/// and never abort emission to the remaining sinks.
pub trait Sink: Send + Sync {
    fn emit(&self, record: &LogRecord) -> Result<()>;

    /// Release held resources. Default is a no-op.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes formatted lines to any writer, serialised per sink.
pub struct StreamSink<W: Write + Send> {
    writer: Mutex<W>,
    colored: bool,
}

impl<W: Write + Send> StreamSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            colored: color_enabled(),
        }
    }

    pub fn plain(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            colored: false,
        }
    }
}

impl<W: Write + Send> Sink for StreamSink<W> {
    fn emit(&self, record: &LogRecord) -> Result<()> {
        let line = if self.colored {
            format_record_colored(record)
        } else {
            format_record(record)
        };

        let mut writer = self.writer.lock().expect("stream sink poisoned");
        writeln!(writer, "{}", line)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.writer.lock().expect("stream sink poisoned").flush()?;
        Ok(())
    }
}

/// Append-only file sink. The file is opened once at construction and
/// flushed on close; output is never colored.
pub struct FileSink {
    inner: StreamSink<File>,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .with_context(|| format!("couldn't open log file {}", path.as_ref().display()))?;

        Ok(Self {
            inner: StreamSink::plain(file),
        })
    }
}

impl Sink for FileSink {
    fn emit(&self, record: &LogRecord) -> Result<()> {
        self.inner.emit(record)
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

/// Syslog-style sink: plain formatting to stderr.
pub struct SyslogSink {
    inner: StreamSink<std::io::Stderr>,
}

impl SyslogSink {
    pub fn new() -> Self {
        Self {
            inner: StreamSink::plain(std::io::stderr()),
        }
    }
}

impl Default for SyslogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for SyslogSink {
    fn emit(&self, record: &LogRecord) -> Result<()> {
        self.inner.emit(record)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Arc;

    /// Writer that collects lines into shared memory.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(pub(crate) Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
