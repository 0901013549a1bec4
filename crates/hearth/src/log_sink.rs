//! Diagnostic sink published under `hearth.errors`.

use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::warn;

use crate::host::HostLog;

/// Forwards application diagnostics to the host log.
///
/// Without a host log, messages go to the process log at WARN level.
#[derive(Clone, Default)]
pub struct ErrorSink {
    host: Option<Arc<dyn HostLog>>,
}

impl ErrorSink {
    pub fn new(host: Option<Arc<dyn HostLog>>) -> Self {
        Self { host }
    }

    pub fn is_configured(&self) -> bool {
        self.host.is_some()
    }

    pub fn write(&self, message: &str) {
        match &self.host {
            Some(host) => host.log(message),
            None => warn!(message = message.trim_end(), "host log not configured"),
        }
    }

    pub fn write_lines<I>(&self, lines: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for line in lines {
            self.write(line.as_ref());
        }
    }

    pub fn flush(&self) {}
}

impl io::Write for ErrorSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ErrorSink::write(self, &String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("configured", &self.is_configured())
            .finish()
    }
}
