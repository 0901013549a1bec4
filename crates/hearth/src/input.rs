//! Request body adapter published under `hearth.input`.

use std::cell::RefCell;
use std::fmt;
use std::io::{self, BufRead, Read};
use std::rc::Rc;

use bytes::Bytes;

const READ_ALL_CHUNK: usize = 8192;

/// Byte-oriented reader over the host's request body.
///
/// Clones share one underlying reader, so a middleware that consumes part of
/// the body leaves the rest for the application.
#[derive(Clone)]
pub struct InputStream {
    reader: Rc<RefCell<Box<dyn BufRead>>>,
}

impl InputStream {
    pub fn new(reader: impl BufRead + 'static) -> Self {
        Self {
            reader: Rc::new(RefCell::new(Box::new(reader))),
        }
    }

    pub fn from_bytes(body: impl Into<Bytes>) -> Self {
        Self::new(io::Cursor::new(body.into()))
    }

    pub fn empty() -> Self {
        Self::new(io::empty())
    }

    /// One read of at most `size` bytes. A short read returns fewer bytes;
    /// end of input returns an empty buffer.
    pub fn read(&self, size: usize) -> io::Result<Bytes> {
        let mut buf = vec![0u8; size];
        let n = self.reader.borrow_mut().read(&mut buf)?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    /// Everything up to end of input.
    pub fn read_all(&self) -> io::Result<Bytes> {
        let mut reader = self.reader.borrow_mut();
        let mut body = Vec::new();
        let mut chunk = [0u8; READ_ALL_CHUNK];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => body.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Bytes::from(body))
    }

    /// Bytes up to and including the next line feed, or at most `limit`
    /// bytes when given.
    pub fn read_line(&self, limit: Option<usize>) -> io::Result<Bytes> {
        let mut reader = self.reader.borrow_mut();
        let mut line = Vec::new();
        match limit {
            Some(limit) => {
                (&mut **reader).take(limit as u64).read_until(b'\n', &mut line)?;
            }
            None => {
                reader.read_until(b'\n', &mut line)?;
            }
        }
        Ok(Bytes::from(line))
    }

    /// Every remaining line.
    pub fn read_lines(&self) -> io::Result<Vec<Bytes>> {
        self.clone().collect()
    }
}

impl Iterator for InputStream {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_line(None) {
            Ok(line) if line.is_empty() => None,
            other => Some(other),
        }
    }
}

impl fmt::Debug for InputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputStream").finish_non_exhaustive()
    }
}
