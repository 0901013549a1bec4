//! Response commit state machine.
//!
//! [`ResponseCommit`] owns the host response for one request. Status and
//! headers are validated and stored by `start_response`; the first body
//! write pushes them to the host and freezes them.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use hearth_core::{Header, HeaderMap};
use tracing::debug;

use crate::error::{BridgeError, BridgeResult, ProtocolError};
use crate::host::HostResponse;

/// A parsed `"<code> <reason>"` status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: u16,
    reason: String,
}

impl Status {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Parse the code up to the first space; the rest is the reason.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let (code, reason) = line.split_once(' ').unwrap_or((line, ""));
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidStatus(line.to_string()));
        }
        let code = code
            .parse()
            .map_err(|_| ProtocolError::InvalidStatus(line.to_string()))?;
        Ok(Self::new(code, reason))
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {}", self.code, self.reason)
        }
    }
}

/// Validated status and latin-1 encoded headers, not yet on the wire.
#[derive(Debug, Clone)]
struct Head {
    status: Status,
    headers: Vec<(String, Vec<u8>)>,
}

impl Head {
    fn validate(status: &str, headers: &HeaderMap) -> Result<Self, ProtocolError> {
        let status = Status::parse(status)?;
        let headers = headers
            .iter()
            .map(encode_header)
            .collect::<Result<_, _>>()?;
        Ok(Self { status, headers })
    }
}

fn encode_header(header: &Header) -> Result<(String, Vec<u8>), ProtocolError> {
    if !header.has_valid_name() {
        return Err(ProtocolError::InvalidHeaderName(header.name.clone()));
    }
    let value = header
        .latin1_value()
        .map_err(|e| ProtocolError::NonLatin1Header {
            name: header.name.clone(),
            ch: e.ch,
        })?;
    Ok((header.name.clone(), value))
}

/// Status/header/body commit state of one response.
pub struct ResponseCommit {
    host: Box<dyn HostResponse>,
    head: Option<Head>,
    committed: bool,
}

impl ResponseCommit {
    pub fn new(host: Box<dyn HostResponse>) -> Self {
        Self {
            host,
            head: None,
            committed: false,
        }
    }

    pub fn shared(host: Box<dyn HostResponse>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new(host)))
    }

    /// Record status and headers.
    ///
    /// Without `retry`, a second call fails with `AlreadySet`. With `retry`,
    /// the head is replaced before commit; after commit `retry` itself is
    /// returned as the failure.
    pub fn set_status_and_headers(
        &mut self,
        status: &str,
        headers: &HeaderMap,
        retry: Option<anyhow::Error>,
    ) -> BridgeResult<()> {
        let retrying = match retry {
            Some(err) if self.committed => return Err(BridgeError::from_app(err)),
            Some(_) => true,
            None if self.head.is_some() => return Err(ProtocolError::AlreadySet.into()),
            None => false,
        };
        let head = Head::validate(status, headers)?;
        debug!(
            status = %head.status,
            headers = head.headers.len(),
            retrying,
            "status and headers set"
        );
        self.head = Some(head);
        Ok(())
    }

    /// Write body bytes, committing status and headers on the first call.
    pub fn write(&mut self, data: &[u8]) -> BridgeResult<()> {
        if !self.committed {
            self.commit()?;
        }
        if !data.is_empty() {
            self.host.write(data)?;
            self.host.flush()?;
        }
        Ok(())
    }

    fn commit(&mut self) -> BridgeResult<()> {
        let head = self.head.as_ref().ok_or(ProtocolError::WriteBeforeStatus)?;
        self.host.set_status(head.status.code(), head.status.reason());
        for (name, value) in &head.headers {
            self.host.add_header(name, value);
        }
        self.committed = true;
        debug!(status = %head.status, "response committed");
        Ok(())
    }

    /// Replace whatever was set with a plain `500` and send it.
    ///
    /// Only possible while nothing has reached the host.
    pub fn send_server_error(&mut self) -> BridgeResult<()> {
        if self.committed {
            return Ok(());
        }
        let headers: HeaderMap = [("Content-Type", "text/plain")].into_iter().collect();
        self.head = Some(Head::validate("500 Internal Server Error", &headers)?);
        self.write(b"Internal Server Error")
    }

    pub fn is_status_set(&self) -> bool {
        self.head.is_some()
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// The status recorded so far, committed or not.
    pub fn status(&self) -> Option<&Status> {
        self.head.as_ref().map(|h| &h.status)
    }
}

impl fmt::Debug for ResponseCommit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCommit")
            .field("status", &self.status())
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}

type StartFn = dyn Fn(&str, HeaderMap, Option<anyhow::Error>) -> BridgeResult<Writer>;
type WriteFn = dyn Fn(&[u8]) -> BridgeResult<()>;

/// The `start_response` callable handed to applications.
///
/// Middleware may wrap it with [`StartResponse::new`] to rewrite the status
/// or headers before forwarding.
#[derive(Clone)]
pub struct StartResponse {
    inner: Rc<StartFn>,
}

impl StartResponse {
    pub fn new(
        f: impl Fn(&str, HeaderMap, Option<anyhow::Error>) -> BridgeResult<Writer> + 'static,
    ) -> Self {
        Self { inner: Rc::new(f) }
    }

    /// A handle that records into `commit`.
    pub fn for_commit(commit: Rc<RefCell<ResponseCommit>>) -> Self {
        Self::new(move |status, headers, retry| {
            commit
                .borrow_mut()
                .set_status_and_headers(status, &headers, retry)?;
            Ok(Writer::for_commit(commit.clone()))
        })
    }

    pub fn start(&self, status: &str, headers: HeaderMap) -> BridgeResult<Writer> {
        self.call(status, headers, None)
    }

    /// Replace the head after a failure; see
    /// [`ResponseCommit::set_status_and_headers`].
    pub fn restart(
        &self,
        status: &str,
        headers: HeaderMap,
        error: anyhow::Error,
    ) -> BridgeResult<Writer> {
        self.call(status, headers, Some(error))
    }

    pub fn call(
        &self,
        status: &str,
        headers: HeaderMap,
        retry: Option<anyhow::Error>,
    ) -> BridgeResult<Writer> {
        (self.inner)(status, headers, retry)
    }
}

impl fmt::Debug for StartResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StartResponse")
    }
}

/// Legacy imperative write handle returned by `start_response`.
#[derive(Clone)]
pub struct Writer {
    inner: Rc<WriteFn>,
}

impl Writer {
    pub fn new(f: impl Fn(&[u8]) -> BridgeResult<()> + 'static) -> Self {
        Self { inner: Rc::new(f) }
    }

    pub fn for_commit(commit: Rc<RefCell<ResponseCommit>>) -> Self {
        Self::new(move |data| commit.borrow_mut().write(data))
    }

    pub fn write(&self, data: &[u8]) -> BridgeResult<()> {
        (self.inner)(data)
    }
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Writer")
    }
}
