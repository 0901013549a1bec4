//! The capturing response handed to the downstream chain.
//!
//! Every chunk the chain writes lands in a queue shared with the tail body.
//! An asynchronous write suspends the chain once so the wrapper can pull the
//! chunk; a synchronous [`std::io::Write`] cannot suspend, so its chunks pile
//! up and are replayed after the chain finishes.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::future::LocalBoxFuture;
use hearth_core::HeaderMap;
use tracing::{trace, warn};

use super::{SpliceReport, SpliceState};
use crate::error::ProtocolError;
use crate::host::HostRequest;

/// Status and headers captured from the chain.
#[derive(Debug, Clone)]
pub(crate) struct CapturedHead {
    pub status: String,
    pub headers: HeaderMap,
    frozen: bool,
}

impl Default for CapturedHead {
    fn default() -> Self {
        Self {
            status: "200 OK".to_string(),
            headers: HeaderMap::new(),
            frozen: false,
        }
    }
}

/// State shared by the splice, the tail body and the capturing response.
#[derive(Default)]
pub(crate) struct SpliceCore {
    state: Cell<SpliceState>,
    queue: RefCell<VecDeque<Bytes>>,
    /// Progress marker: total chunks captured so far.
    captured: Cell<usize>,
    closed: Cell<bool>,
    head: RefCell<CapturedHead>,
    failure: RefCell<Option<String>>,
    report: RefCell<SpliceReport>,
}

impl SpliceCore {
    pub fn state(&self) -> SpliceState {
        self.state.get()
    }

    pub fn transition(&self, next: SpliceState) {
        let prev = self.state.replace(next);
        if prev != next {
            trace!(from = prev.as_str(), to = next.as_str(), "splice transition");
        }
    }

    pub fn captured(&self) -> usize {
        self.captured.get()
    }

    pub fn capture(&self, chunk: Bytes) {
        self.freeze_head();
        let depth = {
            let mut queue = self.queue.borrow_mut();
            queue.push_back(chunk);
            queue.len()
        };
        self.captured.set(self.captured.get() + 1);
        let mut report = self.report.borrow_mut();
        report.chunks_captured += 1;
        report.peak_buffered = report.peak_buffered.max(depth);
    }

    pub fn pop(&self) -> Option<Bytes> {
        self.queue.borrow_mut().pop_front()
    }

    pub fn drain(&self) -> Vec<Bytes> {
        self.queue.borrow_mut().drain(..).collect()
    }

    pub fn close(&self) {
        self.closed.set(true);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Freeze the captured head and return it.
    pub fn freeze_head(&self) -> (String, HeaderMap) {
        let mut head = self.head.borrow_mut();
        head.frozen = true;
        (head.status.clone(), head.headers.clone())
    }

    pub fn fail(&self, message: String) {
        self.failure.borrow_mut().get_or_insert(message);
    }

    pub fn failure(&self) -> Option<String> {
        self.failure.borrow().clone()
    }

    pub fn update_report(&self, f: impl FnOnce(&mut SpliceReport)) {
        f(&mut self.report.borrow_mut());
    }

    pub fn report(&self) -> SpliceReport {
        self.report.borrow().clone()
    }

    fn update_head(&self, change: &str, f: impl FnOnce(&mut CapturedHead)) {
        let mut head = self.head.borrow_mut();
        if head.frozen {
            warn!(change, "downstream chain changed the head after its first write; ignored");
            return;
        }
        f(&mut head);
    }
}

/// The response object the downstream chain writes into.
///
/// Clones share the same sink.
#[derive(Clone)]
pub struct PushResponse {
    core: Rc<SpliceCore>,
}

impl PushResponse {
    pub(crate) fn new(core: Rc<SpliceCore>) -> Self {
        Self { core }
    }

    /// Set the status reported to the wrapper. Ignored after the first write.
    pub fn set_status(&self, code: u16, reason: &str) {
        self.core.update_head("status", |head| {
            head.status = format!("{code} {reason}");
        });
    }

    /// Add a header reported to the wrapper. Ignored after the first write.
    pub fn add_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let (name, value) = (name.into(), value.into());
        self.core.update_head("header", |head| {
            head.headers.insert(name, value);
        });
    }

    /// Capture `data` and hand it to the wrapper before continuing.
    pub fn write(&self, data: impl Into<Bytes>) -> CapturedWrite {
        CapturedWrite {
            core: self.core.clone(),
            chunk: Some(data.into()),
        }
    }

    pub fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    /// Close the output; later writes fail.
    pub fn close(&self) {
        self.core.close();
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl io::Write for PushResponse {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.core.is_closed() {
            return Err(io::Error::other(ProtocolError::OutputClosed));
        }
        if !buf.is_empty() {
            self.core.capture(Bytes::copy_from_slice(buf));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for PushResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushResponse")
            .field("closed", &self.core.is_closed())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`PushResponse::write`].
///
/// The first poll captures the chunk, wakes the task and yields; the second
/// completes. The yield is what lets the wrapper consume each chunk before
/// the chain produces the next one.
#[must_use = "captured writes do nothing unless awaited"]
pub struct CapturedWrite {
    core: Rc<SpliceCore>,
    chunk: Option<Bytes>,
}

impl Future for CapturedWrite {
    type Output = Result<(), ProtocolError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(chunk) = this.chunk.take() else {
            return Poll::Ready(Ok(()));
        };
        if this.core.is_closed() {
            return Poll::Ready(Err(ProtocolError::OutputClosed));
        }
        if chunk.is_empty() {
            return Poll::Ready(Ok(()));
        }
        this.core.capture(chunk);
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// A push-style downstream chain.
///
/// It is started at most once per request with the request view and the
/// capturing response, and runs as a future polled by the splice.
pub trait FilterChain {
    fn start(
        self: Box<Self>,
        request: Rc<dyn HostRequest>,
        response: PushResponse,
    ) -> LocalBoxFuture<'static, anyhow::Result<()>>;
}

impl<F, Fut> FilterChain for F
where
    F: FnOnce(Rc<dyn HostRequest>, PushResponse) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + 'static,
{
    fn start(
        self: Box<Self>,
        request: Rc<dyn HostRequest>,
        response: PushResponse,
    ) -> LocalBoxFuture<'static, anyhow::Result<()>> {
        Box::pin((*self)(request, response))
    }
}
