//! The synthetic tail application and its chain-driven body.

use std::cell::RefCell;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Wake, Waker};

use anyhow::anyhow;
use bytes::Bytes;
use futures_core::Stream;
use futures_core::future::LocalBoxFuture;
use tracing::{debug, trace, warn};

use super::capture::{FilterChain, PushResponse, SpliceCore};
use super::{ChainProgress, SpliceState};
use crate::application::Application;
use crate::body::Body;
use crate::commit::StartResponse;
use crate::environ::Environ;
use crate::error::BridgeError;
use crate::host::HostRequest;
use crate::request_view::RequestView;

/// Downstream application seen by the wrapper. Calling it primes the splice;
/// the chain itself starts on the first pull of the returned body.
pub(crate) struct TailApp {
    core: Rc<SpliceCore>,
    host: Rc<dyn HostRequest>,
    chain: RefCell<Option<Box<dyn FilterChain>>>,
}

impl TailApp {
    pub fn new(
        core: Rc<SpliceCore>,
        host: Rc<dyn HostRequest>,
        chain: Box<dyn FilterChain>,
    ) -> Self {
        Self {
            core,
            host,
            chain: RefCell::new(Some(chain)),
        }
    }
}

impl Application for TailApp {
    fn call(&self, environ: Environ, start_response: StartResponse) -> anyhow::Result<Body> {
        let chain = self
            .chain
            .borrow_mut()
            .take()
            .ok_or_else(|| anyhow!("downstream chain already started for this request"))?;
        self.core.transition(SpliceState::Primed);
        let request: Rc<dyn HostRequest> = Rc::new(RequestView::new(self.host.clone(), environ));
        Ok(Body::from_stream(TailBody {
            core: self.core.clone(),
            pending: Some((chain, request)),
            running: None,
            wake: None,
            waiting: false,
            start_response,
            announced: false,
        }))
    }
}

/// Waker handed to the chain: forwards to the task and records the wake-up.
struct ChainWake {
    woken: AtomicBool,
    task: Waker,
}

impl Wake for ChainWake {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.woken.store(true, Ordering::Release);
        self.task.wake_by_ref();
    }
}

struct TailBody {
    core: Rc<SpliceCore>,
    pending: Option<(Box<dyn FilterChain>, Rc<dyn HostRequest>)>,
    running: Option<LocalBoxFuture<'static, anyhow::Result<()>>>,
    /// Waker of the last chain poll.
    wake: Option<Arc<ChainWake>>,
    /// The chain is suspended on something other than the hand-off.
    waiting: bool,
    start_response: StartResponse,
    announced: bool,
}

impl TailBody {
    fn start_chain(&mut self) {
        if let Some((chain, request)) = self.pending.take() {
            debug!("starting downstream chain");
            self.running = Some(chain.start(request, PushResponse::new(self.core.clone())));
        }
        self.core.transition(SpliceState::Streaming);
    }

    fn poll_chain(&mut self, cx: &mut Context<'_>) -> Poll<anyhow::Result<()>> {
        let Some(chain) = self.running.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let wake = Arc::new(ChainWake {
            woken: AtomicBool::new(false),
            task: cx.waker().clone(),
        });
        let waker = Waker::from(wake.clone());
        let poll = chain.as_mut().poll(&mut Context::from_waker(&waker));
        self.wake = Some(wake);
        poll
    }

    /// Pulled again while the chain waits and nothing has woken it: the chain
    /// made no progress since the previous pull.
    fn is_stalled(&self) -> bool {
        self.waiting
            && !self
                .wake
                .as_ref()
                .is_some_and(|wake| wake.woken.load(Ordering::Acquire))
    }

    /// Poll the chain once and classify what happened.
    fn observe(&mut self, cx: &mut Context<'_>) -> Result<ChainProgress, anyhow::Error> {
        let marker = self.core.captured();
        match self.poll_chain(cx) {
            Poll::Ready(Ok(())) => Ok(ChainProgress::Finished),
            Poll::Ready(Err(err)) => Err(err),
            Poll::Pending if self.core.captured() != marker => Ok(ChainProgress::Progressing),
            Poll::Pending => Ok(ChainProgress::Stalled),
        }
    }

    fn finish_chain(&mut self) {
        self.running = None;
        self.core.close();
        self.core.freeze_head();
        debug!("downstream chain finished");
        self.core.transition(SpliceState::Draining);
    }

    fn fail_chain(&mut self, err: anyhow::Error) -> anyhow::Error {
        self.running = None;
        self.core.close();
        self.core.fail(err.to_string());
        self.core.transition(SpliceState::Done);
        debug!(error = %err, "downstream chain failed");
        err
    }

    /// Report the captured head to the wrapper once, before the first chunk
    /// or the end of the body.
    fn announce(&mut self) -> anyhow::Result<()> {
        if self.announced {
            return Ok(());
        }
        self.announced = true;
        let (status, headers) = self.core.freeze_head();
        trace!(%status, headers = headers.len(), "reporting downstream head");
        self.start_response.start(&status, headers)?;
        Ok(())
    }

    fn hand_over(&mut self, chunk: Bytes) -> Poll<Option<anyhow::Result<Bytes>>> {
        match self.announce() {
            Ok(()) => Poll::Ready(Some(Ok(chunk))),
            Err(err) => {
                self.core.transition(SpliceState::Done);
                Poll::Ready(Some(Err(err)))
            }
        }
    }
}

impl Stream for TailBody {
    type Item = anyhow::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.core.state() {
                SpliceState::Primed => this.start_chain(),
                SpliceState::Streaming => {
                    if let Some(chunk) = this.core.pop() {
                        return this.hand_over(chunk);
                    }
                    if this.is_stalled() {
                        warn!("chain made no progress since the last pull; forcing completion");
                        this.waiting = false;
                        this.core.update_report(|r| r.stalled = true);
                        this.core.transition(SpliceState::Stalled);
                        continue;
                    }
                    this.core.transition(SpliceState::DownstreamRunning);
                    let progress = match this.observe(cx) {
                        Ok(progress) => progress,
                        Err(err) => return Poll::Ready(Some(Err(this.fail_chain(err)))),
                    };
                    trace!(?progress, "downstream chain polled");
                    this.waiting = progress == ChainProgress::Stalled;
                    match progress {
                        ChainProgress::Progressing => this.core.transition(SpliceState::Streaming),
                        ChainProgress::Finished => this.finish_chain(),
                        ChainProgress::Stalled => {
                            // The chain's own waker resumes this pull.
                            this.core.update_report(|r| r.chain_waits += 1);
                            this.core.transition(SpliceState::Streaming);
                            return Poll::Pending;
                        }
                    }
                }
                SpliceState::Stalled => match this.observe(cx) {
                    Ok(ChainProgress::Progressing) => continue,
                    Ok(ChainProgress::Finished) => this.finish_chain(),
                    Ok(ChainProgress::Stalled) => return Poll::Pending,
                    Err(err) => return Poll::Ready(Some(Err(this.fail_chain(err)))),
                },
                SpliceState::Draining => {
                    if let Some(chunk) = this.core.pop() {
                        this.core.update_report(|r| r.replayed_chunks += 1);
                        return this.hand_over(chunk);
                    }
                    let announced = this.announce();
                    this.core.transition(SpliceState::Done);
                    return match announced {
                        Ok(()) => Poll::Ready(None),
                        Err(err) => Poll::Ready(Some(Err(err))),
                    };
                }
                SpliceState::Done => return Poll::Ready(None),
                state @ (SpliceState::Init | SpliceState::DownstreamRunning) => {
                    this.core.transition(SpliceState::Done);
                    let err = BridgeError::StallDeadlock(state.as_str());
                    return Poll::Ready(Some(Err(err.into())));
                }
            }
        }
    }
}

impl Drop for TailBody {
    fn drop(&mut self) {
        if self.running.take().is_some() {
            debug!("cancelling unfinished downstream chain");
            self.core.update_report(|r| r.chain_cancelled = true);
            self.core.close();
            self.core.transition(SpliceState::Done);
        }
    }
}
