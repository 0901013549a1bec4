//! Stream splice between a pull-style wrapper and a push-style chain.
//!
//! The wrapper application is invoked with a synthetic tail application as
//! its downstream. The tail's body is fed by the real downstream chain, which
//! runs as a future polled from inside the body's `poll_next`: each pull by
//! the wrapper resumes the chain until it captures a chunk, finishes, or
//! suspends without producing anything. A chain suspended on some other
//! future leaves the pull pending until the chain's waker fires. Everything
//! runs on the calling task; nothing is spawned.
//!
//! ```text
//! INIT --tail called--> PRIMED --first pull--> STREAMING
//! STREAMING --queue empty--> DOWNSTREAM_RUNNING
//!     Progressing --> STREAMING
//!     Finished    --> DRAINING
//!     Stalled     --> STREAMING (pull pending until the chain wakes)
//! STREAMING --pulled again, chain not woken--> STALLED --chain done--> DRAINING
//! DRAINING --queue empty--> DONE
//! ```

pub mod capture;
mod tail;

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::application::{Application, Middleware};
use crate::commit::ResponseCommit;
use crate::environ::Environ;
use crate::error::{BridgeError, BridgeResult};
use crate::host::HostRequest;
use crate::invoker::HandlerInvoker;

pub use capture::{CapturedWrite, FilterChain, PushResponse};
use capture::SpliceCore;
use tail::TailApp;

/// Lifecycle of one splice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpliceState {
    #[default]
    Init,
    Primed,
    Streaming,
    Stalled,
    DownstreamRunning,
    Draining,
    Done,
}

impl SpliceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpliceState::Init => "INIT",
            SpliceState::Primed => "PRIMED",
            SpliceState::Streaming => "STREAMING",
            SpliceState::Stalled => "STALLED",
            SpliceState::DownstreamRunning => "DOWNSTREAM_RUNNING",
            SpliceState::Draining => "DRAINING",
            SpliceState::Done => "DONE",
        }
    }
}

/// What one poll of the chain achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainProgress {
    /// A chunk was captured since the poll started.
    Progressing,
    /// Suspended on something other than the hand-off, nothing captured.
    Stalled,
    Finished,
}

/// Per-request splice statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpliceReport {
    pub chunks_captured: usize,
    /// Largest number of captured chunks waiting for the wrapper at once.
    pub peak_buffered: usize,
    /// The wrapper pulled while the chain had neither progressed nor been
    /// woken; the chain was then run to completion.
    pub stalled: bool,
    /// Times the chain suspended on something other than the hand-off.
    pub chain_waits: usize,
    /// Chunks handed to the wrapper after the chain had finished.
    pub replayed_chunks: usize,
    /// Chunks the wrapper never pulled, written by the final pass.
    pub appended_chunks: usize,
    pub chain_cancelled: bool,
}

/// Runs a wrapper application over a downstream chain for one request.
pub struct StreamSplice {
    commit: Rc<RefCell<ResponseCommit>>,
}

impl StreamSplice {
    pub fn new(commit: Rc<RefCell<ResponseCommit>>) -> Self {
        Self { commit }
    }

    pub async fn run(
        &self,
        middleware: &dyn Middleware,
        environ: Environ,
        request: Rc<dyn HostRequest>,
        chain: impl FilterChain + 'static,
    ) -> BridgeResult<SpliceReport> {
        let core = Rc::new(SpliceCore::default());
        let tail: Rc<dyn Application> =
            Rc::new(TailApp::new(core.clone(), request, Box::new(chain)));
        let wrapper = middleware.wrap(tail);

        let outcome = HandlerInvoker::new(self.commit.clone())
            .run(wrapper.as_ref(), environ)
            .await;
        // Releases the tail and with it any chain that is still pending.
        drop(wrapper);

        let outcome = outcome.and_then(|()| self.append_leftovers(&core));
        core.transition(SpliceState::Done);

        if let (Ok(()), Some(failure)) = (&outcome, core.failure()) {
            warn!(error = %failure, "downstream chain failure was swallowed by the wrapper");
            return Err(BridgeError::Downstream(failure));
        }
        outcome?;

        let report = core.report();
        debug!(?report, "splice finished");
        Ok(report)
    }

    /// Write chunks the wrapper never pulled.
    fn append_leftovers(&self, core: &SpliceCore) -> BridgeResult<()> {
        let leftovers = core.drain();
        if leftovers.is_empty() {
            return Ok(());
        }
        debug!(chunks = leftovers.len(), "appending chunks left in the sink");
        let mut commit = self.commit.borrow_mut();
        for chunk in &leftovers {
            commit.write(chunk)?;
        }
        core.update_report(|r| r.appended_chunks += leftovers.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!(SpliceState::default(), SpliceState::Init);
        assert_eq!(SpliceState::DownstreamRunning.as_str(), "DOWNSTREAM_RUNNING");
        assert_eq!(SpliceState::Done.as_str(), "DONE");
    }
}
