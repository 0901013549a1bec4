//! Drives one pull-style application to completion.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::error;

use crate::application::Application;
use crate::body::Body;
use crate::commit::{ResponseCommit, StartResponse};
use crate::environ::Environ;
use crate::error::{BridgeError, BridgeResult};

/// Runs an application against a shared [`ResponseCommit`].
pub struct HandlerInvoker {
    commit: Rc<RefCell<ResponseCommit>>,
}

impl HandlerInvoker {
    pub fn new(commit: Rc<RefCell<ResponseCommit>>) -> Self {
        Self { commit }
    }

    /// Call `application`, stream its body into the response and release the
    /// body on every exit path.
    pub async fn run(&self, application: &dyn Application, environ: Environ) -> BridgeResult<()> {
        let start_response = StartResponse::for_commit(self.commit.clone());
        let mut body = application
            .call(environ, start_response)
            .map_err(BridgeError::from_app)?;

        let outcome = self.pump(&mut body).await;
        body.close();

        if let Err(err) = &outcome {
            if self.commit.borrow().is_committed() {
                error!(error = %err, "application failed after the response was committed");
            }
        }
        outcome
    }

    async fn pump(&self, body: &mut Body) -> BridgeResult<()> {
        while let Some(chunk) = body.next_chunk().await {
            let chunk = chunk.map_err(BridgeError::from_app)?;
            if !chunk.is_empty() {
                self.commit.borrow_mut().write(&chunk)?;
            }
        }
        let mut commit = self.commit.borrow_mut();
        if !commit.is_committed() {
            commit.write(&[])?;
        }
        Ok(())
    }
}
