//! Host-facing entry points.
//!
//! An [`Endpoint`] serves a request with a registered application. A
//! [`Filter`] sits in a host filter chain: it wraps the rest of the chain in
//! a registered middleware through a [`StreamSplice`].

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use hearth_core::HearthConfig;
use tracing::{debug, error, info};

use crate::application::Middleware;
use crate::commit::ResponseCommit;
use crate::environ::{BaseEnviron, Environ};
use crate::error::{BridgeResult, ConfigurationError};
use crate::host::{HostLog, HostRequest, HostResponse};
use crate::invoker::HandlerInvoker;
use crate::log_sink::ErrorSink;
use crate::registry::{Registry, SharedApplication};
use crate::splice::{FilterChain, SpliceReport, StreamSplice};

/// Build a view for `request`, or reuse the one an upstream bridge attached.
pub fn environ_for(request: &Rc<dyn HostRequest>, base: &Arc<BaseEnviron>) -> Environ {
    match request.attached_environ() {
        Some(environ) => {
            debug!("reusing attribute view attached upstream");
            environ
        }
        None => Environ::new(request.clone(), base.clone()),
    }
}

/// Load `hearth.toml`, mapping failures into the configuration taxonomy.
pub fn load_config(path: &Path) -> Result<HearthConfig, ConfigurationError> {
    HearthConfig::from_file(path).map_err(|err| {
        if err.is::<std::io::Error>() {
            ConfigurationError::Read(format!("{}: {err}", path.display()))
        } else {
            ConfigurationError::Parse(err.to_string())
        }
    })
}

fn base_environ(config: &HearthConfig, log: Option<Arc<dyn HostLog>>) -> Arc<BaseEnviron> {
    Arc::new(BaseEnviron::from_config(config, ErrorSink::new(log)))
}

/// Send a plain 500 when a request failed before anything reached the host.
fn finish<T>(commit: &Rc<RefCell<ResponseCommit>>, outcome: BridgeResult<T>) -> BridgeResult<T> {
    if let Err(err) = &outcome {
        let mut commit = commit.borrow_mut();
        if !commit.is_committed() {
            error!(error = %err, "request failed before commit; sending 500");
            if let Err(send_err) = commit.send_server_error() {
                error!(error = %send_err, "failed to send 500 response");
            }
        }
    }
    outcome
}

/// Serves requests with one registered application.
pub struct Endpoint {
    name: String,
    app: SharedApplication,
    base: Arc<BaseEnviron>,
}

impl Endpoint {
    pub fn init(
        config: &HearthConfig,
        registry: &Registry,
        log: Option<Arc<dyn HostLog>>,
    ) -> Result<Self, ConfigurationError> {
        let name = config.handler.name.clone();
        let app = registry.resolve(&name)?.into_endpoint(&name)?;
        info!(handler = %name, "endpoint initialized");
        Ok(Self {
            name,
            app,
            base: base_environ(config, log),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn service(
        &self,
        request: Rc<dyn HostRequest>,
        response: Box<dyn HostResponse>,
    ) -> BridgeResult<()> {
        let environ = environ_for(&request, &self.base);
        let commit = ResponseCommit::shared(response);
        let outcome = HandlerInvoker::new(commit.clone())
            .run(self.app.as_ref(), environ)
            .await;
        finish(&commit, outcome)
    }
}

/// Wraps the rest of a host filter chain in one registered middleware.
pub struct Filter {
    name: String,
    middleware: Arc<dyn Middleware>,
    base: Arc<BaseEnviron>,
}

impl Filter {
    pub fn init(
        config: &HearthConfig,
        registry: &Registry,
        log: Option<Arc<dyn HostLog>>,
    ) -> Result<Self, ConfigurationError> {
        let name = config.handler.name.clone();
        let middleware = registry.resolve(&name)?.into_middleware(&name)?;
        info!(handler = %name, "filter initialized");
        Ok(Self {
            name,
            middleware,
            base: base_environ(config, log),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn do_filter(
        &self,
        request: Rc<dyn HostRequest>,
        response: Box<dyn HostResponse>,
        chain: impl FilterChain + 'static,
    ) -> BridgeResult<SpliceReport> {
        let environ = environ_for(&request, &self.base);
        let commit = ResponseCommit::shared(response);
        let outcome = StreamSplice::new(commit.clone())
            .run(self.middleware.as_ref(), environ, request, chain)
            .await;
        finish(&commit, outcome)
    }
}
