//! Pull-style application and middleware contracts.

use std::rc::Rc;

use crate::body::Body;
use crate::commit::StartResponse;
use crate::environ::Environ;

/// A pull-style application.
///
/// It receives the attribute view and a [`StartResponse`] handle and returns
/// a lazily produced [`Body`]. `start_response` must be called before the
/// first non-empty chunk is yielded.
pub trait Application {
    fn call(&self, environ: Environ, start_response: StartResponse) -> anyhow::Result<Body>;
}

impl<F> Application for F
where
    F: Fn(Environ, StartResponse) -> anyhow::Result<Body>,
{
    fn call(&self, environ: Environ, start_response: StartResponse) -> anyhow::Result<Body> {
        self(environ, start_response)
    }
}

/// Builds a wrapping application around a downstream one, per request.
pub trait Middleware: Send + Sync {
    fn wrap(&self, downstream: Rc<dyn Application>) -> Rc<dyn Application>;
}

impl<F> Middleware for F
where
    F: Fn(Rc<dyn Application>) -> Rc<dyn Application> + Send + Sync,
{
    fn wrap(&self, downstream: Rc<dyn Application>) -> Rc<dyn Application> {
        self(downstream)
    }
}
