//! Hearth: a bridge between pull-style applications and push-style hosts.
//!
//! A pull-style [`Application`] receives an attribute view ([`Environ`]) and
//! a [`StartResponse`] handle and returns a lazy [`Body`]. A host transport
//! instead pushes: it hands over a live request and a response to write to.
//! This crate bridges the two in both directions.
//!
//! # Entry points
//!
//! [`Endpoint`] serves a request with one registered application through
//! [`HandlerInvoker`]. [`Filter`] sits in a host filter chain and wraps the
//! rest of that chain in a registered [`Middleware`] through a
//! [`StreamSplice`]: the wrapper pulls its downstream body while the chain
//! pushes into a capturing response, and the two alternate chunk by chunk
//! on one task.
//!
//! # Threading
//!
//! Everything per request is single-threaded (`Rc`, `RefCell`) and the
//! futures are not `Send`; drive them on a current-thread runtime or a
//! `LocalSet`. Process-wide state ([`Registry`], [`BaseEnviron`]) is
//! `Send + Sync` and read-only after setup.

pub mod application;
pub mod body;
pub mod commit;
pub mod environ;
pub mod error;
pub mod gateway;
pub mod host;
pub mod input;
pub mod invoker;
pub mod log_sink;
pub mod registry;
pub mod request_view;
pub mod splice;

pub use application::{Application, Middleware};
pub use body::Body;
pub use commit::{ResponseCommit, StartResponse, Status, Writer};
pub use environ::{BaseEnviron, Environ, Value, keys};
pub use error::{BridgeError, BridgeResult, ConfigurationError, ProtocolError};
pub use gateway::{Endpoint, Filter, load_config};
pub use hearth_core::{Header, HeaderMap, HearthConfig};
pub use host::{HostLog, HostRequest, HostResponse};
pub use input::InputStream;
pub use invoker::HandlerInvoker;
pub use log_sink::ErrorSink;
pub use registry::{ApplicationHandle, Registry};
pub use request_view::RequestView;
pub use splice::{FilterChain, PushResponse, SpliceReport, SpliceState, StreamSplice};
