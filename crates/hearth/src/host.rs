//! Host transport seams.
//!
//! The bridge never owns a socket. A host transport hands it a live request
//! ([`HostRequest`]), a live response ([`HostResponse`]) and optionally its
//! own log facility ([`HostLog`]). The [`memory`] submodule provides
//! in-memory implementations for tests and embedders.

pub mod memory;

use std::io;

use crate::environ::Environ;
use crate::input::InputStream;

/// Read access to the metadata of one inbound request.
///
/// `None` means the host has no value for the field. Implementations must
/// be side-effect free; the bridge calls accessors lazily and at most once
/// per key unless the key is overridden.
pub trait HostRequest {
    fn method(&self) -> Option<String>;
    /// Path prefix routed to the bridge.
    fn script_name(&self) -> Option<String>;
    fn path_info(&self) -> Option<String>;
    fn query_string(&self) -> Option<String>;
    fn content_type(&self) -> Option<String>;
    /// `None` when the host does not know the body length.
    fn content_length(&self) -> Option<u64>;
    fn remote_addr(&self) -> Option<String>;
    fn remote_host(&self) -> Option<String>;
    fn remote_port(&self) -> Option<u16>;
    fn local_name(&self) -> Option<String>;
    fn local_port(&self) -> Option<u16>;
    fn protocol(&self) -> Option<String>;
    fn scheme(&self) -> Option<String>;
    /// Raw header names in arrival order.
    fn header_names(&self) -> Vec<String>;
    /// All values of one header, in arrival order.
    fn header_values(&self, name: &str) -> Vec<String>;
    /// The request body source. Clones share the read position.
    fn input(&self) -> InputStream;

    /// A view attached by an upstream bridge, reused instead of building a
    /// second one over the same request.
    fn attached_environ(&self) -> Option<Environ> {
        None
    }
}

/// Write access to the live response of one request.
pub trait HostResponse {
    fn set_status(&mut self, code: u16, reason: &str);
    /// `value` is latin-1 encoded, one byte per character.
    fn add_header(&mut self, name: &str, value: &[u8]);
    fn write(&mut self, data: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

/// The host's own diagnostic log.
pub trait HostLog: Send + Sync {
    fn log(&self, message: &str);
}
