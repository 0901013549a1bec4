//! In-memory host transport.
//!
//! [`MemoryRequest`] is a builder-style request with fixed metadata,
//! [`MemoryResponse`] records everything pushed to it and can be cloned so a
//! test keeps a handle after the bridge consumed the response.

use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use super::{HostLog, HostRequest, HostResponse};
use crate::input::InputStream;

/// A request whose metadata is fixed at construction.
pub struct MemoryRequest {
    method: Option<String>,
    script_name: Option<String>,
    path_info: Option<String>,
    query_string: Option<String>,
    content_type: Option<String>,
    content_length: Option<u64>,
    remote_addr: Option<String>,
    remote_host: Option<String>,
    remote_port: Option<u16>,
    local_name: Option<String>,
    local_port: Option<u16>,
    protocol: Option<String>,
    scheme: Option<String>,
    headers: Vec<(String, String)>,
    input: InputStream,
    accessor_calls: Cell<usize>,
}

impl Default for MemoryRequest {
    fn default() -> Self {
        Self {
            method: Some("GET".to_string()),
            script_name: Some("/foobar".to_string()),
            path_info: Some("baz&blah".to_string()),
            query_string: Some("q=foo".to_string()),
            content_type: Some("text/html".to_string()),
            content_length: None,
            remote_addr: Some("127.0.0.1".to_string()),
            remote_host: Some("client.example.com".to_string()),
            remote_port: Some(9876),
            local_name: Some("service.example.com".to_string()),
            local_port: Some(80),
            protocol: Some("HTTP/1.1".to_string()),
            scheme: Some("http".to_string()),
            headers: Vec::new(),
            input: InputStream::empty(),
            accessor_calls: Cell::new(0),
        }
    }
}

macro_rules! builder {
    ($($fn_name:ident => $field:ident: $ty:ty),* $(,)?) => {
        $(
            pub fn $fn_name(self, value: Option<$ty>) -> Self {
                Self { $field: value, ..self }
            }
        )*
    };
}

impl MemoryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    builder! {
        with_method => method: String,
        with_script_name => script_name: String,
        with_path_info => path_info: String,
        with_query_string => query_string: String,
        with_content_type => content_type: String,
        with_content_length => content_length: u64,
        with_remote_addr => remote_addr: String,
        with_remote_host => remote_host: String,
        with_remote_port => remote_port: u16,
        with_local_name => local_name: String,
        with_local_port => local_port: u16,
        with_protocol => protocol: String,
        with_scheme => scheme: String,
    }

    /// Append one header value; repeated names keep every value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body and report its length.
    pub fn with_body(self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            content_length: Some(body.len() as u64),
            input: InputStream::from_bytes(body),
            ..self
        }
    }

    pub fn into_host(self) -> Rc<dyn HostRequest> {
        Rc::new(self)
    }

    /// How many field accessors the bridge has called.
    pub fn accessor_calls(&self) -> usize {
        self.accessor_calls.get()
    }

    fn touch<T: Clone>(&self, value: &T) -> T {
        self.accessor_calls.set(self.accessor_calls.get() + 1);
        value.clone()
    }
}

impl HostRequest for MemoryRequest {
    fn method(&self) -> Option<String> {
        self.touch(&self.method)
    }

    fn script_name(&self) -> Option<String> {
        self.touch(&self.script_name)
    }

    fn path_info(&self) -> Option<String> {
        self.touch(&self.path_info)
    }

    fn query_string(&self) -> Option<String> {
        self.touch(&self.query_string)
    }

    fn content_type(&self) -> Option<String> {
        self.touch(&self.content_type)
    }

    fn content_length(&self) -> Option<u64> {
        self.touch(&self.content_length)
    }

    fn remote_addr(&self) -> Option<String> {
        self.touch(&self.remote_addr)
    }

    fn remote_host(&self) -> Option<String> {
        self.touch(&self.remote_host)
    }

    fn remote_port(&self) -> Option<u16> {
        self.touch(&self.remote_port)
    }

    fn local_name(&self) -> Option<String> {
        self.touch(&self.local_name)
    }

    fn local_port(&self) -> Option<u16> {
        self.touch(&self.local_port)
    }

    fn protocol(&self) -> Option<String> {
        self.touch(&self.protocol)
    }

    fn scheme(&self) -> Option<String> {
        self.touch(&self.scheme)
    }

    fn header_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (name, _) in &self.headers {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name.clone());
            }
        }
        names
    }

    fn header_values(&self, name: &str) -> Vec<String> {
        self.accessor_calls.set(self.accessor_calls.get() + 1);
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn input(&self) -> InputStream {
        self.input.clone()
    }
}

/// One call made against a [`MemoryResponse`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    Status(u16, String),
    Header(String, Vec<u8>),
    Write(Bytes),
    Flush,
}

#[derive(Debug, Default)]
struct Recorded {
    events: Vec<ResponseEvent>,
    read_cursor: usize,
}

/// A response that records every status, header and body write.
#[derive(Debug, Clone, Default)]
pub struct MemoryResponse {
    recorded: Rc<RefCell<Recorded>>,
}

impl MemoryResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ResponseEvent> {
        self.recorded.borrow().events.clone()
    }

    /// The last status set, if any.
    pub fn status(&self) -> Option<(u16, String)> {
        self.recorded
            .borrow()
            .events
            .iter()
            .rev()
            .find_map(|e| match e {
                ResponseEvent::Status(code, reason) => Some((*code, reason.clone())),
                _ => None,
            })
    }

    pub fn status_calls(&self) -> usize {
        self.recorded
            .borrow()
            .events
            .iter()
            .filter(|e| matches!(e, ResponseEvent::Status(..)))
            .count()
    }

    /// Headers decoded from latin-1, in the order they were added.
    pub fn headers(&self) -> Vec<(String, String)> {
        self.recorded
            .borrow()
            .events
            .iter()
            .filter_map(|e| match e {
                ResponseEvent::Header(name, value) => {
                    Some((name.clone(), value.iter().map(|&b| char::from(b)).collect()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers()
            .into_iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Every body write, one entry per `write` call.
    pub fn chunks(&self) -> Vec<Bytes> {
        self.recorded
            .borrow()
            .events
            .iter()
            .filter_map(|e| match e {
                ResponseEvent::Write(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn body(&self) -> Bytes {
        let mut body = Vec::new();
        for chunk in self.chunks() {
            body.extend_from_slice(&chunk);
        }
        Bytes::from(body)
    }

    /// Next unread body write; `None` once the output is exhausted.
    pub fn next_chunk(&self) -> Option<Bytes> {
        let chunks = self.chunks();
        let mut recorded = self.recorded.borrow_mut();
        let chunk = chunks.get(recorded.read_cursor).cloned();
        if chunk.is_some() {
            recorded.read_cursor += 1;
        }
        chunk
    }

    pub fn into_host(self) -> Box<dyn HostResponse> {
        Box::new(self)
    }
}

impl HostResponse for MemoryResponse {
    fn set_status(&mut self, code: u16, reason: &str) {
        self.recorded
            .borrow_mut()
            .events
            .push(ResponseEvent::Status(code, reason.to_string()));
    }

    fn add_header(&mut self, name: &str, value: &[u8]) {
        self.recorded
            .borrow_mut()
            .events
            .push(ResponseEvent::Header(name.to_string(), value.to_vec()));
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.recorded
            .borrow_mut()
            .events
            .push(ResponseEvent::Write(Bytes::copy_from_slice(data)));
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.recorded.borrow_mut().events.push(ResponseEvent::Flush);
        Ok(())
    }
}

/// A host log that keeps every message.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    messages: Arc<Mutex<Vec<String>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl HostLog for MemoryLog {
    fn log(&self, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults() {
        let req = MemoryRequest::new();
        assert_eq!(req.method().as_deref(), Some("GET"));
        assert_eq!(req.content_length(), None);
        assert_eq!(req.accessor_calls(), 2);
    }

    #[test]
    fn request_header_names_are_unique() {
        let req = MemoryRequest::new()
            .with_header("Accept", "a")
            .with_header("accept", "b")
            .with_header("Host", "example.com");
        assert_eq!(req.header_names(), vec!["Accept", "Host"]);
        assert_eq!(req.header_values("ACCEPT"), vec!["a", "b"]);
    }

    #[test]
    fn with_body_sets_content_length() {
        let req = MemoryRequest::new().with_body("hello");
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(req.input().read_all().unwrap().as_ref(), b"hello");
    }

    #[test]
    fn response_records_in_order() {
        let resp = MemoryResponse::new();
        let mut host = resp.clone().into_host();
        host.set_status(200, "OK");
        host.add_header("Content-Type", b"text/plain");
        host.write(b"Hello").unwrap();
        host.flush().unwrap();

        assert_eq!(resp.status(), Some((200, "OK".to_string())));
        assert_eq!(resp.header("content-type").as_deref(), Some("text/plain"));
        assert_eq!(resp.next_chunk(), Some(Bytes::from("Hello")));
        assert_eq!(resp.next_chunk(), None);
        assert_eq!(resp.events().last(), Some(&ResponseEvent::Flush));
    }

    #[test]
    fn response_headers_decode_latin1() {
        let resp = MemoryResponse::new();
        let mut host = resp.clone().into_host();
        host.add_header("X-Name", &[b'c', b'a', b'f', 0xE9]);
        assert_eq!(resp.header("x-name").as_deref(), Some("caf\u{e9}"));
    }

    #[test]
    fn log_keeps_messages() {
        let log = MemoryLog::new();
        log.log("first");
        log.log("second");
        assert_eq!(log.messages(), vec!["first", "second"]);
    }
}
