//! The per-request attribute view handed to pull-style applications.
//!
//! An [`Environ`] presents a live host request as a mutable string-keyed
//! mapping. Host fields are read lazily and memoized; writes and deletes
//! only touch the view, never the host request.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use hearth_core::HearthConfig;

use crate::host::HostRequest;
use crate::input::InputStream;
use crate::log_sink::ErrorSink;

/// Well-known keys of the attribute view.
pub mod keys {
    pub const VERSION: &str = "hearth.version";
    pub const MULTITHREAD: &str = "hearth.multithread";
    pub const MULTIPROCESS: &str = "hearth.multiprocess";
    pub const RUN_ONCE: &str = "hearth.run_once";
    pub const URL_SCHEME: &str = "hearth.url_scheme";
    pub const INPUT: &str = "hearth.input";
    pub const ERRORS: &str = "hearth.errors";

    pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
    pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
    pub const PATH_INFO: &str = "PATH_INFO";
    pub const QUERY_STRING: &str = "QUERY_STRING";
    pub const CONTENT_TYPE: &str = "CONTENT_TYPE";
    pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";
    pub const REMOTE_ADDR: &str = "REMOTE_ADDR";
    pub const REMOTE_HOST: &str = "REMOTE_HOST";
    pub const REMOTE_PORT: &str = "REMOTE_PORT";
    pub const SERVER_NAME: &str = "SERVER_NAME";
    pub const SERVER_PORT: &str = "SERVER_PORT";
    pub const SERVER_PROTOCOL: &str = "SERVER_PROTOCOL";

    pub const HEADER_PREFIX: &str = "HTTP_";

    /// Keys every view carries, in listing order.
    pub(crate) const FIXED: [&str; 18] = [
        VERSION,
        MULTITHREAD,
        MULTIPROCESS,
        RUN_ONCE,
        ERRORS,
        INPUT,
        URL_SCHEME,
        REQUEST_METHOD,
        SCRIPT_NAME,
        PATH_INFO,
        QUERY_STRING,
        CONTENT_TYPE,
        REMOTE_ADDR,
        REMOTE_HOST,
        REMOTE_PORT,
        SERVER_NAME,
        SERVER_PORT,
        SERVER_PROTOCOL,
    ];
}

/// The view key for a raw header name: `X-Forwarded-For` becomes
/// `HTTP_X_FORWARDED_FOR`.
pub fn header_key(name: &str) -> String {
    let mut key = String::with_capacity(keys::HEADER_PREFIX.len() + name.len());
    key.push_str(keys::HEADER_PREFIX);
    key.extend(
        name.chars()
            .map(|c| if c == '-' { '_' } else { c.to_ascii_uppercase() }),
    );
    key
}

/// The raw header name for a view key: `HTTP_X_FORWARDED_FOR` becomes
/// `X-Forwarded-For`. `None` for keys outside the header namespace.
pub fn header_name(key: &str) -> Option<String> {
    let rest = key.strip_prefix(keys::HEADER_PREFIX)?;
    if rest.is_empty() {
        return None;
    }
    let segments: Vec<String> = rest
        .split('_')
        .map(|segment| {
            segment
                .chars()
                .enumerate()
                .map(|(i, c)| if i == 0 { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() })
                .collect()
        })
        .collect();
    Some(segments.join("-"))
}

/// A value stored in the attribute view.
#[derive(Clone)]
pub enum Value {
    Str(String),
    Bool(bool),
    Version(u32, u32),
    Input(InputStream),
    Errors(ErrorSink),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_input(&self) -> Option<&InputStream> {
        match self {
            Value::Input(input) => Some(input),
            _ => None,
        }
    }

    pub fn as_errors(&self) -> Option<&ErrorSink> {
        match self {
            Value::Errors(sink) => Some(sink),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Version(major, minor) => write!(f, "({major}, {minor})"),
            Value::Input(_) => f.write_str("<input>"),
            Value::Errors(_) => f.write_str("<errors>"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Process-wide constants shared by every view.
#[derive(Debug, Clone)]
pub struct BaseEnviron {
    pub multithread: bool,
    pub multiprocess: bool,
    pub run_once: bool,
    pub errors: ErrorSink,
}

impl BaseEnviron {
    pub fn new(errors: ErrorSink) -> Self {
        Self {
            multithread: true,
            multiprocess: false,
            run_once: false,
            errors,
        }
    }

    pub fn from_config(config: &HearthConfig, errors: ErrorSink) -> Self {
        Self {
            multithread: config.multithread(),
            multiprocess: config.multiprocess(),
            run_once: config.run_once(),
            errors,
        }
    }
}

impl Default for BaseEnviron {
    fn default() -> Self {
        Self::new(ErrorSink::default())
    }
}

struct Inner {
    request: Rc<dyn HostRequest>,
    base: Arc<BaseEnviron>,
    /// `(view key, raw header name)` for every header the host reported.
    header_keys: Vec<(String, String)>,
    /// Memoized host values and application writes.
    values: HashMap<String, Value>,
    /// Keys written or deleted through the view.
    overridden: HashSet<String>,
    removed: HashSet<String>,
    /// Keys the host never backs, in first-set order.
    added: Vec<String>,
}

/// Clonable handle to one request's attribute view.
///
/// All clones share state. The view is single-threaded; it lives for one
/// request only.
#[derive(Clone)]
pub struct Environ {
    inner: Rc<RefCell<Inner>>,
}

impl Environ {
    pub fn new(request: Rc<dyn HostRequest>, base: Arc<BaseEnviron>) -> Self {
        let header_keys = request
            .header_names()
            .into_iter()
            .map(|name| (header_key(&name), name))
            .collect();
        Self {
            inner: Rc::new(RefCell::new(Inner {
                request,
                base,
                header_keys,
                values: HashMap::new(),
                overridden: HashSet::new(),
                removed: HashSet::new(),
                added: Vec::new(),
            })),
        }
    }

    /// The host request behind this view.
    pub fn request(&self) -> Rc<dyn HostRequest> {
        self.inner.borrow().request.clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.borrow_mut();
        if inner.removed.contains(key) {
            return None;
        }
        if let Some(value) = inner.values.get(key) {
            return Some(value.clone());
        }
        if inner.overridden.contains(key) {
            return None;
        }
        let value = inner.load(key)?;
        inner.values.insert(key.to_string(), value.clone());
        Some(value)
    }

    /// The value of `key` when it is a string.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let mut inner = self.inner.borrow_mut();
        inner.removed.remove(&key);
        if !inner.is_host_backed(&key) && !inner.added.contains(&key) {
            inner.added.push(key.clone());
        }
        inner.overridden.insert(key.clone());
        inner.values.insert(key, value.into());
    }

    /// Suppress `key` in this view and return what it held.
    pub fn delete(&self, key: &str) -> Option<Value> {
        let previous = self.get(key);
        let mut inner = self.inner.borrow_mut();
        inner.values.remove(key);
        inner.overridden.insert(key.to_string());
        inner.removed.insert(key.to_string());
        previous
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Whether `key` was written or deleted through the view.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.inner.borrow().overridden.contains(key)
    }

    /// Present keys: fixed keys, `CONTENT_LENGTH` when known, headers, then
    /// keys added through the view.
    ///
    /// Fixed and header keys are listed unless deleted, without reading the
    /// host. Only `CONTENT_LENGTH` may be absent on the host side.
    pub fn keys(&self) -> Vec<String> {
        let (fixed, headers, added) = {
            let inner = self.inner.borrow();
            let fixed: Vec<String> = keys::FIXED
                .iter()
                .filter(|k| !inner.removed.contains(**k))
                .map(|k| k.to_string())
                .collect();
            let headers: Vec<String> = inner
                .header_keys
                .iter()
                .map(|(k, _)| k.clone())
                .filter(|k| !inner.removed.contains(k))
                .collect();
            (fixed, headers, inner.added.clone())
        };
        let content_length = self
            .contains(keys::CONTENT_LENGTH)
            .then(|| keys::CONTENT_LENGTH.to_string());
        let added = added.into_iter().filter(|k| self.contains(k));

        let mut seen = HashSet::new();
        fixed
            .into_iter()
            .chain(content_length)
            .chain(headers)
            .chain(added)
            .filter(|k| seen.insert(k.clone()))
            .collect()
    }

    /// Present keys the host never backs, in first-set order.
    pub fn added_keys(&self) -> Vec<String> {
        let inner = self.inner.borrow();
        inner
            .added
            .iter()
            .filter(|k| !inner.removed.contains(*k))
            .cloned()
            .collect()
    }

    /// Materialize every present entry.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.keys()
            .into_iter()
            .filter_map(|k| self.get(&k).map(|v| (k, v)))
            .collect()
    }

    pub fn input(&self) -> Option<InputStream> {
        match self.get(keys::INPUT)? {
            Value::Input(input) => Some(input),
            _ => None,
        }
    }

    pub fn errors(&self) -> Option<ErrorSink> {
        match self.get(keys::ERRORS)? {
            Value::Errors(sink) => Some(sink),
            _ => None,
        }
    }

    /// Whether two handles share one view.
    pub fn ptr_eq(&self, other: &Environ) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Inner {
    fn is_host_backed(&self, key: &str) -> bool {
        keys::FIXED.contains(&key)
            || key == keys::CONTENT_LENGTH
            || self.header_keys.iter().any(|(k, _)| k == key)
    }

    fn load(&self, key: &str) -> Option<Value> {
        let req = &self.request;
        let text = |value: Option<String>| Some(Value::Str(value.unwrap_or_default()));
        let port = |value: Option<u16>| text(value.map(|p| p.to_string()));
        match key {
            keys::VERSION => Some(Value::Version(1, 0)),
            keys::MULTITHREAD => Some(Value::Bool(self.base.multithread)),
            keys::MULTIPROCESS => Some(Value::Bool(self.base.multiprocess)),
            keys::RUN_ONCE => Some(Value::Bool(self.base.run_once)),
            keys::ERRORS => Some(Value::Errors(self.base.errors.clone())),
            keys::INPUT => Some(Value::Input(req.input())),
            keys::URL_SCHEME => text(req.scheme()),
            keys::REQUEST_METHOD => text(req.method()),
            keys::SCRIPT_NAME => text(req.script_name()),
            keys::PATH_INFO => text(req.path_info()),
            keys::QUERY_STRING => text(req.query_string()),
            keys::CONTENT_TYPE => text(req.content_type()),
            keys::CONTENT_LENGTH => req.content_length().map(|n| Value::Str(n.to_string())),
            keys::REMOTE_ADDR => text(req.remote_addr()),
            keys::REMOTE_HOST => text(req.remote_host()),
            keys::REMOTE_PORT => port(req.remote_port()),
            keys::SERVER_NAME => text(req.local_name()),
            keys::SERVER_PORT => port(req.local_port()),
            keys::SERVER_PROTOCOL => text(req.protocol()),
            _ => self.load_header(key),
        }
    }

    fn load_header(&self, key: &str) -> Option<Value> {
        let (_, name) = self.header_keys.iter().find(|(k, _)| k == key)?;
        let values = self.request.header_values(name);
        if values.is_empty() {
            return None;
        }
        Some(Value::Str(values.join(",")))
    }
}

impl fmt::Debug for Environ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Environ")
            .field("materialized", &inner.values.len())
            .field("overridden", &inner.overridden)
            .finish_non_exhaustive()
    }
}
