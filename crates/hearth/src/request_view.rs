//! The request as seen by a downstream chain.

use std::rc::Rc;
use std::str::FromStr;

use crate::environ::{Environ, Value, header_key, header_name, keys};
use crate::host::HostRequest;
use crate::input::InputStream;

/// A host request filtered through an attribute view.
///
/// Fields whose key was written or deleted through the view answer from the
/// view (`None` when deleted); all others come straight from the host.
pub struct RequestView {
    host: Rc<dyn HostRequest>,
    environ: Environ,
}

impl RequestView {
    pub fn new(host: Rc<dyn HostRequest>, environ: Environ) -> Self {
        Self { host, environ }
    }

    pub fn environ(&self) -> &Environ {
        &self.environ
    }

    fn text(
        &self,
        key: &str,
        from_host: impl FnOnce(&dyn HostRequest) -> Option<String>,
    ) -> Option<String> {
        if self.environ.is_overridden(key) {
            self.environ.get_str(key)
        } else {
            from_host(self.host.as_ref())
        }
    }

    fn number<T: FromStr>(
        &self,
        key: &str,
        from_host: impl FnOnce(&dyn HostRequest) -> Option<T>,
    ) -> Option<T> {
        if self.environ.is_overridden(key) {
            self.environ.get_str(key)?.parse().ok()
        } else {
            from_host(self.host.as_ref())
        }
    }
}

impl HostRequest for RequestView {
    fn method(&self) -> Option<String> {
        self.text(keys::REQUEST_METHOD, |h| h.method())
    }

    fn script_name(&self) -> Option<String> {
        self.text(keys::SCRIPT_NAME, |h| h.script_name())
    }

    fn path_info(&self) -> Option<String> {
        self.text(keys::PATH_INFO, |h| h.path_info())
    }

    fn query_string(&self) -> Option<String> {
        self.text(keys::QUERY_STRING, |h| h.query_string())
    }

    fn content_type(&self) -> Option<String> {
        self.text(keys::CONTENT_TYPE, |h| h.content_type())
    }

    fn content_length(&self) -> Option<u64> {
        self.number(keys::CONTENT_LENGTH, |h| h.content_length())
    }

    fn remote_addr(&self) -> Option<String> {
        self.text(keys::REMOTE_ADDR, |h| h.remote_addr())
    }

    fn remote_host(&self) -> Option<String> {
        self.text(keys::REMOTE_HOST, |h| h.remote_host())
    }

    fn remote_port(&self) -> Option<u16> {
        self.number(keys::REMOTE_PORT, |h| h.remote_port())
    }

    fn local_name(&self) -> Option<String> {
        self.text(keys::SERVER_NAME, |h| h.local_name())
    }

    fn local_port(&self) -> Option<u16> {
        self.number(keys::SERVER_PORT, |h| h.local_port())
    }

    fn protocol(&self) -> Option<String> {
        self.text(keys::SERVER_PROTOCOL, |h| h.protocol())
    }

    fn scheme(&self) -> Option<String> {
        self.text(keys::URL_SCHEME, |h| h.scheme())
    }

    fn header_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .host
            .header_names()
            .into_iter()
            .filter(|name| {
                let key = header_key(name);
                !self.environ.is_overridden(&key) || self.environ.contains(&key)
            })
            .collect();
        for name in self.environ.added_keys().iter().filter_map(|k| header_name(k)) {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                names.push(name);
            }
        }
        names
    }

    fn header_values(&self, name: &str) -> Vec<String> {
        let key = header_key(name);
        if self.environ.is_overridden(&key) {
            self.environ.get_str(&key).into_iter().collect()
        } else {
            self.host.header_values(name)
        }
    }

    fn input(&self) -> InputStream {
        if !self.environ.is_overridden(keys::INPUT) {
            return self.host.input();
        }
        match self.environ.get(keys::INPUT) {
            Some(Value::Input(input)) => input,
            _ => InputStream::empty(),
        }
    }

    fn attached_environ(&self) -> Option<Environ> {
        Some(self.environ.clone())
    }
}
