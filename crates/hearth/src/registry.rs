//! Registry of named applications, resolved once at entry-point setup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::application::{Application, Middleware};
use crate::error::ConfigurationError;

/// An application shared across every request of the process.
pub type SharedApplication = Arc<dyn Application + Send + Sync>;

/// What a registry identifier resolves to.
#[derive(Clone)]
pub enum ApplicationHandle {
    /// Serves requests directly.
    Endpoint(SharedApplication),
    /// Wraps a downstream application per request.
    Middleware(Arc<dyn Middleware>),
}

impl ApplicationHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            ApplicationHandle::Endpoint(_) => "endpoint",
            ApplicationHandle::Middleware(_) => "middleware",
        }
    }

    pub fn into_endpoint(self, name: &str) -> Result<SharedApplication, ConfigurationError> {
        match self {
            ApplicationHandle::Endpoint(app) => Ok(app),
            other => Err(wrong_kind(name, "endpoint", other.kind())),
        }
    }

    pub fn into_middleware(self, name: &str) -> Result<Arc<dyn Middleware>, ConfigurationError> {
        match self {
            ApplicationHandle::Middleware(factory) => Ok(factory),
            other => Err(wrong_kind(name, "middleware", other.kind())),
        }
    }
}

fn wrong_kind(name: &str, expected: &'static str, found: &'static str) -> ConfigurationError {
    ConfigurationError::WrongHandlerKind {
        name: name.to_string(),
        expected,
        found,
    }
}

impl fmt::Debug for ApplicationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApplicationHandle::{}", self.kind())
    }
}

/// Identifiers are dotted names with at least two non-empty segments.
pub fn validate_identifier(identifier: &str) -> Result<(), ConfigurationError> {
    let mut segments = 0;
    for segment in identifier.split('.') {
        if segment.is_empty() {
            return Err(ConfigurationError::MalformedHandler(identifier.to_string()));
        }
        segments += 1;
    }
    if segments < 2 {
        return Err(ConfigurationError::MalformedHandler(identifier.to_string()));
    }
    Ok(())
}

/// Immutable mapping from identifiers to applications.
#[derive(Default, Clone)]
pub struct Registry {
    entries: HashMap<String, ApplicationHandle>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn resolve(&self, identifier: &str) -> Result<ApplicationHandle, ConfigurationError> {
        validate_identifier(identifier)?;
        let handle = self
            .entries
            .get(identifier)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownHandler(identifier.to_string()))?;
        debug!(identifier, kind = handle.kind(), "resolved application");
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered identifiers, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.names().into_iter().map(|n| (n, self.entries[n].kind())))
            .finish()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<(String, ApplicationHandle)>,
}

impl RegistryBuilder {
    pub fn endpoint(
        mut self,
        identifier: impl Into<String>,
        app: impl Application + Send + Sync + 'static,
    ) -> Self {
        self.entries
            .push((identifier.into(), ApplicationHandle::Endpoint(Arc::new(app))));
        self
    }

    pub fn middleware(
        mut self,
        identifier: impl Into<String>,
        factory: impl Middleware + 'static,
    ) -> Self {
        self.entries
            .push((identifier.into(), ApplicationHandle::Middleware(Arc::new(factory))));
        self
    }

    /// Validate every identifier. Later registrations replace earlier ones.
    pub fn build(self) -> Result<Registry, ConfigurationError> {
        let mut entries = HashMap::with_capacity(self.entries.len());
        for (identifier, handle) in self.entries {
            validate_identifier(&identifier)?;
            entries.insert(identifier, handle);
        }
        Ok(Registry { entries })
    }
}
