//! Error taxonomy for the bridge.

use thiserror::Error;

/// Misuse of the status/header/body ordering by a pull-style application.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("status and headers already set")]
    AlreadySet,

    #[error("write before status and headers were set")]
    WriteBeforeStatus,

    #[error("malformed status line: {0:?}")]
    InvalidStatus(String),

    #[error("header {name:?} is not latin-1 encodable: {ch:?}")]
    NonLatin1Header { name: String, ch: char },

    #[error("invalid header name: {0:?}")]
    InvalidHeaderName(String),

    #[error("output stream is closed")]
    OutputClosed,
}

/// A bridge entry point could not be set up.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("handler identifier not configured properly: {0:?}")]
    MalformedHandler(String),

    #[error("no application registered as {0:?}")]
    UnknownHandler(String),

    #[error("{name:?} is registered as {found}, expected {expected}")]
    WrongHandlerKind {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("failed to read configuration: {0}")]
    Read(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Terminal error of one bridged request.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("stream splice deadlock in state {0}")]
    StallDeadlock(&'static str),

    #[error("application error: {0}")]
    Application(anyhow::Error),

    #[error("downstream chain failed: {0}")]
    Downstream(String),

    #[error("host i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Map an application-side error back into the taxonomy.
    ///
    /// Bridge errors that travelled through application code inside an
    /// `anyhow::Error` (e.g. a `?` on `start_response`) keep their variant.
    pub fn from_app(err: anyhow::Error) -> Self {
        match err.downcast::<BridgeError>() {
            Ok(bridge) => bridge,
            Err(err) => match err.downcast::<ProtocolError>() {
                Ok(protocol) => BridgeError::Protocol(protocol),
                Err(err) => BridgeError::Application(err),
            },
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
