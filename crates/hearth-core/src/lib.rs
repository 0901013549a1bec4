pub mod config;
pub mod header;

pub use config::HearthConfig;
pub use header::{Header, HeaderMap, NonLatin1};
