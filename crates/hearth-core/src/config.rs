//! hearth.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HearthConfig {
    pub handler: HandlerConfig,
    pub environ: Option<EnvironConfig>,
}

/// Which registered application a bridge entry point serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Dotted registry identifier, e.g. `demo.hello`.
    pub name: String,
}

/// Process-wide capability flags published to every request view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironConfig {
    pub multithread: Option<bool>,
    pub multiprocess: Option<bool>,
    pub run_once: Option<bool>,
}

impl HearthConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: HearthConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal hearth.toml serving `handler`.
    pub fn scaffold(handler: &str) -> Self {
        HearthConfig {
            handler: HandlerConfig {
                name: handler.to_string(),
            },
            environ: Some(EnvironConfig {
                multithread: Some(true),
                multiprocess: Some(false),
                run_once: Some(false),
            }),
        }
    }

    pub fn multithread(&self) -> bool {
        self.environ
            .as_ref()
            .and_then(|e| e.multithread)
            .unwrap_or(true)
    }

    pub fn multiprocess(&self) -> bool {
        self.environ
            .as_ref()
            .and_then(|e| e.multiprocess)
            .unwrap_or(false)
    }

    pub fn run_once(&self) -> bool {
        self.environ
            .as_ref()
            .and_then(|e| e.run_once)
            .unwrap_or(false)
    }
}
