use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Role of the poller's Zenoh session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZenohMode {
    #[default]
    Peer,
    Client,
    Router,
}

impl ZenohMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZenohMode::Peer => "peer",
            ZenohMode::Client => "client",
            ZenohMode::Router => "router",
        }
    }
}

impl fmt::Display for ZenohMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where published telemetry goes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZenohConfig {
    #[serde(default)]
    pub mode: ZenohMode,

    /// Locators to connect to, e.g. `tcp/192.168.1.10:7447`.
    #[serde(default)]
    pub connect: Vec<String>,

    /// Locators to listen on.
    #[serde(default)]
    pub listen: Vec<String>,
}

impl ZenohConfig {
    /// Check that every endpoint looks like a `<protocol>/<address>` locator.
    pub fn validate(&self) -> Result<()> {
        for endpoint in self.connect.iter().chain(&self.listen) {
            match endpoint.split_once('/') {
                Some((proto, addr)) if !proto.is_empty() && !addr.is_empty() => {}
                _ => {
                    return Err(Error::config(format!(
                        "Invalid Zenoh endpoint '{}', expected <protocol>/<address>",
                        endpoint
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level or `EnvFilter` directive, e.g. "info" or "accelbus_poller=debug".
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Replace the level with a command-line override, if one was given.
    pub fn with_level_override(mut self, level: Option<&str>) -> Self {
        if let Some(level) = level {
            self.level = level.to_string();
        }
        self
    }
}

/// Read and parse a JSON5 configuration file.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("Cannot read '{}': {}", path.display(), e)))?;

    parse_config(&content).map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
}

/// Parse a JSON5 configuration string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::config(format!("Invalid JSON5: {}", e)))
}
