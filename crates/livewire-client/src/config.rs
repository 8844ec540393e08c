//! Client configuration.
//!
//! ```toml
//! url = "wss://api.example.com"
//!
//! [reconnect]
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! max_attempts = 5
//! ```

use std::path::Path;

use livewire_core::Endpoint;
use serde::Deserialize;

use crate::backoff::ReconnectPolicy;
use crate::error::ClientError;

/// Default backend origin for local development.
pub const DEFAULT_URL: &str = "ws://localhost:8000";

/// Settings for one [`LiveChannel`](crate::LiveChannel).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend origin; the channel path is appended per user.
    pub url: String,
    /// Reconnect schedule.
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Config for `url` with the default reconnect schedule.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Parse from TOML; missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ClientError> {
        Ok(toml::from_str(s)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(&self.url)
    }
}
