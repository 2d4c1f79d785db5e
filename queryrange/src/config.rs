use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_PATH: &str = "/api/v1/query_range";

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Route path must start with '/': {0}")]
    InvalidPath(String),

    #[error("Timeout must be greater than 0")]
    InvalidTimeout,
}

/// Query frontend configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for incoming range queries
    pub listener: Listener,
    /// Path the range-query endpoint is served on
    #[serde(default = "default_path")]
    pub path: String,
    /// Backend that executes the queries
    pub downstream: Downstream,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub merge: MergeConfig,
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;

        if !self.path.starts_with('/') {
            return Err(ValidationError::InvalidPath(self.path.clone()));
        }

        if self.timeouts.http_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Downstream {
    /// Base URL of the backend. Invalid URLs are rejected during
    /// deserialization.
    pub url: Url,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Timeouts {
    /// Covers the whole downstream round trip, including the response body.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

/// What to do when two partial results disagree on the value at a timestamp.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateSamplePolicy {
    /// Keep the sample from the earliest input.
    #[default]
    KeepFirst,
    /// Fail the merge.
    Reject,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
pub struct MergeConfig {
    #[serde(default)]
    pub duplicate_samples: DuplicateSamplePolicy,
}
