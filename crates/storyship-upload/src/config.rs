//! Environment-derived tunables for uploads and the service endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const RETRIES_ENV: &str = "STORYSHIP_RETRIES";
pub const CONCURRENCY_ENV: &str = "STORYSHIP_UPLOAD_CONCURRENCY";
pub const OUTPUT_INTERVAL_ENV: &str = "STORYSHIP_OUTPUT_INTERVAL";
pub const API_URL_ENV: &str = "STORYSHIP_API_URL";
pub const PROJECT_TOKEN_ENV: &str = "STORYSHIP_PROJECT_TOKEN";

const DEFAULT_RETRIES: u32 = 5;
const DEFAULT_CONCURRENCY: usize = 10;
const DEFAULT_OUTPUT_INTERVAL_MS: u64 = 10_000;
const DEFAULT_API_URL: &str = "https://index.storyship.dev/graphql";

/// Upload engine tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Retries per file after the first attempt
    pub retries: u32,
    /// Maximum concurrent file transfers
    pub concurrency: usize,
    /// Minimum time between progress log lines
    pub output_interval: Duration,
    /// Backoff unit; attempt `n` waits `n * backoff`
    pub backoff: Duration,
    /// Read size of the streamed request body
    pub chunk_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            retries: DEFAULT_RETRIES,
            concurrency: DEFAULT_CONCURRENCY,
            output_interval: Duration::from_millis(DEFAULT_OUTPUT_INTERVAL_MS),
            backoff: Duration::from_millis(200),
            chunk_size: 64 * 1024,
        }
    }
}

impl UploadConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create a config from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        UploadConfig {
            retries: parse_var(&lookup, RETRIES_ENV).unwrap_or(defaults.retries),
            concurrency: parse_var(&lookup, CONCURRENCY_ENV)
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.concurrency),
            output_interval: parse_var(&lookup, OUTPUT_INTERVAL_ENV)
                .map(Duration::from_millis)
                .unwrap_or(defaults.output_interval),
            ..defaults
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_output_interval(mut self, interval: Duration) -> Self {
        self.output_interval = interval;
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key = %key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

/// Service endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// GraphQL endpoint URL
    pub api_url: String,
    /// Project token sent as bearer credentials
    pub project_token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            api_url: DEFAULT_API_URL.to_string(),
            project_token: None,
            timeout: Duration::from_secs(60),
        }
    }
}

impl RemoteConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        RemoteConfig {
            api_url: lookup(API_URL_ENV).unwrap_or(defaults.api_url),
            project_token: lookup(PROJECT_TOKEN_ENV).filter(|t| !t.is_empty()),
            ..defaults
        }
    }

    /// Create config for a specific endpoint
    pub fn new(api_url: &str) -> Self {
        RemoteConfig {
            api_url: api_url.to_string(),
            ..Self::default()
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.project_token = Some(token.to_string());
        self
    }
}
