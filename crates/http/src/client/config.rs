//! Client configuration

use super::refresh::DEFAULT_QUEUE_TIMEOUT;
use super::session::DEFAULT_TOKEN_KEY;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default API location
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// How the refresh credential is presented to `/auth/refresh`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// `Cookie: refresh_token=...`
    #[default]
    Cookie,
    /// JSON body `{"refresh_token": "..."}`
    Body,
}

/// Settings used to build an [`ApiClient`](super::ApiClient)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API base URL
    pub base_url: String,

    /// Request timeout in seconds (0 disables it)
    pub timeout_secs: u64,

    /// User agent sent with every request
    pub user_agent: String,

    /// Storage key of the access token
    pub token_key: String,

    /// Where the refresh credential travels
    pub refresh_mode: RefreshMode,

    /// Seconds a request may wait behind an in-flight refresh (0 waits forever)
    pub queue_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            user_agent: concat!("servicegpt-client/", env!("CARGO_PKG_VERSION")).to_string(),
            token_key: DEFAULT_TOKEN_KEY.to_string(),
            refresh_mode: RefreshMode::default(),
            queue_timeout_secs: DEFAULT_QUEUE_TIMEOUT.as_secs(),
        }
    }
}

impl ClientConfig {
    pub const fn timeout(&self) -> Option<Duration> {
        non_zero_secs(self.timeout_secs)
    }

    pub const fn queue_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.queue_timeout_secs)
    }
}

const fn non_zero_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}
