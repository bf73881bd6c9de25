//! Client error types

use crate::types::ErrorBody;
use std::time::Duration;
use thiserror::Error;

/// Client error types
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or request error
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server returned an error status
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Request payload rejected by server-side validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Session storage could not be read or written
    #[error("Session storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// No refresh credential stored for this session
    #[error("No refresh credential available")]
    MissingRefreshCredential,

    /// The token refresh this request waited on did not succeed
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Gave up waiting for an in-flight token refresh
    #[error("Timed out after {0:?} waiting for token refresh")]
    RefreshTimeout(Duration),
}

impl ClientError {
    /// Create error from HTTP status code
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        match status.as_u16() {
            400 => Self::BadRequest(message),
            401 => Self::AuthenticationFailed(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            422 => Self::Validation(message),
            _ => Self::ServerError {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// Build an error from a non-success response, preferring the server's `detail`
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::from_status(status, error_message(status, &body))
    }

    /// Whether the user has to log in again to continue
    pub const fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_)
                | Self::MissingRefreshCredential
                | Self::RefreshFailed(_)
                | Self::RefreshTimeout(_)
        )
    }
}

fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Some(detail) = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.detail_message())
    {
        return detail;
    }

    if body.trim().is_empty() {
        status.to_string()
    } else {
        body.to_string()
    }
}
