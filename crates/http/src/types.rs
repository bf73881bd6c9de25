//! Request and response payloads of the ServiceGPT API

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Token payload returned by `/auth/login` and `/auth/refresh`
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Present when the server hands the refresh token out in the body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Body sent to `/auth/refresh` when the credential travels in the body
#[derive(Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Account registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
}

/// Account as returned by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

const fn default_active() -> bool {
    true
}

/// Conversation summary shown in the chat list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub title: String,
    pub owner_id: i64,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub timestamp: NaiveDateTime,
    /// Author role (`user` / `assistant`) on servers that track it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Body of both message-sending endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// Error payload produced by the server
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Human readable `detail`, if the server sent one
    pub fn detail_message(&self) -> Option<String> {
        match self.detail.as_ref()? {
            serde_json::Value::String(detail) => Some(detail.clone()),
            serde_json::Value::Null => None,
            // Validation failures carry a list of field errors
            serde_json::Value::Array(items) => Some(
                items
                    .iter()
                    .map(|item| {
                        item.get("msg")
                            .and_then(serde_json::Value::as_str)
                            .map_or_else(|| item.to_string(), str::to_string)
                    })
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            other => Some(other.to_string()),
        }
    }
}
