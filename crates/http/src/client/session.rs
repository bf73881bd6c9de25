//! Session credentials: the access token and the refresh cookie

use super::error::ClientError;
use super::storage::{CredentialStorage, MemoryStorage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default storage key of the access token
pub const DEFAULT_TOKEN_KEY: &str = "token";

/// Cookie carrying the refresh credential
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Opaque bearer credential
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value of the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Longer-lived credential exchanged for new access tokens
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshCredential {
    value: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl RefreshCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    /// Credential that expired at the Unix epoch, used to clear the cookie
    pub fn expired() -> Self {
        Self {
            value: String::new(),
            expires_at: DateTime::from_timestamp(0, 0),
        }
    }

    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Parse a `Set-Cookie` header, returning `None` for any other cookie
    ///
    /// `Max-Age` wins over `Expires` when both are present.
    pub fn from_set_cookie(header: &str) -> Option<Self> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        if name.trim() != REFRESH_COOKIE {
            return None;
        }

        let mut expires_at = None;
        let mut max_age = None;
        for attribute in parts {
            let (key, val) = attribute
                .split_once('=')
                .map_or((attribute.trim(), ""), |(k, v)| (k.trim(), v.trim()));
            if key.eq_ignore_ascii_case("max-age") {
                max_age = val.parse::<i64>().ok();
            } else if key.eq_ignore_ascii_case("expires") {
                expires_at = DateTime::parse_from_rfc2822(val)
                    .ok()
                    .map(|date| date.with_timezone(&Utc));
            }
        }
        if let Some(seconds) = max_age {
            expires_at = Some(Utc::now() + chrono::Duration::seconds(seconds));
        }

        Some(Self {
            value: value.trim().trim_matches('"').to_string(),
            expires_at,
        })
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// An empty or past-dated credential counts as absent
    pub fn is_expired(&self) -> bool {
        self.value.is_empty() || self.expires_at.is_some_and(|at| at <= Utc::now())
    }

    /// Value of the `Cookie` request header
    pub fn cookie_header(&self) -> String {
        format!("{REFRESH_COOKIE}={}", self.value)
    }
}

impl fmt::Debug for RefreshCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCredential")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Holds the credentials of the current session
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn CredentialStorage>,
    token_key: Arc<str>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn CredentialStorage>) -> Self {
        Self {
            storage,
            token_key: Arc::from(DEFAULT_TOKEN_KEY),
        }
    }

    /// Session kept in memory only
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Store the access token under a different key (e.g. `access_token`)
    #[must_use]
    pub fn with_token_key(mut self, key: impl AsRef<str>) -> Self {
        self.token_key = Arc::from(key.as_ref());
        self
    }

    pub fn token_key(&self) -> &str {
        &self.token_key
    }

    /// Current access token
    pub fn get(&self) -> Option<AccessToken> {
        self.storage
            .get(&self.token_key)
            .filter(|token| !token.is_empty())
            .map(AccessToken)
    }

    /// Replace the access token
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written
    pub fn set(&self, token: &AccessToken) -> Result<(), ClientError> {
        self.storage.set(&self.token_key, token.as_str())?;
        Ok(())
    }

    /// Drop the access token and expire the refresh cookie
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written
    pub fn clear(&self) -> Result<(), ClientError> {
        self.storage.remove(&self.token_key)?;
        self.set_refresh_credential(&RefreshCredential::expired())
    }

    pub fn is_authenticated(&self) -> bool {
        self.get().is_some()
    }

    /// Current refresh credential, ignoring expired ones
    pub fn refresh_credential(&self) -> Option<RefreshCredential> {
        let raw = self.storage.get(REFRESH_COOKIE)?;
        match serde_json::from_str::<RefreshCredential>(&raw) {
            Ok(credential) if credential.is_expired() => None,
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable refresh credential");
                None
            }
        }
    }

    /// Replace the refresh credential
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written
    pub fn set_refresh_credential(&self, credential: &RefreshCredential) -> Result<(), ClientError> {
        let raw = serde_json::to_string(credential)?;
        self.storage.set(REFRESH_COOKIE, &raw)?;
        Ok(())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("token_key", &self.token_key)
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}
