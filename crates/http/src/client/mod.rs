//! ServiceGPT HTTP client

pub mod auth;
pub mod chats;
pub mod config;
pub mod error;
pub mod listener;
pub mod queue;
pub mod refresh;
pub mod request;
pub mod session;
pub mod storage;

pub use config::{ClientConfig, RefreshMode};
pub use refresh::SessionManager;
pub use request::ApiRequest;

use error::ClientError;
use listener::{LogListener, SessionListener};
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use session::{RefreshCredential, SessionStore};
use std::sync::Arc;
use std::time::Duration;

/// ServiceGPT API client
///
/// Cloning is cheap; clones share the session and the refresh state, so a
/// 401 seen by any clone triggers at most one refresh.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: SessionStore,
    manager: Arc<SessionManager>,
    refresh_mode: RefreshMode,
}

impl ApiClient {
    /// Create a new client with default configuration
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a client from loaded settings
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::builder().config(config).build()
    }

    /// Create a new client builder
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Credentials of the current session
    pub const fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Refresh coordination shared by all clones
    pub fn session_manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Send a request, refreshing the access token once if it is rejected
    ///
    /// Non-401 responses are returned as-is, whatever their status.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, when the refresh fails, or when
    /// the request is rejected again after a refresh
    pub async fn send(&self, mut request: ApiRequest) -> Result<Response, ClientError> {
        loop {
            let token = self.session.get();
            let response = self.dispatch(&request, token.as_ref()).await?;

            if response.status() != StatusCode::UNAUTHORIZED || !request.is_authorized() {
                return Ok(response);
            }
            if request.is_retried() {
                warn!(
                    method = %request.method(),
                    path = request.path(),
                    "Request rejected again after token refresh"
                );
                return Err(ClientError::from_response(response).await);
            }

            debug!(method = %request.method(), path = request.path(), "Access token rejected");
            request.mark_retried();
            self.manager
                .recover(&self.session, token.as_ref(), || async {
                    self.refresh().await.map(drop)
                })
                .await?;
        }
    }

    /// Send a request and decode its JSON response
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the server answers with an
    /// error status, or the body does not match `T`
    pub async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ClientError> {
        let response = self.send(request).await?;
        decode(response).await
    }

    /// Send a request whose response body is irrelevant
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server answers with an error status
    pub async fn execute_unit(&self, request: ApiRequest) -> Result<(), ClientError> {
        let response = self.send(request).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::from_response(response).await)
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&session::AccessToken>,
    ) -> Result<Response, ClientError> {
        debug!(
            method = %request.method(),
            path = request.path(),
            retried = request.is_retried(),
            "Sending request"
        );
        let response = request
            .build(&self.client, &self.base_url, token)
            .send()
            .await?;
        debug!(path = request.path(), status = response.status().as_u16(), "Received response");
        Ok(response)
    }

    /// Store the refresh cookie if the response sets one
    fn capture_refresh_cookie(&self, response: &Response) -> Result<(), ClientError> {
        let credential = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(RefreshCredential::from_set_cookie);

        if let Some(credential) = credential {
            debug!(expires_at = ?credential.expires_at(), "Storing refresh credential");
            self.session.set_refresh_credential(&credential)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("session", &self.session)
            .field("refresh_mode", &self.refresh_mode)
            .finish_non_exhaustive()
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    } else {
        Err(ClientError::from_response(response).await)
    }
}

/// Builder for ApiClient
pub struct ApiClientBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    session: Option<SessionStore>,
    token_key: Option<String>,
    listener: Arc<dyn SessionListener>,
    refresh_mode: RefreshMode,
    queue_timeout: Option<Duration>,
}

impl Default for ApiClientBuilder {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: None,
            user_agent: None,
            session: None,
            token_key: None,
            listener: Arc::new(LogListener),
            refresh_mode: RefreshMode::default(),
            queue_timeout: Some(refresh::DEFAULT_QUEUE_TIMEOUT),
        }
    }
}

impl ApiClientBuilder {
    /// Apply every setting from a loaded configuration
    #[must_use]
    pub fn config(mut self, config: &ClientConfig) -> Self {
        self.base_url = Some(config.base_url.clone());
        self.timeout = config.timeout();
        self.user_agent = Some(config.user_agent.clone());
        self.token_key = Some(config.token_key.clone());
        self.refresh_mode = config.refresh_mode;
        self.queue_timeout = config.queue_timeout();
        self
    }

    /// Set the base URL
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the user agent
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Use an existing session store (defaults to an in-memory one)
    #[must_use]
    pub fn session(mut self, session: SessionStore) -> Self {
        self.session = Some(session);
        self
    }

    /// Notify `listener` when the session can no longer be refreshed
    #[must_use]
    pub fn listener(mut self, listener: impl SessionListener + 'static) -> Self {
        self.listener = Arc::new(listener);
        self
    }

    /// Choose how the refresh credential is sent
    #[must_use]
    pub const fn refresh_mode(mut self, mode: RefreshMode) -> Self {
        self.refresh_mode = mode;
        self
    }

    /// Bound the wait behind an in-flight refresh; `None` waits indefinitely
    #[must_use]
    pub const fn queue_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Build the client
    pub fn build(self) -> Result<ApiClient, ClientError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;

        // Ensure base_url ends without a trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::Configuration("base_url is empty".into()));
        }

        let mut client_builder = ClientBuilder::new();

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        if let Some(user_agent) = self.user_agent {
            client_builder = client_builder.user_agent(user_agent);
        } else {
            client_builder = client_builder.user_agent(concat!(
                "servicegpt-client/",
                env!("CARGO_PKG_VERSION")
            ));
        }

        let client = client_builder.build()?;

        let mut session = self.session.unwrap_or_default();
        if let Some(key) = self.token_key {
            session = session.with_token_key(key);
        }

        let manager = SessionManager::new(self.listener).with_queue_timeout(self.queue_timeout);

        Ok(ApiClient {
            client,
            base_url,
            session,
            manager: Arc::new(manager),
            refresh_mode: self.refresh_mode,
        })
    }
}
