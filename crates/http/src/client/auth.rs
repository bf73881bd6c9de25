//! Authentication API client methods

use super::session::{AccessToken, RefreshCredential};
use super::{ApiClient, ApiRequest, ClientError, RefreshMode, decode};
use crate::types::{RefreshRequest, RegisterRequest, TokenResponse, User};
use reqwest::{Method, Response, header};

impl ApiClient {
    /// Log in with email and password
    ///
    /// The access token and refresh credential are stored in the session.
    pub async fn login(&self, email: &str, password: &str) -> Result<AccessToken, ClientError> {
        let req = ApiRequest::public(Method::POST, "/auth/login").form([
            ("username", email),
            ("password", password),
            ("grant_type", "password"),
        ]);
        let response = self.send(req).await?;
        let token = self.accept_tokens(response).await?;
        info!(email, "Logged in");
        Ok(token)
    }

    /// Create an account
    pub async fn register(&self, request: &RegisterRequest) -> Result<User, ClientError> {
        let req = ApiRequest::public(Method::POST, "/auth/register").json(request)?;
        let user: User = self.execute(req).await?;
        info!(user_id = user.id, "Registered account");
        Ok(user)
    }

    /// Exchange the refresh credential for a new access token
    ///
    /// A 401 here fails with `AuthenticationFailed`.
    pub async fn refresh(&self) -> Result<AccessToken, ClientError> {
        let credential = self
            .session
            .refresh_credential()
            .ok_or(ClientError::MissingRefreshCredential)?;

        let req = ApiRequest::public(Method::POST, "/auth/refresh");
        let req = match self.refresh_mode {
            RefreshMode::Cookie => req.header(header::COOKIE, credential.cookie_header()),
            RefreshMode::Body => req.json(&RefreshRequest {
                refresh_token: credential.value(),
            })?,
        };

        // Dispatched directly: the refresh runs inside the 401 handling of `send`
        let response = self.dispatch(&req, None).await?;
        let token = self.accept_tokens(response).await?;
        info!("Refreshed access token");
        Ok(token)
    }

    /// Forget the current session
    pub fn logout(&self) -> Result<(), ClientError> {
        self.session.clear()?;
        info!("Logged out");
        Ok(())
    }

    /// Account of the logged-in user
    pub async fn current_user(&self) -> Result<User, ClientError> {
        self.execute(ApiRequest::get("/auth/users/me")).await
    }

    /// Store the credentials carried by a login or refresh response
    async fn accept_tokens(&self, response: Response) -> Result<AccessToken, ClientError> {
        if response.status().is_success() {
            self.capture_refresh_cookie(&response)?;
        }
        let tokens: TokenResponse = decode(response).await?;

        let token = AccessToken::new(tokens.access_token);
        self.session.set(&token)?;
        if let Some(refresh_token) = tokens.refresh_token {
            self.session
                .set_refresh_credential(&RefreshCredential::new(refresh_token))?;
        }
        Ok(token)
    }
}
