//! Replayable description of an outbound API call

use super::error::ClientError;
use super::session::AccessToken;
use reqwest::{Method, header};
use serde::Serialize;

/// Request payload
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// An API call that can be reissued after a token refresh
///
/// Unlike a `reqwest::RequestBuilder` this can be rebuilt any number of
/// times, each time with whatever access token the session holds.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: RequestBody,
    headers: Vec<(header::HeaderName, String)>,
    authorized: bool,
    retried: bool,
}

impl ApiRequest {
    /// Authorized request: carries the bearer token and is refreshed on 401
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
            headers: Vec::new(),
            authorized: true,
            retried: false,
        }
    }

    /// Public request: no bearer token, 401 passes straight through
    pub fn public(method: Method, path: impl Into<String>) -> Self {
        Self {
            authorized: false,
            ..Self::new(method, path)
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ClientError> {
        self.body = RequestBody::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Attach a form-encoded body
    #[must_use]
    pub fn form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = RequestBody::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    #[must_use]
    pub fn header(mut self, name: header::HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub const fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub const fn body(&self) -> &RequestBody {
        &self.body
    }

    pub const fn is_authorized(&self) -> bool {
        self.authorized
    }

    pub const fn is_retried(&self) -> bool {
        self.retried
    }

    /// Mark the request as already replayed once after a 401
    pub fn mark_retried(&mut self) {
        self.retried = true;
    }

    pub(crate) fn build(
        &self,
        client: &reqwest::Client,
        base_url: &str,
        token: Option<&AccessToken>,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}{}", base_url, self.path);
        let mut request = client.request(self.method.clone(), url);

        if let (true, Some(token)) = (self.authorized, token) {
            request = request.header(header::AUTHORIZATION, token.bearer());
        }
        for (name, value) in &self.headers {
            request = request.header(name.clone(), value.as_str());
        }

        match &self.body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.json(value),
            RequestBody::Form(fields) => request.form(fields),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_requests_are_not_authorized() {
        let request = ApiRequest::public(Method::POST, "/auth/login").form([("username", "a")]);
        assert!(!request.is_authorized());
        assert!(matches!(request.body(), RequestBody::Form(fields) if fields.len() == 1));
    }

    #[test]
    fn test_bearer_only_on_authorized_requests() {
        let client = reqwest::Client::new();
        let token = AccessToken::new("abc");

        let built = ApiRequest::get("/chats")
            .build(&client, "http://localhost:8000", Some(&token))
            .build()
            .unwrap();
        assert_eq!(built.url().as_str(), "http://localhost:8000/chats");
        assert_eq!(built.headers()[header::AUTHORIZATION], "Bearer abc");

        let public = ApiRequest::public(Method::POST, "/auth/register")
            .build(&client, "http://localhost:8000", Some(&token))
            .build()
            .unwrap();
        assert!(public.headers().get(header::AUTHORIZATION).is_none());
    }

    #[test]
    fn test_mark_retried() {
        let mut request = ApiRequest::post("/chats/messages")
            .json(&serde_json::json!({"content": "hi"}))
            .unwrap();
        assert!(!request.is_retried());
        request.mark_retried();
        assert!(request.clone().is_retried());
    }
}
