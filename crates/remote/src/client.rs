//! Authenticated HTTP client for the remote store.

use crate::error::{RemoteError, RemoteResult};
use reqwest::Url;
use reqwest::cookie::{CookieStore, Jar};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use vmtest_core::RemoteConfig;

/// HTTP client carrying the bearer token, the session cookie jar and the
/// remote endpoint configuration.
///
/// Cheap to clone; clones share the connection pool and cookies.
#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    cookies: Arc<Jar>,
    token: String,
    config: Arc<RemoteConfig>,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("config", &self.config)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl RemoteClient {
    pub fn new(config: RemoteConfig, token: impl Into<String>) -> RemoteResult<Self> {
        config.validate()?;
        let cookies = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(cookies.clone())
            .build()?;
        Ok(Self {
            http,
            cookies,
            token: token.into(),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url.trim_end_matches('/'))
    }

    pub(crate) fn content_url(&self, path: &str) -> String {
        format!("{}{path}", self.config.content_url.trim_end_matches('/'))
    }

    pub(crate) fn web_url(&self, path: &str) -> String {
        format!("{}{path}", self.config.web_url.trim_end_matches('/'))
    }

    /// POST a JSON body to the API with bearer authorization and decode the
    /// JSON response.
    pub(crate) async fn post_api<B, T>(&self, path: &str, body: &B) -> RemoteResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.api_url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Value of a session cookie as it would be sent to `url`.
    pub(crate) fn cookie(&self, url: &str, name: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let header = self.cookies.cookies(&url)?;
        let header = header.to_str().ok()?;
        header.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value.to_string())
        })
    }
}

/// Pass 2xx responses through; turn anything else into
/// [`RemoteError::Status`] carrying the reason phrase and response body.
pub async fn check_status(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::status(status, &body))
}
