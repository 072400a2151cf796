//! Webistream HTTP client

pub mod auth;
pub mod error;
pub mod refresh;
pub mod session;

use error::ClientError;
use reqwest::{Client, ClientBuilder, Response};
use std::time::Duration;
use webistream_core::ClientConfig;

const USER_AGENT: &str = concat!("webistream-client/", env!("CARGO_PKG_VERSION"));

/// Unauthenticated Webistream API client.
///
/// Used directly for public endpoints (login, registration, token refresh)
/// and wrapped by [`session::SessionClient`] for everything that needs a
/// bearer token.
#[derive(Clone)]
pub struct WebistreamClient {
    client: Client,
    base_url: String,
}

impl WebistreamClient {
    /// Create a new client with default configuration
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a new client builder
    pub fn builder() -> WebistreamClientBuilder {
        WebistreamClientBuilder::default()
    }

    /// Create a client from loaded configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::builder()
            .base_url(&config.api_url)
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Underlying transport
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Create a request builder for `path` relative to the base URL
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, url)
    }

    /// Execute a request and handle common errors
    pub async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await?;
        decode_response(response).await
    }
}

/// Like [`decode_response`], but a success with an empty body yields `T::default()`
pub(crate) async fn decode_optional_response<T>(response: Response) -> Result<T, ClientError>
where
    T: serde::de::DeserializeOwned + Default,
{
    let status = response.status();
    if !status.is_success() {
        return decode_response(response).await;
    }

    let body = response.text().await?;
    if body.trim().is_empty() {
        Ok(T::default())
    } else {
        Ok(serde_json::from_str(&body)?)
    }
}

/// Decode a success body as JSON, or turn the status into a [`ClientError`]
pub(crate) async fn decode_response<T: serde::de::DeserializeOwned>(
    response: Response,
) -> Result<T, ClientError> {
    let status = response.status();

    if status.is_success() {
        Ok(response.json().await?)
    } else {
        let message = response.text().await.unwrap_or_else(|_| status.to_string());
        Err(ClientError::from_status(status, message))
    }
}

/// Builder for WebistreamClient
#[derive(Default)]
pub struct WebistreamClientBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl WebistreamClientBuilder {
    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the total request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client
    pub fn build(self) -> Result<WebistreamClient, ClientError> {
        let base_url = self
            .base_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;

        // Ensure base_url ends without a trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        let mut client_builder = ClientBuilder::new();

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            client_builder = client_builder.connect_timeout(timeout);
        }

        client_builder =
            client_builder.user_agent(self.user_agent.unwrap_or_else(|| USER_AGENT.to_string()));

        let client = client_builder.build()?;

        Ok(WebistreamClient { client, base_url })
    }
}
