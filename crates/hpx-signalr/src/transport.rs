//! HTTP transport used for negotiate, start and send requests.
//!
//! The client only needs two request shapes, captured by [`HttpTransport`].
//! [`ReqwestTransport`] is the production implementation; its
//! [`reqwest::Client`] keeps a cookie store that the SSE stream source shares,
//! so session cookies set during negotiate travel with the stream.

use std::fmt;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::{
    config::ClientConfig,
    error::{SignalRError, SignalRResult},
};

/// Status and body of a completed HTTP request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: http::StatusCode,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: http::StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// SignalR treats both 200 and 302 as acceptance.
    pub fn is_accepted(&self) -> bool {
        self.status == http::StatusCode::OK || self.status == http::StatusCode::FOUND
    }
}

/// Minimal HTTP surface required by the client.
#[async_trait]
pub trait HttpTransport: Send + Sync + fmt::Debug {
    /// Perform a GET request.
    async fn get(&self, url: &Url) -> SignalRResult<HttpResponse>;

    /// Perform a POST request with a url-encoded form body.
    async fn post_form(&self, url: &Url, form: &[(&str, &str)]) -> SignalRResult<HttpResponse>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with a cookie store, the configured default headers
    /// and connect timeout. Redirects are not followed, so a `302` answer is
    /// observed as such.
    pub fn new(config: &ClientConfig) -> SignalRResult<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(config.headers.clone())
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| SignalRError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// The underlying client, shared with the stream source.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    async fn finish(response: reqwest::Response) -> SignalRResult<HttpResponse> {
        let status = response.status();
        let body = response.text().await?;
        debug!(status = %status, bytes = body.len(), "HTTP response");
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &Url) -> SignalRResult<HttpResponse> {
        let response = self.client.get(url.clone()).send().await?;
        Self::finish(response).await
    }

    async fn post_form(&self, url: &Url, form: &[(&str, &str)]) -> SignalRResult<HttpResponse> {
        let response = self.client.post(url.clone()).form(form).send().await?;
        Self::finish(response).await
    }
}
