//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the orchestrator, including:
//! - Building one HTTP client per configured proxy (or a direct client)
//! - Applying the session user agent, cookies and default headers
//! - Rotating clients round-robin across requests
//! - Error classification into `FetchError`

use crate::config::SessionConfig;
use crate::task::{Method, Task};
use crate::ConfigError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::{Client, Proxy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors raised by the fetch collaborator
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },
}

impl FetchError {
    fn from_reqwest(url: &Url, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// A request handed to the fetch collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: Url,
    pub method: Method,

    /// Extra headers for this request only
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    /// Builds the request for a task
    ///
    /// JSON endpoints are requested the way the site's own scripts call
    /// them, with an `X-Requested-With` header.
    pub fn for_task(task: &Task) -> Self {
        let mut headers = Vec::new();
        if task.stage.expects_json() {
            headers.push(("X-Requested-With".to_string(), "XMLHttpRequest".to_string()));
        }

        Self {
            url: task.url.clone(),
            method: task.method,
            headers,
        }
    }
}

/// A successfully fetched response
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub url: Url,
    pub status: u16,
    pub body: String,
}

/// Fetch collaborator interface
///
/// Implementations own retries, proxying and connection reuse; the
/// orchestrator only spaces requests per destination host.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError>;
}

/// Builds an HTTP client from the session configuration
///
/// # Arguments
///
/// * `session` - The session configuration
/// * `proxy` - Optional proxy address all requests are routed through
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(ConfigError)` - A header, cookie or proxy could not be used
pub fn build_http_client(session: &SessionConfig, proxy: Option<&str>) -> Result<Client, ConfigError> {
    let mut headers = HeaderMap::new();

    for (name, value) in &session.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ConfigError::Validation(format!("Invalid header '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ConfigError::Validation(format!("Invalid value for '{}': {}", name, e)))?;
        headers.insert(name, value);
    }

    let cookies = session.cookie_pairs()?;
    if !cookies.is_empty() {
        let header = cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
        let value = HeaderValue::from_str(&header)
            .map_err(|e| ConfigError::Validation(format!("Invalid cookie header: {}", e)))?;
        headers.insert(COOKIE, value);
    }

    let mut builder = Client::builder()
        .user_agent(session.user_agent.as_str())
        .default_headers(headers)
        .timeout(session.timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        let proxy = Proxy::all(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| ConfigError::Validation(format!("Failed to build HTTP client: {}", e)))
}

/// reqwest-backed fetcher rotating across proxies
pub struct HttpFetcher {
    clients: Vec<Client>,
    next: AtomicUsize,
}

impl HttpFetcher {
    /// Creates a fetcher with one client per configured proxy, or a single
    /// direct client when no proxies are configured
    pub fn new(session: &SessionConfig) -> Result<Self, ConfigError> {
        let clients = if session.proxies.is_empty() {
            vec![build_http_client(session, None)?]
        } else {
            session
                .proxies
                .iter()
                .map(|proxy| build_http_client(session, Some(proxy)))
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
        })
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn client(&self) -> &Client {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        &self.clients[index]
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
        let client = self.client();
        let mut builder = match request.method {
            Method::Get => client.get(request.url.clone()),
            Method::Post => client.post(request.url.clone()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&request.url, e))?;

        let status = response.status();
        let final_url = response.url().clone();

        if !status.is_success() {
            return Err(FetchError::Status {
                url: request.url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(&request.url, e))?;

        tracing::trace!("Fetched {} ({} bytes)", final_url, body.len());

        Ok(FetchedPage {
            url: final_url,
            status: status.as_u16(),
            body,
        })
    }
}
