//! Timeout-bounded HTTP access to the backend.
//!
//! The backend runs on the same board but still over HTTP, and it restarts,
//! stalls and drops connections. [`BoundedHttpClient::send`] wraps whatever
//! [`HttpTransport`] it is given in `tokio::time::timeout`, so a request fails
//! with [`BackendError::Timeout`] even when the transport itself never returns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use crate::error::BackendError;

const USER_AGENT: &str = concat!("orion-rs/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Sent as `application/x-www-form-urlencoded` when non-empty.
    pub form: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self { method: Method::Get, url: url.into(), form: Vec::new() }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self { method: Method::Post, url: url.into(), form: Vec::new() }
    }

    pub fn with_form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: String,
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx reply into [`BackendError::Status`].
    pub fn error_for_status(self) -> Result<Self, BackendError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(BackendError::Status { url: self.url, status: self.status })
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, BackendError> {
        serde_json::from_slice(&self.body).map_err(|e| BackendError::Decode {
            url: self.url.clone(),
            message: e.to_string(),
        })
    }
}

/// One request/response exchange. Implementations report connection failures
/// as [`BackendError::Transport`] and need not enforce any timeout.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, BackendError>;
}

/// Transport backed by a pooled `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| BackendError::Transport {
                url: String::new(),
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, BackendError> {
        trace!(url = %request.url, method = ?request.method, "HTTP request starting");
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(
                url = %request.url,
                error = %e,
                is_connect = e.is_connect(),
                is_timeout = e.is_timeout(),
                "HTTP request failed"
            );
            map_reqwest_error(&request.url, e)
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| map_reqwest_error(&request.url, e))?;
        trace!(url = %request.url, status, bytes = body.len(), "HTTP response read");
        Ok(HttpResponse { url: request.url.clone(), status, body })
    }
}

fn map_reqwest_error(url: &str, e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout { url: url.to_string(), timeout: Duration::ZERO }
    } else {
        BackendError::Transport { url: url.to_string(), message: e.to_string() }
    }
}

/// HTTP client whose every call completes within its timeout.
#[derive(Clone)]
pub struct BoundedHttpClient {
    transport: Arc<dyn HttpTransport>,
    default_timeout: Duration,
}

impl BoundedHttpClient {
    pub fn new(transport: Arc<dyn HttpTransport>, default_timeout: Duration) -> Self {
        Self { transport, default_timeout }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Sends `request`, failing with [`BackendError::Timeout`] if no response
    /// has completed after `timeout`.
    pub async fn send(&self, request: HttpRequest, timeout: Duration) -> Result<HttpResponse, BackendError> {
        match tokio::time::timeout(timeout, self.transport.execute(&request)).await {
            Ok(Ok(response)) => {
                debug!(url = %request.url, status = response.status, "HTTP response received");
                Ok(response)
            }
            Ok(Err(BackendError::Timeout { url, .. })) => Err(BackendError::Timeout { url, timeout }),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(url = %request.url, ?timeout, "HTTP request timed out");
                Err(BackendError::Timeout { url: request.url, timeout })
            }
        }
    }

    pub async fn send_default(&self, request: HttpRequest) -> Result<HttpResponse, BackendError> {
        self.send(request, self.default_timeout).await
    }

    /// GET returning the body of a 2xx reply.
    pub async fn get_bytes(&self, url: &str) -> Result<Bytes, BackendError> {
        let response = self.send_default(HttpRequest::get(url)).await?.error_for_status()?;
        Ok(response.body)
    }

    /// GET decoding a 2xx reply as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, BackendError> {
        self.send_default(HttpRequest::get(url)).await?.error_for_status()?.json()
    }
}
