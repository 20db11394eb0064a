//! HTTP transport for backend calls.
//!
//! The dispatcher talks to a [`Transport`] so tests can script responses
//! without a server. [`HttpTransport`] is the reqwest implementation: one
//! pooled client per proxy setting, a connect timeout, and a hard per-request
//! timeout capped by a global maximum. It never retries; fallback across
//! profiles is the dispatcher's job.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use npcspawn_utils::redaction::redact_error_message;

use crate::error::TransportError;

/// Default maximum HTTP timeout (5 minutes)
pub const DEFAULT_MAX_HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Default connect timeout (30 seconds)
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// One outbound POST with a JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

/// Status, headers and raw body of a completed call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl TransportResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs a single HTTP call.
///
/// Non-2xx statuses are returned as responses, not errors; only failures to
/// get any response at all are `Err`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed [`Transport`]
#[derive(Debug)]
pub struct HttpTransport {
    max_timeout: Duration,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_timeout(DEFAULT_MAX_HTTP_TIMEOUT)
    }

    /// Create a transport with a custom ceiling on per-request timeouts
    #[must_use]
    pub fn with_max_timeout(max_timeout: Duration) -> Self {
        Self {
            max_timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Pooled client for `proxy`, built on first use
    fn client_for(&self, proxy: Option<&str>) -> Result<Client, TransportError> {
        let key = proxy.map(str::to_string);
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10);
        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                TransportError::Build(format!(
                    "invalid proxy: {}",
                    redact_error_message(&e.to_string())
                ))
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Build(redact_error_message(&e.to_string())))?;

        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let effective_timeout = request.timeout.min(self.max_timeout);
        let client = self.client_for(request.proxy.as_deref())?;

        let mut builder = client
            .post(&request.url)
            .timeout(effective_timeout)
            .json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        debug!(
            proxied = request.proxy.is_some(),
            timeout_secs = effective_timeout.as_secs(),
            "Executing HTTP request"
        );

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    duration: effective_timeout,
                }
            } else if e.is_builder() {
                TransportError::Build(redact_error_message(&e.to_string()))
            } else {
                TransportError::Connect(redact_error_message(&e.to_string()))
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    duration: effective_timeout,
                }
            } else {
                TransportError::Connect(redact_error_message(&e.to_string()))
            }
        })?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
