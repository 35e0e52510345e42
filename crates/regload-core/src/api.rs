//! HTTP transport to the registry API.
//!
//! [`RegistryApi`] is the seam between the workflow and the network; the
//! production implementation is [`HttpRegistryApi`] (reqwest), tests use
//! `fakes::ScriptedRegistryApi`.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use std::time::Duration;

use crate::config::{ApiConfig, Credentials};
use crate::error::TransportError;

/// HTTP method used by a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
        }
    }
}

/// Outbound request: method, path relative to the base URL, optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Status code and raw body of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Transport used by the workflow steps.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Send one request. Non-2xx statuses are returned, not raised.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// reqwest-backed transport with the shared auth/content-type headers.
pub struct HttpRegistryApi {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpRegistryApi {
    pub fn new(api: &ApiConfig, credentials: &Credentials) -> Result<Self, TransportError> {
        let headers = common_headers(credentials)?;
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("regload/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(Duration::from_secs(api.request_timeout_secs))
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        Ok(Self {
            base_url: api.base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Headers sent with every request.
pub fn common_headers(credentials: &Credentials) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    if !credentials.auth_token.is_empty() {
        let auth = HeaderValue::from_str(&credentials.authorization_header())
            .map_err(|e| TransportError::Setup(format!("authorization header: {e}")))?;
        headers.insert(AUTHORIZATION, auth);
    }
    if !credentials.content_type.is_empty() {
        let content_type = HeaderValue::from_str(&credentials.content_type)
            .map_err(|e| TransportError::Setup(format!("content-type header: {e}")))?;
        headers.insert(CONTENT_TYPE, content_type);
    }
    Ok(headers)
}

#[async_trait]
impl RegistryApi for HttpRegistryApi {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.url(&request.path);
        let builder = match request.method {
            Method::Get => self.http_client.get(&url),
            Method::Put => self.http_client.put(&url),
            Method::Post => self.http_client.post(&url),
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}
