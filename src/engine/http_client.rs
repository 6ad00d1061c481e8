use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::time::{Duration, Instant};

use crate::stats::RequestTimings;
use crate::workload::http::{Body, HttpRequest, HttpResponse, Method};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HttpError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Outbound HTTP used by workloads. Tests substitute in-process responders.
#[async_trait]
pub trait HttpCollaborator: Send + Sync + 'static {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Default request timeout, as in k6.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct ReqwestCollaborator {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestCollaborator {
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Client with a per-request timeout and keep-alive pooling.
    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("volley/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HttpError::InvalidRequest(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    fn build(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(self.timeout);
        for (k, v) in &request.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        match &request.body {
            Body::Empty => builder,
            Body::Form(fields) => builder.form(fields),
        }
    }
}

/// Approximate wire size of the request line, headers and body.
fn request_size(request: &HttpRequest) -> usize {
    let body = match &request.body {
        Body::Empty => 0,
        Body::Form(fields) => fields.iter().map(|(k, v)| k.len() + v.len() + 2).sum(),
    };
    let mut size = body + request.method.as_str().len() + 1 + request.url.len() + 11;
    for (k, v) in &request.headers {
        size += k.len() + 2 + v.len() + 2;
    }
    size + 2
}

#[async_trait]
impl HttpCollaborator for ReqwestCollaborator {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let request_start = Instant::now();
        let response = self.build(request).send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout(self.timeout)
            } else if e.is_builder() {
                HttpError::InvalidRequest(e.to_string())
            } else {
                HttpError::Transport(e.to_string())
            }
        })?;
        let headers_received = Instant::now();

        let status = response.status().as_u16();
        let mut headers = HashMap::with_capacity(response.headers().len());
        let mut header_size = 15;
        for (name, value) in response.headers() {
            header_size += name.as_str().len() + 2 + value.len() + 2;
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_string(), v.to_string());
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        let receive_end = Instant::now();

        let timings = RequestTimings {
            waiting: headers_received.duration_since(request_start),
            receiving: receive_end.duration_since(headers_received),
            duration: receive_end.duration_since(request_start),
            response_size: header_size + 2 + body.len(),
            request_size: request_size(request),
        };

        Ok(HttpResponse {
            status,
            body,
            headers,
            timings,
            error: None,
        })
    }
}
