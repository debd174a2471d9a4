//! Transport capability used by every loading strategy.

mod http;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StrategyError;

pub use http::HttpTransport;

/// A single GET request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Absolute URL
    pub url: String,
    /// `Accept` header value
    pub accept: Option<String>,
    /// Extra request headers
    pub headers: Vec<(String, String)>,
    /// Deadline for the whole exchange, body included
    pub timeout: Duration,
}

impl FetchRequest {
    /// Create a request with no `Accept` header
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            accept: None,
            headers: Vec::new(),
            timeout,
        }
    }

    /// Set the `Accept` header
    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    /// Add a request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Response with a fully read body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,
    /// `Content-Type` header, if present
    pub content_type: Option<String>,
    /// Response body
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Whether the status is 2xx
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Turn a non-2xx response into an error
    pub fn error_for_status(self) -> Result<Self, StrategyError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(StrategyError::Http {
                status: self.status,
            })
        }
    }
}

/// Request/response fetch with header control, timeout and a binary body.
///
/// Any HTTP status is a successful fetch; only transport problems are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the request and read the whole body
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, StrategyError>;
}
