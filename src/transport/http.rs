//! HTTP transport over reqwest

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};

use super::{FetchRequest, FetchResponse, Transport};
use crate::error::StrategyError;

/// Transport backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    default_headers: Vec<(String, String)>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(format!("lightbox/{}", crate::VERSION))
            .build()
            .unwrap_or_default();
        Self::with_client(client)
    }

    /// Wrap an existing client
    pub const fn with_client(client: Client) -> Self {
        Self {
            client,
            default_headers: Vec::new(),
        }
    }

    /// Send a header with every request (e.g. `Authorization` for a PACS)
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    fn map_error(error: &reqwest::Error, request: &FetchRequest) -> StrategyError {
        if error.is_timeout() {
            StrategyError::Timeout {
                after_ms: request.timeout.as_millis() as u64,
            }
        } else {
            StrategyError::Network {
                message: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, StrategyError> {
        tracing::debug!("Fetching {}", request.url);

        let mut builder = self.client.get(&request.url).timeout(request.timeout);
        if let Some(accept) = &request.accept {
            builder = builder.header(ACCEPT, accept);
        }
        for (name, value) in self.default_headers.iter().chain(&request.headers) {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::map_error(&e, &request))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = response
            .bytes()
            .await
            .map_err(|e| Self::map_error(&e, &request))?;

        Ok(FetchResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_sends_accept_and_reads_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wado"))
            .and(header("accept", "application/dicom"))
            .and(header("authorization", "Bearer t0ken"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/dicom")
                    .set_body_bytes(vec![1, 2, 3]),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new().with_header("Authorization", "Bearer t0ken");
        let response = transport
            .fetch(
                FetchRequest::get(format!("{}/wado", server.uri()), Duration::from_secs(5))
                    .accept("application/dicom"),
            )
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.body, vec![1, 2, 3]);
        assert_eq!(response.content_type.as_deref(), Some("application/dicom"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let response = HttpTransport::new()
            .fetch(FetchRequest::get(server.uri(), Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(
            response.error_for_status().unwrap_err(),
            StrategyError::Http { status: 503 }
        );
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = HttpTransport::new()
            .fetch(FetchRequest::get(server.uri(), Duration::from_millis(100)))
            .await
            .unwrap_err();

        assert_eq!(err, StrategyError::Timeout { after_ms: 100 });
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let err = HttpTransport::new()
            .fetch(FetchRequest::get("http://127.0.0.1:1/", Duration::from_secs(2)))
            .await
            .unwrap_err();

        assert!(matches!(err, StrategyError::Network { .. }));
    }
}
