use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::Client as HttpClient;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::mock::MockEndpoint;
use crate::types::GenerateRequest;
use tidings_core::{EndpointConfig, Error, Result};

/// Streamed body of an accepted request
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// A text-generation endpoint
#[async_trait::async_trait]
pub trait Endpoint: Send + Sync {
    /// Send one request.
    ///
    /// Returns the streamed body of a 2xx answer, or [`Error::Rejected`] for any other status.
    async fn send(&self, request: &GenerateRequest) -> Result<ByteStream>;

    /// Human-readable target, used in logs and status output
    fn describe(&self) -> String;
}

/// Endpoint reached with a JSON POST over HTTP
pub struct HttpEndpoint {
    client: HttpClient,
    url: String,
}

impl HttpEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: HttpClient::new(), url: url.into() }
    }

    /// Build an endpoint whose connection attempts give up after `timeout`
    pub fn with_connect_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = HttpClient::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl Endpoint for HttpEndpoint {
    async fn send(&self, request: &GenerateRequest) -> Result<ByteStream> {
        tracing::debug!(url = %self.url, restart = request.is_restart(), "sending generate request");

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %self.url, status = status.as_u16(), "generate request rejected");
            return Err(Error::Rejected { status: status.as_u16() });
        }

        tracing::debug!(status = status.as_u16(), "generate request accepted");
        let body = response.bytes_stream().map(|chunk| chunk.map_err(std::io::Error::other));
        Ok(Box::pin(body))
    }

    fn describe(&self) -> String {
        format!("http {}", self.url)
    }
}

/// Factory to create endpoints from config
pub struct EndpointFactory;

impl EndpointFactory {
    /// Relative mock response files are resolved against `base_dir`
    pub fn create_from_config(config: &EndpointConfig, base_dir: &Path) -> Result<Arc<dyn Endpoint>> {
        match config {
            EndpointConfig::Http { url, connect_timeout_secs: None } => Ok(Arc::new(HttpEndpoint::new(url.clone()))),
            EndpointConfig::Http { url, connect_timeout_secs: Some(secs) } => Ok(Arc::new(
                HttpEndpoint::with_connect_timeout(url.clone(), Duration::from_secs(*secs))?,
            )),
            EndpointConfig::Mock { responses_file: None } => Ok(Arc::new(MockEndpoint::default())),
            EndpointConfig::Mock { responses_file: Some(path) } => {
                let path = if path.is_absolute() { path.clone() } else { base_dir.join(path) };
                Ok(Arc::new(MockEndpoint::from_file(&path)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_endpoint_creation() {
        let endpoint = HttpEndpoint::new("http://127.0.0.1:5000/generate");
        assert_eq!(endpoint.url(), "http://127.0.0.1:5000/generate");
        assert_eq!(endpoint.describe(), "http http://127.0.0.1:5000/generate");
    }

    #[test]
    fn test_http_endpoint_with_timeout() {
        let endpoint = HttpEndpoint::with_connect_timeout("http://localhost/generate", Duration::from_secs(5)).unwrap();
        assert_eq!(endpoint.url(), "http://localhost/generate");
    }

    #[test]
    fn test_factory_http() {
        let config = EndpointConfig::Http { url: "http://localhost:5000/generate".to_string(), connect_timeout_secs: Some(3) };
        let endpoint = EndpointFactory::create_from_config(&config, Path::new(".")).unwrap();
        assert_eq!(endpoint.describe(), "http http://localhost:5000/generate");
    }

    #[test]
    fn test_factory_mock_without_file() {
        let config = EndpointConfig::Mock { responses_file: None };
        let endpoint = EndpointFactory::create_from_config(&config, Path::new(".")).unwrap();
        assert!(endpoint.describe().starts_with("mock"));
    }

    #[test]
    fn test_factory_mock_relative_file() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("mock.toml"),
            r#"
[[responses]]
type = "events"
texts = ["Hi"]
"#,
        )
        .unwrap();

        let config = EndpointConfig::Mock { responses_file: Some("mock.toml".into()) };
        let endpoint = EndpointFactory::create_from_config(&config, temp.path()).unwrap();
        assert!(endpoint.describe().contains("1 scripted"));
    }

    #[test]
    fn test_factory_mock_missing_file() {
        let config = EndpointConfig::Mock { responses_file: Some("/nonexistent/mock.toml".into()) };
        assert!(EndpointFactory::create_from_config(&config, Path::new(".")).is_err());
    }

    #[tokio::test]
    async fn test_http_endpoint_unreachable() {
        let endpoint = HttpEndpoint::new("http://127.0.0.1:1/generate");
        let result = endpoint.send(&GenerateRequest::prompt("hi")).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
