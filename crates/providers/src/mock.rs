use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::endpoint::{ByteStream, Endpoint};
use crate::types::GenerateRequest;
use tidings_core::{Error, Result};

/// Scripted answer to one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MockResponse {
    /// One `{"text": ...}` frame per entry, then end of body
    Events { texts: Vec<String> },
    /// Raw body chunks, sent as-is
    Stream { chunks: Vec<String> },
    /// Text frames followed by an `{"error": ...}` frame
    Error { texts: Vec<String>, message: String },
    /// Text frames, then the connection drops
    Interrupted { texts: Vec<String>, message: String },
    /// Text frames, then the body never ends
    Stall { texts: Vec<String> },
    /// Non-2xx status
    Reject { status: u16 },
    /// The request never reaches the server
    Fail { message: String },
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Events { texts: vec![text.into()] }
    }

    pub fn events<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Events { texts: texts.into_iter().map(Into::into).collect() }
    }
}

/// Mock configuration from TOML file
#[derive(Debug, Deserialize)]
struct MockConfig {
    responses: Vec<MockResponse>,
}

/// Encode one text frame the way the server does
pub fn text_frame(text: &str) -> String {
    format!("data: {}\n\n", serde_json::json!({ "text": text }))
}

/// Encode one error frame the way the server does
pub fn error_frame(message: &str) -> String {
    format!("data: {}\n\n", serde_json::json!({ "error": message }))
}

/// Endpoint that answers from a script instead of the network.
///
/// Responses are handed out in order; once the script runs out every request gets a
/// short default reply. Each request is recorded for later inspection.
#[derive(Debug)]
pub struct MockEndpoint {
    responses: Vec<MockResponse>,
    current: AtomicUsize,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl Default for MockEndpoint {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MockEndpoint {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self { responses, current: AtomicUsize::new(0), requests: Mutex::new(Vec::new()) }
    }

    /// Load a script from a TOML file with a `[[responses]]` array
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read mock responses {}: {}", path.display(), e)))?;
        let config: MockConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse mock responses {}: {}", path.display(), e)))?;

        tracing::debug!(path = %path.display(), count = config.responses.len(), "loaded mock responses");
        Ok(Self::new(config.responses))
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_response(&self) -> MockResponse {
        let index = self.current.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(index)
            .cloned()
            .unwrap_or_else(|| MockResponse::text("Mock response - add [[responses]] to the mock file"))
    }
}

fn frames(texts: &[String]) -> Vec<std::io::Result<Bytes>> {
    texts.iter().map(|text| Ok(Bytes::from(text_frame(text)))).collect()
}

#[async_trait::async_trait]
impl Endpoint for MockEndpoint {
    async fn send(&self, request: &GenerateRequest) -> Result<ByteStream> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).push(request.clone());

        let body: ByteStream = match self.next_response() {
            MockResponse::Events { texts } => Box::pin(stream::iter(frames(&texts))),
            MockResponse::Stream { chunks } => {
                Box::pin(stream::iter(chunks.into_iter().map(|chunk| Ok(Bytes::from(chunk)))))
            }
            MockResponse::Error { texts, message } => {
                let mut chunks = frames(&texts);
                chunks.push(Ok(Bytes::from(error_frame(&message))));
                Box::pin(stream::iter(chunks))
            }
            MockResponse::Interrupted { texts, message } => {
                let mut chunks = frames(&texts);
                chunks.push(Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, message)));
                Box::pin(stream::iter(chunks))
            }
            MockResponse::Stall { texts } => Box::pin(stream::iter(frames(&texts)).chain(stream::pending())),
            MockResponse::Reject { status } => return Err(Error::Rejected { status }),
            MockResponse::Fail { message } => return Err(Error::Transport(message)),
        };

        Ok(body)
    }

    fn describe(&self) -> String {
        format!("mock ({} scripted responses)", self.responses.len())
    }
}
