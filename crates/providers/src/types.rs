use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Body of a request to the generate endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerateRequest {
    /// A normal turn: `{"prompt": "..."}`
    Prompt { prompt: String },
    /// Conversation reset: `{"restart": true}`
    Restart { restart: bool },
}

impl GenerateRequest {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self::Prompt { prompt: prompt.into() }
    }

    pub fn restart() -> Self {
        Self::Restart { restart: true }
    }

    pub fn is_restart(&self) -> bool {
        matches!(self, Self::Restart { restart: true })
    }
}

/// JSON payload of one `data:` frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StreamPayload {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Token for cancelling an in-flight request and its stream
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self { inner: CancellationToken::new() }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Resolves once [`CancelToken::cancel`] has been called
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_serialization() {
        let prompt = serde_json::to_string(&GenerateRequest::prompt("Hello")).unwrap();
        assert_eq!(prompt, r#"{"prompt":"Hello"}"#);

        let restart = serde_json::to_string(&GenerateRequest::restart()).unwrap();
        assert_eq!(restart, r#"{"restart":true}"#);
    }

    #[test]
    fn test_generate_request_is_restart() {
        assert!(GenerateRequest::restart().is_restart());
        assert!(!GenerateRequest::prompt("hi").is_restart());
    }

    #[test]
    fn test_stream_payload_fields() {
        let text: StreamPayload = serde_json::from_str(r#"{"text":"Hel"}"#).unwrap();
        assert_eq!(text.text.as_deref(), Some("Hel"));
        assert!(text.error.is_none());

        let error: StreamPayload = serde_json::from_str(r#"{"error":"boom"}"#).unwrap();
        assert_eq!(error.error.as_deref(), Some("boom"));

        let empty: StreamPayload = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, StreamPayload::default());
    }

    #[tokio::test]
    async fn test_cancel_token() {
        let cancel = CancelToken::new();
        assert!(!cancel.is_cancelled());

        let clone = cancel.clone();
        cancel.cancel();
        assert!(clone.is_cancelled());
        clone.cancelled().await;
    }
}
