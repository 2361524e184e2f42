use thiserror::Error;

/// Result type alias for tidings-core
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the tidings chat client
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error for file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// The endpoint answered with a non-success HTTP status
    #[error("request rejected with status {status}")]
    Rejected { status: u16 },

    /// A stream frame carried a payload that is not valid JSON
    #[error("parse error: {0}")]
    Parse(String),

    /// The stream itself reported a failure
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Connection failure while sending the request or reading the stream
    #[error("transport error: {0}")]
    Transport(String),

    /// The request was cancelled through its cancel token
    #[error("request cancelled")]
    Cancelled,

    /// Validation errors
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Text shown to the user when a submission fails.
    ///
    /// Upstream messages are surfaced verbatim; rejected requests are mapped by status.
    pub fn user_message(&self) -> String {
        match self {
            Error::Rejected { status: 401 } => "session expired, please sign in again".to_string(),
            Error::Rejected { status: 403 } => "access denied".to_string(),
            Error::Rejected { status } => format!("server error ({})", status),
            Error::Parse(_) => "malformed response from server".to_string(),
            Error::Upstream(message) => message.clone(),
            Error::Transport(message) => format!("connection failed: {}", message),
            Error::Cancelled => "request cancelled".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let io_err: Error = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));
        assert_eq!(io_err.to_string(), "I/O error: file not found");

        let config_err = Error::Config("missing profile".to_string());
        assert_eq!(config_err.to_string(), "configuration error: missing profile");

        let rejected = Error::Rejected { status: 502 };
        assert_eq!(rejected.to_string(), "request rejected with status 502");

        let parse_err = Error::Parse("expected value at line 1".to_string());
        assert_eq!(parse_err.to_string(), "parse error: expected value at line 1");

        let upstream = Error::Upstream("model overloaded".to_string());
        assert_eq!(upstream.to_string(), "upstream error: model overloaded");

        assert_eq!(Error::Cancelled.to_string(), "request cancelled");
    }

    #[test]
    fn test_user_message_status_mapping() {
        assert_eq!(
            Error::Rejected { status: 401 }.user_message(),
            "session expired, please sign in again"
        );
        assert_eq!(Error::Rejected { status: 403 }.user_message(), "access denied");
        assert_eq!(Error::Rejected { status: 500 }.user_message(), "server error (500)");
        assert!(Error::Rejected { status: 429 }.user_message().contains("429"));
    }

    #[test]
    fn test_user_message_upstream_is_verbatim() {
        let err = Error::Upstream("boom".to_string());
        assert_eq!(err.user_message(), "boom");
    }

    #[test]
    fn test_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error: Error = io_err.into();
        assert_eq!(error.to_string(), "I/O error: denied");
    }

    #[test]
    fn test_result_type_alias() {
        let ok: Result<i32> = Ok(42);
        assert!(ok.is_ok());

        let err: Result<i32> = Err(Error::Validation("bad".to_string()));
        assert!(err.is_err());
    }
}
