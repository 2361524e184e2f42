pub mod config;
pub mod confirm;
pub mod error;
pub mod logging;
pub mod transcript;

pub use config::{Config, ConfigError, EndpointConfig, FileLoggingConfig, LoggingConfig, Profile};
pub use confirm::{AutoConfirm, AutoDecline, RestartConfirmation};
pub use error::{Error, Result};
pub use transcript::{Message, MessageId, RESTART_NOTICE, Role, Transcript};
