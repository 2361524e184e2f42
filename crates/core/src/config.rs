use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Endpoint selection for a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EndpointConfig {
    /// Remote generation endpoint reached over HTTP
    #[serde(rename = "http")]
    Http {
        /// Full URL of the generate route
        #[serde(default = "default_endpoint_url")]
        url: String,
        /// Connect timeout in seconds (no timeout when absent)
        #[serde(default)]
        connect_timeout_secs: Option<u64>,
    },
    /// Scripted endpoint for offline use and tests
    #[serde(rename = "mock")]
    Mock {
        /// TOML file with scripted responses
        #[serde(default)]
        responses_file: Option<PathBuf>,
    },
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig::Http { url: default_endpoint_url(), connect_timeout_secs: None }
    }
}

fn default_endpoint_url() -> String {
    "http://127.0.0.1:5000/generate".to_string()
}

/// A named deployment target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    /// Profile name
    pub name: String,

    /// Where prompts are sent
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Example prompts offered while the transcript is empty
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Logging section of config.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format(), file: FileLoggingConfig::default() }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// File output for logs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileLoggingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Overrides the default log directory
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Root configuration structure for config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Default profile name
    #[serde(default = "default_profile")]
    pub default_profile: String,

    /// Named profiles
    pub profiles: HashMap<String, Profile>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_profile() -> String {
    "local".to_string()
}

impl Config {
    /// Load configuration from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).map_err(|e| crate::Error::Config(ConfigError::from(e).to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Get the default profile
    pub fn default_profile(&self) -> Result<&Profile> {
        self.profile(&self.default_profile)
    }

    /// Get a profile by name
    pub fn profile(&self, name: &str) -> Result<&Profile> {
        self.profiles
            .get(name)
            .ok_or_else(|| crate::Error::Config(ConfigError::ProfileNotFound(name.to_string()).to_string()))
    }

    /// Get all profile names, sorted
    pub fn profile_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }

    fn validate(&self) -> Result<()> {
        use crate::Error;

        if !self.profiles.contains_key(&self.default_profile) {
            return Err(Error::Config(
                ConfigError::ProfileNotFound(self.default_profile.clone()).to_string(),
            ));
        }

        for (name, profile) in &self.profiles {
            if let EndpointConfig::Http { url, connect_timeout_secs } = &profile.endpoint {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(Error::Config(
                        ConfigError::InvalidUrl { profile: name.clone(), url: url.clone() }.to_string(),
                    ));
                }

                if *connect_timeout_secs == Some(0) {
                    return Err(Error::Config(ConfigError::ZeroTimeout(name.clone()).to_string()));
                }
            }
        }

        Ok(())
    }

    /// Get example configuration (as a string)
    pub fn example() -> &'static str {
        r#"# Tidings Configuration Example

# Profile used when --profile is not given
default_profile = "local"

# Development server on this machine
[profiles.local]
name = "local"
suggestions = [
    "Who are you?",
    "Write a quicksort implementation in Python",
    "What can you do?",
    "Write a small function that calls an HTTP API",
]

[profiles.local.endpoint]
kind = "http"
url = "http://127.0.0.1:5000/generate"
# connect_timeout_secs = 10

# Shared deployment
[profiles.deploy]
name = "deploy"

[profiles.deploy.endpoint]
kind = "http"
url = "http://chat.example.internal:5000/generate"
connect_timeout_secs = 10

# Scripted responses, no network
# [profiles.offline]
# name = "offline"
# [profiles.offline.endpoint]
# kind = "mock"
# responses_file = "mock.toml"

[logging]
# Filter directive, overridden by TIDINGS_LOG / RUST_LOG
level = "warn"
# "pretty", "json" or "compact"
format = "pretty"

[logging.file]
enabled = false
# directory = "/var/log/tidings"
"#
    }
}

impl Default for Config {
    fn default() -> Self {
        Config { default_profile: default_profile(), profiles: HashMap::new(), logging: LoggingConfig::default() }
    }
}

/// Configuration-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Profile not found
    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    /// Endpoint URL is not http(s)
    #[error("invalid endpoint url for profile '{profile}': {url}")]
    InvalidUrl { profile: String, url: String },

    /// Connect timeout of zero seconds
    #[error("connect timeout must be positive for profile '{0}'")]
    ZeroTimeout(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlParse(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlParse(err.to_string())
    }
}
