//! Recorder, bundler and credential configuration.

use crate::error::ConfigError;
use crate::labels::LogLabelStyle;
use crate::logger::Logger;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Default OAuth2 token endpoint for service-account assertions.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Default Cloud Trace API root.
pub const DEFAULT_ENDPOINT: &str = "https://cloudtrace.googleapis.com";

/// Environment variable holding the project identifier.
pub const PROJECT_ENV: &str = "GOOGLE_CLOUD_PROJECT";

/// Environment variable holding the path to a service-account JSON key.
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Thresholds for the bundler.
///
/// Weights are abstract units; a translated record weighs
/// [`TRACE_WEIGHT`](crate::translate::TRACE_WEIGHT).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlerConfig {
    /// Maximum time the first pending record waits before a flush
    pub delay_threshold: Duration,
    /// Flush once this many records are pending
    pub bundle_count_threshold: usize,
    /// Flush once pending weight reaches this value
    pub bundle_weight_threshold: usize,
    /// Hard ceiling for a single bundle's weight
    pub bundle_weight_limit: usize,
    /// Ceiling for pending plus in-flight weight
    pub buffered_weight_limit: usize,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            delay_threshold: Duration::from_secs(2),
            bundle_count_threshold: 100,
            bundle_weight_threshold: 1000,
            bundle_weight_limit: 1000,
            buffered_weight_limit: 10_000,
        }
    }
}

impl BundlerConfig {
    /// Checks `buffered limit >= bundle limit >= bundle threshold` and a
    /// non-zero count threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bundle_count_threshold == 0 {
            return Err(ConfigError::InvalidBundler(
                "bundle_count_threshold must be at least 1".into(),
            ));
        }
        if self.bundle_weight_limit < self.bundle_weight_threshold {
            return Err(ConfigError::InvalidBundler(format!(
                "bundle_weight_limit ({}) is below bundle_weight_threshold ({})",
                self.bundle_weight_limit, self.bundle_weight_threshold
            )));
        }
        if self.buffered_weight_limit < self.bundle_weight_limit {
            return Err(ConfigError::InvalidBundler(format!(
                "buffered_weight_limit ({}) is below bundle_weight_limit ({})",
                self.buffered_weight_limit, self.bundle_weight_limit
            )));
        }
        Ok(())
    }

    pub fn with_delay_threshold(mut self, delay: Duration) -> Self {
        self.delay_threshold = delay;
        self
    }

    pub fn with_bundle_count_threshold(mut self, count: usize) -> Self {
        self.bundle_count_threshold = count;
        self
    }

    pub fn with_bundle_weight_threshold(mut self, weight: usize) -> Self {
        self.bundle_weight_threshold = weight;
        self
    }

    pub fn with_bundle_weight_limit(mut self, weight: usize) -> Self {
        self.bundle_weight_limit = weight;
        self
    }

    pub fn with_buffered_weight_limit(mut self, weight: usize) -> Self {
        self.buffered_weight_limit = weight;
        self
    }
}

/// Service-account credentials used to sign token assertions.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    /// PEM-encoded RSA private key
    pub private_key: Vec<u8>,
    pub private_key_id: String,
    pub token_uri: String,
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    private_key_id: String,
    token_uri: Option<String>,
}

impl Credentials {
    pub fn new(
        email: impl Into<String>,
        private_key: impl Into<Vec<u8>>,
        private_key_id: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            private_key: private_key.into(),
            private_key_id: private_key_id.into(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
        }
    }

    pub fn with_token_uri(mut self, uri: impl Into<String>) -> Self {
        self.token_uri = uri.into();
        self
    }

    /// Parses a Google service-account JSON key.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let key: ServiceAccountKey = serde_json::from_str(json)
            .map_err(|e| ConfigError::InvalidCredentials(e.to_string()))?;
        Ok(Self {
            email: key.client_email,
            private_key: key.private_key.into_bytes(),
            private_key_id: key.private_key_id,
            token_uri: key.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
        })
    }

    /// Reads and parses a service-account JSON key file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.email.is_empty() {
            return Err(ConfigError::InvalidCredentials("missing client email".into()));
        }
        if self.private_key.is_empty() {
            return Err(ConfigError::InvalidCredentials("missing private key".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("private_key", &"<redacted>")
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// Recorder construction options
#[derive(Clone)]
pub struct RecorderConfig {
    /// Cloud project that receives the traces (required)
    pub project_id: String,
    /// Needed only for the Cloud Trace sink
    pub credentials: Option<Credentials>,
    /// Defaults to [`TracingLogger`](crate::logger::TracingLogger)
    pub logger: Option<Arc<dyn Logger>>,
    pub bundler: BundlerConfig,
    pub log_label_style: LogLabelStyle,
    /// Cloud Trace API root
    pub endpoint: String,
    /// Per-request timeout of the Cloud Trace HTTP client
    pub request_timeout: Duration,
}

impl RecorderConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            credentials: None,
            logger: None,
            bundler: BundlerConfig::default(),
            log_label_style: LogLabelStyle::default(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Reads `GOOGLE_CLOUD_PROJECT` and, if set, the key file named by
    /// `GOOGLE_APPLICATION_CREDENTIALS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let project_id = std::env::var(PROJECT_ENV).unwrap_or_default();
        let mut config = Self::new(project_id);
        if let Ok(path) = std::env::var(CREDENTIALS_ENV) {
            config.credentials = Some(Credentials::from_file(path)?);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_bundler(mut self, bundler: BundlerConfig) -> Self {
        self.bundler = bundler;
        self
    }

    pub fn with_log_label_style(mut self, style: LogLabelStyle) -> Self {
        self.log_label_style = style;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Validates every option that can be checked without network access.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::InvalidProjectId);
        }
        if let Some(credentials) = &self.credentials {
            credentials.validate()?;
        }
        self.bundler.validate()
    }
}

impl fmt::Debug for RecorderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecorderConfig")
            .field("project_id", &self.project_id)
            .field("credentials", &self.credentials)
            .field("bundler", &self.bundler)
            .field("log_label_style", &self.log_label_style)
            .field("endpoint", &self.endpoint)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
