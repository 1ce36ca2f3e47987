//! Cloud Trace v1 sink.
//!
//! Uploads go to `PATCH {endpoint}/v1/projects/{project}/traces` with a
//! bearer token. Tokens come from a [`TokenSource`]; the default one signs a
//! service-account JWT assertion and exchanges it at the OAuth2 token
//! endpoint, caching the access token until shortly before it expires.

use crate::config::{Credentials, RecorderConfig};
use crate::error::{ConfigError, UploadError};
use crate::record::{Trace, Traces};
use crate::sink::TraceSink;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// OAuth2 scopes requested for the access token.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/trace.append",
    "https://www.googleapis.com/auth/trace.readonly",
    "https://www.googleapis.com/auth/cloud-platform",
];

const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Supplies bearer tokens for Cloud Trace requests.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> impl Future<Output = Result<String, UploadError>> + Send;
}

/// A fixed, pre-fetched bearer token
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<String, UploadError> {
        Ok(self.token.clone())
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Service-account token source (JWT bearer grant).
pub struct ServiceAccountTokenSource {
    email: String,
    private_key_id: String,
    token_uri: String,
    key: EncodingKey,
    client: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    /// Parses the private key up front so bad credentials fail at construction.
    pub fn new(credentials: &Credentials, client: reqwest::Client) -> Result<Self, ConfigError> {
        let key = EncodingKey::from_rsa_pem(&credentials.private_key)
            .map_err(|e| ConfigError::InvalidCredentials(e.to_string()))?;
        Ok(Self {
            email: credentials.email.clone(),
            private_key_id: credentials.private_key_id.clone(),
            token_uri: credentials.token_uri.clone(),
            key,
            client,
            cache: Mutex::new(None),
        })
    }

    fn assertion(&self) -> Result<String, UploadError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.email,
            scope: SCOPES.join(" "),
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        if !self.private_key_id.is_empty() {
            header.kid = Some(self.private_key_id.clone());
        }
        jsonwebtoken::encode(&header, &claims, &self.key).map_err(|e| UploadError::Auth(e.to_string()))
    }

    async fn fetch(&self) -> Result<CachedToken, UploadError> {
        let assertion = self.assertion()?;
        let response = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| UploadError::Auth(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Auth(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Auth(e.to_string()))?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS as u64));

        tracing::debug!(target: "cloudtrace_recorder", lifetime_secs = lifetime.as_secs(), "fetched access token");
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }
}

impl TokenSource for ServiceAccountTokenSource {
    async fn token(&self) -> Result<String, UploadError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache
            .as_ref()
            .filter(|c| c.expires_at > Instant::now() + REFRESH_MARGIN)
        {
            return Ok(cached.access_token.clone());
        }

        let fresh = self.fetch().await?;
        let token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}

/// Builds the HTTP client shared by the sink and its token source.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Uploads trace bundles through `projects.patchTraces`.
pub struct CloudTraceSink<S: TokenSource = ServiceAccountTokenSource> {
    client: reqwest::Client,
    url: String,
    tokens: S,
}

impl CloudTraceSink<ServiceAccountTokenSource> {
    /// Builds the sink from recorder options. Requires credentials.
    pub fn from_config(config: &RecorderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let credentials = config.credentials.as_ref().ok_or_else(|| {
            ConfigError::InvalidCredentials("service-account credentials are required".into())
        })?;

        let client = http_client(config.request_timeout)?;
        let tokens = ServiceAccountTokenSource::new(credentials, client.clone())?;
        Ok(Self::with_token_source(
            client,
            &config.endpoint,
            &config.project_id,
            tokens,
        ))
    }
}

impl<S: TokenSource> CloudTraceSink<S> {
    pub fn with_token_source(
        client: reqwest::Client,
        endpoint: &str,
        project_id: &str,
        tokens: S,
    ) -> Self {
        Self {
            client,
            url: format!(
                "{}/v1/projects/{}/traces",
                endpoint.trim_end_matches('/'),
                project_id
            ),
            tokens,
        }
    }

    /// Request URL used for uploads
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl<S: TokenSource> TraceSink for CloudTraceSink<S> {
    async fn upload(&self, traces: Vec<Trace>) -> Result<(), UploadError> {
        let token = self.tokens.token().await?;
        let response = self
            .client
            .patch(&self.url)
            .bearer_auth(token)
            .json(&Traces::new(traces))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(UploadError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    fn name(&self) -> &str {
        "cloud_trace"
    }
}
