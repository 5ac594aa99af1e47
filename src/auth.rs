//! Google API access tokens.
//!
//! Every read and export call carries a bearer token. Two sources exist:
//! a pre-issued token passed in verbatim, or a service-account key that is
//! exchanged for a token through the OAuth2 JWT-bearer grant. Any failure
//! here is fatal: without a token no sheet can be read.

use crate::config::Credentials;
use crate::error::SheetcastError;
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Read-only scopes: the export endpoint lives under Drive, values under Sheets.
pub const SCOPES: &str = "https://www.googleapis.com/auth/drive.readonly \
https://www.googleapis.com/auth/spreadsheets.readonly";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Supplies bearer tokens for the Google APIs.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, SheetcastError>;
}

/// Build the token source matching the configured credentials.
pub fn token_source(
    credentials: &Credentials,
    http: reqwest::Client,
) -> Result<Arc<dyn TokenSource>, SheetcastError> {
    match credentials {
        Credentials::AccessToken(token) => Ok(Arc::new(StaticToken::new(token.clone()))),
        Credentials::ServiceAccountJson(json) => {
            let key = ServiceAccountKey::from_json(json)?;
            Ok(Arc::new(ServiceAccountTokenSource::new(key, http)?))
        }
    }
}

/// A token issued elsewhere, used as-is.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, SheetcastError> {
        if self.0.trim().is_empty() {
            return Err(SheetcastError::Credentials("access token is empty".into()));
        }
        Ok(self.0.clone())
    }
}

/// The fields of a service-account key file that the exchange needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccountKey {
    /// Parse a key file's JSON contents.
    pub fn from_json(json: &str) -> Result<Self, SheetcastError> {
        let key: ServiceAccountKey = serde_json::from_str(json)
            .map_err(|e| SheetcastError::Credentials(format!("service account JSON: {e}")))?;
        if key.client_email.is_empty() || key.private_key.is_empty() {
            return Err(SheetcastError::Credentials(
                "service account JSON lacks client_email or private_key".into(),
            ));
        }
        Ok(key)
    }

    fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Exchanges a signed JWT assertion for an access token and caches it
/// until shortly before it expires.
pub struct ServiceAccountTokenSource {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> Result<Self, SheetcastError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| SheetcastError::Credentials(format!("private key: {e}")))?;
        Ok(Self {
            key,
            signing_key,
            http,
            cached: Mutex::new(None),
        })
    }

    fn assertion(&self) -> Result<String, SheetcastError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| SheetcastError::Internal(format!("system clock: {e}")))?
            .as_secs();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPES,
            aud: self.key.token_uri(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| SheetcastError::Credentials(format!("signing assertion: {e}")))
    }

    async fn exchange(&self) -> Result<CachedToken, SheetcastError> {
        let assertion = self.assertion()?;
        debug!("Requesting access token for {}", self.key.client_email);

        let response = self
            .http
            .post(self.key.token_uri())
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| SheetcastError::AuthFailed {
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SheetcastError::AuthFailed {
                detail: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| SheetcastError::AuthFailed {
                    detail: format!("malformed token response: {e}"),
                })?;

        let lifetime = Duration::from_secs(parsed.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS));
        info!("Authenticated as {}", self.key.client_email);
        Ok(CachedToken {
            token: parsed.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> Result<String, SheetcastError> {
        let mut cached = self.cached.lock().await;
        if let Some(ref c) = *cached {
            if c.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(c.token.clone());
            }
        }
        let fresh = self.exchange().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}
