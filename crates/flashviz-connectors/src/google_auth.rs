//! Google service-account OAuth.
//!
//! Signs an RS256 JWT assertion with the service account's key and trades it
//! at the token endpoint for a bearer token. The token is cached and
//! refreshed shortly before it expires. Credentials are passed explicitly;
//! no process-wide environment variable is consulted.

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConnectorError, Result};

pub const SHEETS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a service-account key file this crate uses.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            ConnectorError::Authentication(format!("invalid service account key: {}", e))
        })
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            ConnectorError::Authentication(format!(
                "cannot read service account key {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&text)
    }
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .field("private_key", &"***")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// Bearer-token source for one service account and scope set.
pub struct TokenSource {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scope: String,
    http: reqwest::Client,
    cached: Option<(String, Instant)>,
}

impl TokenSource {
    /// Parse the key up front so a malformed key fails at connect time.
    pub fn new(key: ServiceAccountKey, scopes: &[&str], http: reqwest::Client) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            ConnectorError::Authentication(format!("invalid service account private key: {}", e))
        })?;
        Ok(Self {
            key,
            encoding_key,
            scope: scopes.join(" "),
            http,
            cached: None,
        })
    }

    pub fn key(&self) -> &ServiceAccountKey {
        &self.key
    }

    /// A valid bearer token, fetching a new one when none is cached or the
    /// cached one is about to expire.
    pub async fn access_token(&mut self) -> Result<String> {
        if let Some((token, expires_at)) = &self.cached {
            if Instant::now() + REFRESH_MARGIN < *expires_at {
                return Ok(token.clone());
            }
        }

        debug!("Requesting access token for {}", self.key.client_email);
        let assertion = self.assertion()?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_client_error() {
                ConnectorError::Authentication(format!("token endpoint refused: {}", body))
            } else {
                ConnectorError::Unreachable(format!("token endpoint returned {}: {}", status, body))
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            ConnectorError::Authentication(format!("unexpected token response: {}", e))
        })?;
        info!("Obtained access token for {}", self.key.client_email);
        let expires_at = Instant::now() + Duration::from_secs(token.expires_in);
        self.cached = Some((token.access_token.clone(), expires_at));
        Ok(token.access_token)
    }

    fn assertion(&self) -> Result<String> {
        let iat = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.key.token_uri.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key).map_err(|e| {
            ConnectorError::Authentication(format!("failed to sign assertion: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    const PRIVATE_KEY: &str = include_str!("../tests/fixtures/rsa_pkcs8.pem");
    const PUBLIC_KEY: &str = include_str!("../tests/fixtures/rsa_public.pem");

    fn key() -> ServiceAccountKey {
        ServiceAccountKey {
            client_email: "reader@demo.iam.gserviceaccount.com".into(),
            private_key: PRIVATE_KEY.into(),
            token_uri: "https://oauth2.example.test/token".into(),
            project_id: Some("demo".into()),
        }
    }

    #[test]
    fn key_file_defaults_token_uri() {
        let json = serde_json::json!({
            "type": "service_account",
            "client_email": "a@b.iam.gserviceaccount.com",
            "private_key": "SECRETPEM",
        });
        let key = ServiceAccountKey::from_json(&json.to_string()).unwrap();
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
        assert_eq!(key.project_id, None);
        assert!(!format!("{:?}", key).contains("SECRETPEM"));
    }

    #[test]
    fn key_file_requires_email() {
        let err = ServiceAccountKey::from_json(r#"{"private_key": "x"}"#).unwrap_err();
        assert!(matches!(err, ConnectorError::Authentication(_)));
    }

    #[test]
    fn malformed_private_key_fails_early() {
        let mut bad = key();
        bad.private_key = "not a key".into();
        let err = TokenSource::new(bad, &[BIGQUERY_SCOPE], reqwest::Client::new()).err();
        assert!(matches!(err, Some(ConnectorError::Authentication(_))));
    }

    #[test]
    fn assertion_is_verifiable_rs256() {
        let source = TokenSource::new(
            key(),
            &[SHEETS_READONLY_SCOPE, DRIVE_READONLY_SCOPE],
            reqwest::Client::new(),
        )
        .unwrap();
        let jwt = source.assertion().unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["https://oauth2.example.test/token"]);
        let decoded = decode::<AssertionClaims>(
            &jwt,
            &DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();
        assert_eq!(decoded.claims.iss, "reader@demo.iam.gserviceaccount.com");
        assert_eq!(
            decoded.claims.scope,
            format!("{} {}", SHEETS_READONLY_SCOPE, DRIVE_READONLY_SCOPE)
        );
        assert_eq!(decoded.claims.exp - decoded.claims.iat, ASSERTION_LIFETIME_SECS);
    }
}
