//! GitHub App installation token issuance.
//!
//! Flow: sign a short-lived RS256 JWT with the App's private key, present it
//! to `POST /app/installations/{id}/access_tokens`, and keep the returned
//! installation token until shortly before GitHub says it expires.

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::security::clock::Clock;
use crate::security::vault_client::Credential;
use crate::utils::text::truncate_chars;

/// `iat` is backdated to tolerate clock drift between us and GitHub.
pub const ASSERTION_BACKDATE_SECS: i64 = 60;
/// GitHub rejects App JWTs that live longer than ten minutes.
pub const ASSERTION_LIFETIME_SECS: i64 = 600;
/// Installation tokens are treated as expired this long before GitHub's expiry.
pub const REFRESH_MARGIN_SECS: i64 = 300;
/// Used when the exchange response carries no `expires_at`.
pub const FALLBACK_VALIDITY_SECS: i64 = 3300;

pub const GITHUB_ACCEPT: &str = "application/vnd.github+json";

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("failed to sign GitHub App JWT: {0}")]
    AssertionSigningFailed(String),

    #[error("GitHub API unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("GitHub token exchange failed: {status} {body}")]
    ExchangeRejected { status: u16, body: String },

    #[error("unexpected token exchange response: {0}")]
    MalformedResponse(String),
}

/// Installation access token with its conservative expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// JWT claims for GitHub App authentication.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl AppClaims {
    pub fn new(app_id: &str, now: DateTime<Utc>) -> Self {
        let now = now.timestamp();
        Self {
            iat: now - ASSERTION_BACKDATE_SECS,
            exp: now + ASSERTION_LIFETIME_SECS,
            iss: app_id.to_string(),
        }
    }
}

/// Sign the App assertion with the PEM private key (RS256).
pub fn sign_assertion(credential: &Credential, now: DateTime<Utc>) -> Result<String, IssueError> {
    let key = EncodingKey::from_rsa_pem(credential.private_key.as_bytes())
        .map_err(|e| IssueError::AssertionSigningFailed(format!("invalid private key: {e}")))?;
    let claims = AppClaims::new(&credential.app_id, now);

    encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| IssueError::AssertionSigningFailed(e.to_string()))
}

/// Expiry we act on: GitHub's `expires_at` minus the refresh margin, or
/// `issued_at` plus the fallback window when GitHub sent none.
pub fn effective_expiry(
    expires_at: Option<&str>,
    issued_at: DateTime<Utc>,
) -> Result<DateTime<Utc>, IssueError> {
    match expires_at.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => {
            let parsed = DateTime::parse_from_rfc3339(raw).map_err(|e| {
                IssueError::MalformedResponse(format!("invalid expires_at {raw:?}: {e}"))
            })?;
            Ok(parsed.with_timezone(&Utc) - Duration::seconds(REFRESH_MARGIN_SECS))
        }
        None => Ok(issued_at + Duration::seconds(FALLBACK_VALIDITY_SECS)),
    }
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<String>,
}

/// Exchanges App credentials for installation tokens.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    api_base: String,
    http_client: Client,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(api_base: impl Into<String>, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent(crate::USER_AGENT)
            .build()
            .context("creating HTTP client")?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http_client,
            clock,
        })
    }

    /// Sign an assertion and exchange it for an installation token.
    pub async fn issue(&self, credential: &Credential) -> Result<AccessToken, IssueError> {
        let issued_at = self.clock.now();
        let assertion = sign_assertion(credential, issued_at)?;

        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base, credential.installation_id
        );
        debug!(url = %url, app_id = %credential.app_id, "exchanging App JWT for installation token");

        let response = self
            .http_client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", assertion))
            .header(ACCEPT, GITHUB_ACCEPT)
            .send()
            .await
            .map_err(|e| IssueError::NetworkUnreachable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IssueError::NetworkUnreachable(e.to_string()))?;

        if status != StatusCode::CREATED {
            return Err(IssueError::ExchangeRejected {
                status: status.as_u16(),
                body: truncate_chars(&body, 200),
            });
        }

        let parsed: InstallationTokenResponse = serde_json::from_str(&body)
            .map_err(|e| IssueError::MalformedResponse(e.to_string()))?;
        if parsed.token.is_empty() {
            return Err(IssueError::MalformedResponse("empty token".into()));
        }
        let expires_at = effective_expiry(parsed.expires_at.as_deref(), issued_at)?;

        info!(
            installation_id = %credential.installation_id,
            expires_at = %expires_at,
            "obtained GitHub installation token"
        );
        Ok(AccessToken::new(parsed.token, expires_at))
    }
}
