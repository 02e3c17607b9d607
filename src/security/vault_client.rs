use anyhow::Context;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::VaultSettings;
use crate::utils::text::truncate_chars;

/// Why GitHub App credentials could not be read from Vault.
#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("Vault not configured: {0}")]
    NotConfigured(String),

    #[error("Vault authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Vault unreachable: {0}")]
    BackendUnreachable(String),

    #[error("Incomplete Vault secret (need app_id, private_key, installation_id): {0}")]
    IncompleteSecret(String),
}

/// GitHub App identity read from Vault.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub app_id: String,
    /// PEM-encoded RSA private key.
    pub private_key: String,
    pub installation_id: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("app_id", &self.app_id)
            .field("private_key", &"<redacted>")
            .field("installation_id", &self.installation_id)
            .finish()
    }
}

/// Vault KV v2 read envelope: `{"data":{"data":{...}}}`.
#[derive(Debug, Deserialize)]
struct VaultKvResponse {
    data: VaultKvData,
}

#[derive(Debug, Deserialize)]
struct VaultKvData {
    data: HashMap<String, Value>,
}

/// Read-only Vault client for the GitHub App secret.
#[derive(Debug, Clone)]
pub struct VaultClient {
    base_url: String,
    token: String,
    secret_path: String,
    http_client: Client,
}

impl VaultClient {
    pub fn new(settings: &VaultSettings) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("creating HTTP client")?;

        debug!(
            base_url = %settings.address,
            secret_path = %settings.secret_path,
            "Vault client initialized"
        );

        Ok(VaultClient {
            base_url: settings.address.clone(),
            token: settings.token.clone(),
            secret_path: settings.secret_path.clone(),
            http_client,
        })
    }

    /// Read the GitHub App credential. One attempt, no retries.
    ///
    /// Checks the token first (`GET /v1/auth/token/lookup-self`), then reads
    /// `GET {base_url}/v1/{secret_path}`.
    pub async fn load(&self) -> Result<Credential, SecretStoreError> {
        if self.base_url.is_empty() {
            return Err(SecretStoreError::NotConfigured("VAULT_ADDR not set".into()));
        }
        if self.token.is_empty() {
            return Err(SecretStoreError::NotConfigured("VAULT_TOKEN not set".into()));
        }

        self.check_authenticated().await?;

        let url = format!("{}/v1/{}", self.base_url, self.secret_path);
        debug!("Fetching GitHub App secret from Vault: {}", url);

        let response = self
            .http_client
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| SecretStoreError::BackendUnreachable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SecretStoreError::BackendUnreachable(e.to_string()))?;

        if !status.is_success() {
            return Err(status_error("secret read", status, &body));
        }

        let credential = parse_secret(&body)?;
        info!(
            app_id = %credential.app_id,
            installation_id = %credential.installation_id,
            "Loaded GitHub App credentials from Vault"
        );
        Ok(credential)
    }

    async fn check_authenticated(&self) -> Result<(), SecretStoreError> {
        let url = format!("{}/v1/auth/token/lookup-self", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| SecretStoreError::BackendUnreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error("token lookup", status, &body))
    }
}

fn status_error(op: &str, status: StatusCode, body: &str) -> SecretStoreError {
    let detail = format!("{} returned {}: {}", op, status, truncate_chars(body, 200));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SecretStoreError::AuthenticationFailed(detail)
        }
        // Vault answered, there is just nothing stored at that path.
        StatusCode::NOT_FOUND => SecretStoreError::IncompleteSecret(format!(
            "{op} returned {status}: nothing stored at this path"
        )),
        _ => SecretStoreError::BackendUnreachable(detail),
    }
}

/// Extract the three required fields. Never returns a partial credential.
fn parse_secret(body: &str) -> Result<Credential, SecretStoreError> {
    let resp: VaultKvResponse = serde_json::from_str(body).map_err(|e| {
        SecretStoreError::IncompleteSecret(format!("unexpected secret payload: {e}"))
    })?;
    let data = resp.data.data;
    let field = |name: &str| data.get(name).and_then(field_as_string);

    match (field("app_id"), field("private_key"), field("installation_id")) {
        (Some(app_id), Some(private_key), Some(installation_id)) => Ok(Credential {
            app_id,
            private_key,
            installation_id,
        }),
        (app_id, private_key, installation_id) => {
            let missing: Vec<&str> = [
                ("app_id", app_id.is_none()),
                ("private_key", private_key.is_none()),
                ("installation_id", installation_id.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, absent)| absent.then_some(name))
            .collect();
            Err(SecretStoreError::IncompleteSecret(format!(
                "missing {}",
                missing.join(", ")
            )))
        }
    }
}

// Identifiers are sometimes stored as numbers.
fn field_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
