use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::security::clock::Clock;
use crate::security::github_app::{AccessToken, TokenIssuer, GITHUB_ACCEPT};
use crate::security::vault_client::{Credential, VaultClient};

pub const GITHUB_API_VERSION: &str = "2022-11-28";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Connected,
    Disconnected,
}

impl Connectivity {
    pub fn from_bool(ok: bool) -> Self {
        if ok {
            Connectivity::Connected
        } else {
            Connectivity::Disconnected
        }
    }
}

/// Diagnostics snapshot for the status endpoint and dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationStatus {
    pub vault: Connectivity,
    pub vault_error: Option<String>,
    pub github: Connectivity,
    pub github_error: Option<String>,
}

#[derive(Debug, Default)]
struct AuthState {
    credential: Option<Credential>,
    token: Option<AccessToken>,
    vault_error: Option<String>,
    github_error: Option<String>,
}

/// Shared holder of the GitHub installation token.
///
/// Refresh is lazy: the first caller that finds the token missing or past its
/// effective expiry re-reads Vault and re-issues. Refreshes are serialized by
/// `refresh_lock`; callers queued behind one reuse its token instead of
/// issuing their own. The state lock is never held across network calls.
#[derive(Debug, Clone)]
pub struct CredentialCache {
    vault: VaultClient,
    issuer: TokenIssuer,
    clock: Arc<dyn Clock>,
    state: Arc<RwLock<AuthState>>,
    refresh_lock: Arc<Mutex<()>>,
}

impl CredentialCache {
    pub fn new(vault: VaultClient, issuer: TokenIssuer, clock: Arc<dyn Clock>) -> Self {
        Self {
            vault,
            issuer,
            clock,
            state: Arc::new(RwLock::new(AuthState::default())),
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_settings(settings: &Settings, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let vault = VaultClient::new(&settings.vault)?;
        let issuer = TokenIssuer::new(settings.github_api_url.clone(), clock.clone())?;
        Ok(Self::new(vault, issuer, clock))
    }

    /// True iff a token is cached and the clock is strictly before its expiry.
    pub async fn is_available(&self) -> bool {
        self.current_token().await.is_some()
    }

    /// Headers for a GitHub API call, refreshing the token first if needed.
    /// `None` when no token could be obtained.
    pub async fn auth_headers(&self) -> Option<HeaderMap> {
        if let Some(token) = self.current_token().await {
            return build_headers(&token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(token) = self.current_token().await {
            return build_headers(&token);
        }
        debug!("installation token missing or stale, re-initializing");
        let token = self.refresh().await?;
        build_headers(&token)
    }

    /// Load credentials from Vault and obtain a fresh installation token.
    /// Failures are recorded per integration, never returned.
    pub async fn initialize(&self) -> bool {
        let _guard = self.refresh_lock.lock().await;
        self.refresh().await.is_some()
    }

    pub async fn vault_error(&self) -> Option<String> {
        self.state.read().await.vault_error.clone()
    }

    pub async fn github_error(&self) -> Option<String> {
        self.state.read().await.github_error.clone()
    }

    /// Vault is connected when the most recent load succeeded; GitHub
    /// reflects live token availability.
    pub async fn status(&self) -> IntegrationStatus {
        let now = self.clock.now();
        let state = self.state.read().await;
        let github_ok = state
            .token
            .as_ref()
            .map(|t| t.is_valid_at(now))
            .unwrap_or(false);

        IntegrationStatus {
            vault: Connectivity::from_bool(
                state.credential.is_some() && state.vault_error.is_none(),
            ),
            vault_error: state.vault_error.clone(),
            github: Connectivity::from_bool(github_ok),
            github_error: state.github_error.clone(),
        }
    }

    async fn current_token(&self) -> Option<AccessToken> {
        let now = self.clock.now();
        let state = self.state.read().await;
        state.token.as_ref().filter(|t| t.is_valid_at(now)).cloned()
    }

    // Callers must hold `refresh_lock`.
    async fn refresh(&self) -> Option<AccessToken> {
        {
            let mut state = self.state.write().await;
            state.vault_error = None;
            state.github_error = None;
        }

        let credential = match self.vault.load().await {
            Ok(credential) => credential,
            Err(err) => {
                warn!(error = %err, "could not load GitHub App credentials");
                self.state.write().await.vault_error = Some(err.to_string());
                return None;
            }
        };
        self.state.write().await.credential = Some(credential.clone());

        match self.issuer.issue(&credential).await {
            Ok(token) => {
                self.state.write().await.token = Some(token.clone());
                Some(token)
            }
            Err(err) => {
                warn!(error = %err, "could not obtain GitHub installation token");
                self.state.write().await.github_error = Some(err.to_string());
                None
            }
        }
    }
}

fn build_headers(token: &AccessToken) -> Option<HeaderMap> {
    let auth = match HeaderValue::from_str(&format!("token {}", token.value())) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "installation token is not a valid header value");
            return None;
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, auth);
    headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));
    headers.insert(
        "X-GitHub-Api-Version",
        HeaderValue::from_static(GITHUB_API_VERSION),
    );
    Some(headers)
}
