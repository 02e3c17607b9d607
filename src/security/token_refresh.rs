use tracing::{info, warn};

use crate::security::token_cache::CredentialCache;

/// One-shot startup warm-up of the credential cache.
///
/// Detached: the server never waits on it, and requests that arrive first
/// simply refresh the cache themselves.
pub fn spawn_warmup(cache: CredentialCache) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if cache.initialize().await {
            info!("GitHub App authentication successful");
        } else {
            let vault_error = cache.vault_error().await;
            let github_error = cache.github_error().await;
            warn!(
                vault = vault_error.as_deref().unwrap_or("ok"),
                github = github_error.as_deref().unwrap_or("ok"),
                "GitHub App auth unavailable, dashboard will show static content"
            );
        }
    })
}
