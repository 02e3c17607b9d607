use anyhow::{Context, Result};
use std::time::Duration;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_VAULT_ADDR: &str = "http://vault.default:8200";
pub const DEFAULT_VAULT_SECRET_PATH: &str = "secret/data/github-app";
pub const DEFAULT_PORT: u16 = 5000;

/// Identity shown on the portfolio pages.
#[derive(Debug, Clone)]
pub struct Profile {
    pub student_name: String,
    pub github_username: String,
    pub github_repo: String,
    pub bio: String,
    pub linkedin_url: Option<String>,
    pub website_url: Option<String>,
}

/// Where the GitHub App credentials live.
#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub address: String,
    /// Empty token means Vault is not configured.
    pub token: String,
    /// Full KV v2 API path, e.g. `secret/data/github-app`.
    pub secret_path: String,
}

/// Deployment metadata injected by the Kubernetes Downward API.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub app_version: String,
    pub environment: String,
    pub pod_name: String,
    pub pod_namespace: String,
    pub pod_ip: String,
    pub node_name: String,
    pub hostname: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub profile: Profile,
    pub vault: VaultSettings,
    pub deployment: Deployment,
    pub github_api_url: String,
    pub api_timeout: Duration,
    pub port: u16,
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let hostname = local_hostname();

        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("parsing PORT value {raw:?}"))?,
            None => DEFAULT_PORT,
        };

        Ok(Settings {
            profile: Profile {
                student_name: or("STUDENT_NAME", "Your Name"),
                github_username: or("GITHUB_USERNAME", "your-github-username"),
                github_repo: or("GITHUB_REPO", "container-devsecops-template"),
                bio: or(
                    "BIO",
                    "DevOps engineer building secure, automated infrastructure.",
                ),
                linkedin_url: get("LINKEDIN_URL"),
                website_url: get("WEBSITE_URL"),
            },
            vault: VaultSettings {
                address: or("VAULT_ADDR", DEFAULT_VAULT_ADDR)
                    .trim_end_matches('/')
                    .to_string(),
                token: get("VAULT_TOKEN").unwrap_or_default(),
                secret_path: or("VAULT_SECRET_PATH", DEFAULT_VAULT_SECRET_PATH)
                    .trim_matches('/')
                    .to_string(),
            },
            deployment: Deployment {
                app_version: or("APP_VERSION", "local"),
                environment: or("ENVIRONMENT", "development"),
                pod_name: get("POD_NAME").unwrap_or_else(|| hostname.clone()),
                pod_namespace: or("POD_NAMESPACE", "unknown"),
                pod_ip: or("POD_IP", "unknown"),
                node_name: or("NODE_NAME", "unknown"),
                hostname,
            },
            github_api_url: or("GITHUB_API_URL", DEFAULT_GITHUB_API_URL)
                .trim_end_matches('/')
                .to_string(),
            api_timeout: Duration::from_secs(10),
            port,
        })
    }
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}
