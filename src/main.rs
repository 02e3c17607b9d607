use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use portfolio_dashboard::comms::local_api;
use portfolio_dashboard::config::Settings;
use portfolio_dashboard::security::{CredentialCache, SystemClock};
use portfolio_dashboard::utils;

#[derive(Parser)]
#[command(
    name = "portfolio-dashboard",
    version,
    about = "Developer portfolio with a live CI/CD pipeline dashboard"
)]
struct AppCli {
    /// Subcommands (default: serve)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Listen port (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Authenticate once against Vault and GitHub and print the result
    Check,
}

async fn run_check(settings: Settings) -> Result<()> {
    let cache = CredentialCache::from_settings(&settings, Arc::new(SystemClock))?;
    cache.initialize().await;
    let status = cache.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    if !cache.is_available().await {
        bail!("GitHub App authentication unavailable");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let args = AppCli::parse();
    let settings = Settings::from_env()?;

    match args.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            let port = port.unwrap_or(settings.port);
            info!(
                student = %settings.profile.student_name,
                version = %settings.deployment.app_version,
                port,
                "DevSecOps portfolio dashboard starting"
            );
            local_api::serve(settings, port).await?;
        }
        Commands::Check => run_check(settings).await?,
    }

    Ok(())
}
