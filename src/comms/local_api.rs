use anyhow::{Context, Result};
use axum::{
    extract::State,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tera::Tera;
use tower_http::services::ServeDir;
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::connectors::github::{GithubClient, DEFAULT_LIMIT};
use crate::security::clock::{Clock, SystemClock};
use crate::security::token_cache::CredentialCache;
use crate::security::token_refresh::spawn_warmup;

type SharedState = Arc<AppState>;

const INDEX_TEMPLATE: &str = include_str!("../../templates/index.html");
const DASHBOARD_TEMPLATE: &str = include_str!("../../templates/dashboard.html");

#[derive(Debug, Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub auth: CredentialCache,
    pub github: GithubClient,
    pub templates: Option<Arc<Tera>>,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self> {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: Settings, clock: Arc<dyn Clock>) -> Result<Self> {
        let auth = CredentialCache::from_settings(&settings, clock)?;
        let github = GithubClient::new(&settings, auth.clone())?;

        Ok(Self {
            settings: Arc::new(settings),
            auth,
            github,
            templates: load_templates(),
        })
    }
}

fn load_templates() -> Option<Arc<Tera>> {
    let mut tera = Tera::default();
    match tera.add_raw_templates(vec![
        ("index.html", INDEX_TEMPLATE),
        ("dashboard.html", DASHBOARD_TEMPLATE),
    ]) {
        Ok(()) => {
            debug!("Loaded {} templates", tera.get_template_names().count());
            Some(Arc::new(tera))
        }
        Err(e) => {
            error!("Template parsing error: {}", e);
            None
        }
    }
}

fn render(state: &AppState, name: &str, context: &tera::Context) -> Html<String> {
    let Some(templates) = &state.templates else {
        return Html(fallback_page(&state.settings, "Templates not loaded"));
    };
    match templates.render(name, context) {
        Ok(html) => Html(html),
        Err(e) => {
            error!("Template render error: {}", e);
            Html(fallback_page(&state.settings, "Error rendering template"))
        }
    }
}

fn fallback_page(settings: &Settings, message: &str) -> String {
    format!(
        "<html><body><h1>{}</h1><p>{}</p></body></html>",
        tera::escape_html(&settings.profile.student_name),
        message
    )
}

fn base_context(settings: &Settings) -> tera::Context {
    let mut context = tera::Context::new();
    context.insert("student_name", &settings.profile.student_name);
    context.insert("github_username", &settings.profile.github_username);
    context.insert("github_repo", &settings.profile.github_repo);
    context.insert("bio", &settings.profile.bio);
    context.insert("linkedin_url", &settings.profile.linkedin_url);
    context.insert("website_url", &settings.profile.website_url);
    context.insert("app_version", &settings.deployment.app_version);
    context.insert("environment", &settings.deployment.environment);
    context
}

// Landing page
async fn home(State(state): State<SharedState>) -> impl IntoResponse {
    let profile = state.github.user_profile().await;

    let mut context = base_context(&state.settings);
    context.insert("profile", &profile);
    render(&state, "index.html", &context)
}

// Pipeline dashboard
async fn dashboard(State(state): State<SharedState>) -> impl IntoResponse {
    let (profile, commits, workflow_runs, packages) = tokio::join!(
        state.github.user_profile(),
        state.github.recent_commits(DEFAULT_LIMIT),
        state.github.workflow_runs(DEFAULT_LIMIT),
        state.github.packages(),
    );
    let status = state.auth.status().await;
    let deployment = &state.settings.deployment;

    let mut context = base_context(&state.settings);
    context.insert("pod_name", &deployment.pod_name);
    context.insert("pod_namespace", &deployment.pod_namespace);
    context.insert("pod_ip", &deployment.pod_ip);
    context.insert("node_name", &deployment.node_name);
    context.insert("profile", &profile);
    context.insert("commits", &commits);
    context.insert("workflow_runs", &workflow_runs);
    context.insert("packages", &packages);
    context.insert(
        "integrations",
        &json!({
            "vault": {"status": status.vault, "error": status.vault_error},
            "github": {"status": status.github, "error": status.github_error},
        }),
    );
    render(&state, "dashboard.html", &context)
}

// Integration status for CI checks; always 200.
async fn api_status(State(state): State<SharedState>) -> impl IntoResponse {
    let settings = &state.settings;
    let deployment = &settings.deployment;
    let status = state.auth.status().await;

    Json(json!({
        "status": "healthy",
        "version": deployment.app_version,
        "environment": deployment.environment,
        "student": {
            "name": settings.profile.student_name,
            "github_username": settings.profile.github_username,
        },
        "deployment": {
            "pod_name": deployment.pod_name,
            "pod_namespace": deployment.pod_namespace,
            "pod_ip": deployment.pod_ip,
            "node_name": deployment.node_name,
            "hostname": deployment.hostname,
        },
        "integrations": {
            "vault": status.vault,
            "github_api": status.github,
        },
        "integration_errors": {
            "vault": status.vault_error,
            "github_api": status.github_error,
        },
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

// Liveness probe; never touches Vault or GitHub.
async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": state.settings.deployment.app_version,
    }))
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/dashboard", get(dashboard))
        .route("/api/status", get(api_status))
        .route("/health", get(health))
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
}

pub async fn serve(settings: Settings, port: u16) -> Result<()> {
    let state = Arc::new(AppState::new(settings)?);

    // Not awaited: readiness must not depend on Vault or GitHub.
    spawn_warmup(state.auth.clone());

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).into_future().await?;
    Ok(())
}
