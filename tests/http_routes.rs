use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, SecondsFormat, Utc};
use http_body_util::BodyExt;
use mockito::{Matcher, Server};
use portfolio_dashboard::comms::local_api::{create_router, AppState};
use portfolio_dashboard::config::Settings;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tower::ServiceExt;

const PRIVATE_KEY: &str = include_str!("fixtures/github_app_key.pem");

fn test_settings(pairs: &[(&str, &str)]) -> Settings {
    let mut env: HashMap<String, String> = HashMap::from([
        ("STUDENT_NAME".to_string(), "Ada Lovelace".to_string()),
        ("GITHUB_USERNAME".to_string(), "ada".to_string()),
        ("GITHUB_REPO".to_string(), "portfolio".to_string()),
        ("APP_VERSION".to_string(), "abc1234".to_string()),
        ("ENVIRONMENT".to_string(), "staging".to_string()),
        ("POD_NAME".to_string(), "portfolio-0".to_string()),
        ("VAULT_ADDR".to_string(), "http://127.0.0.1:1".to_string()),
        ("GITHUB_API_URL".to_string(), "http://127.0.0.1:1".to_string()),
    ]);
    for (k, v) in pairs {
        env.insert(k.to_string(), v.to_string());
    }
    Settings::from_lookup(|key| env.get(key).cloned()).unwrap()
}

// Helper to create state and router with no Vault token configured
fn test_app(settings: Settings) -> (Arc<AppState>, Router) {
    let state = Arc::new(AppState::new(settings).unwrap());
    (state.clone(), create_router(state))
}

async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(body_bytes.to_vec()).unwrap())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_str(&body).unwrap())
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_, app) = test_app(test_settings(&[]));

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "healthy", "version": "abc1234"}));
}

#[tokio::test]
async fn test_status_before_any_auth_attempt() {
    let (_, app) = test_app(test_settings(&[]));

    let (status, body) = get_json(&app, "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], "abc1234");
    assert_eq!(body["environment"], "staging");
    assert_eq!(body["student"]["name"], "Ada Lovelace");
    assert_eq!(body["student"]["github_username"], "ada");
    assert_eq!(body["deployment"]["pod_name"], "portfolio-0");
    assert_eq!(body["deployment"]["pod_namespace"], "unknown");
    assert!(body["deployment"]["hostname"].is_string());
    assert_eq!(body["integrations"]["vault"], "disconnected");
    assert_eq!(body["integrations"]["github_api"], "disconnected");
    assert!(body["timestamp"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn test_status_reports_missing_vault_token() {
    let (state, app) = test_app(test_settings(&[]));
    assert!(!state.auth.initialize().await);

    let (status, body) = get_json(&app, "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["integrations"]["vault"], "disconnected");
    assert_eq!(
        body["integration_errors"]["vault"],
        "Vault not configured: VAULT_TOKEN not set"
    );
    assert!(body["integration_errors"]["github_api"].is_null());
}

#[tokio::test]
async fn test_status_reports_unreachable_vault() {
    let (state, app) = test_app(test_settings(&[("VAULT_TOKEN", "s.token")]));

    assert!(state.auth.auth_headers().await.is_none());

    let (status, body) = get_json(&app, "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["integrations"]["vault"], "disconnected");
    let reason = body["integration_errors"]["vault"].as_str().unwrap();
    assert!(reason.starts_with("Vault unreachable"), "{reason}");

    // Liveness is unaffected.
    let (status, _) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_home_renders_without_github() {
    let (_, app) = test_app(test_settings(&[("LINKEDIN_URL", "https://linkedin.com/in/ada")]));

    let (status, body) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Ada Lovelace"));
    assert!(body.contains("https://github.com/ada"));
    // Tera escapes interpolated slashes
    assert!(body.contains("linkedin.com&#x2F;in&#x2F;ada"));
    assert!(body.contains("LinkedIn"));
    assert!(!body.contains("Website"));
    assert!(body.contains("abc1234"));
}

#[tokio::test]
async fn test_dashboard_renders_placeholders_without_github() {
    let (_, app) = test_app(test_settings(&[]));

    let (status, body) = get(&app, "/dashboard").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("ada/portfolio"));
    assert!(body.contains("portfolio-0"));
    assert!(body.contains("No workflow data available."));
    assert!(body.contains("No commit data available."));
    assert!(body.contains("No package data available."));
    assert!(body.contains("Vault: disconnected"));
}

#[tokio::test]
async fn test_dashboard_with_live_github_data() {
    let mut vault = Server::new_async().await;
    let mut github = Server::new_async().await;

    let lookup = vault
        .mock("GET", "/v1/auth/token/lookup-self")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let secret = vault
        .mock("GET", "/v1/secret/data/github-app")
        .with_status(200)
        .expect(1)
        .with_body(
            json!({"data": {"data": {
                "app_id": 123,
                "private_key": PRIVATE_KEY,
                "installation_id": 456
            }}})
            .to_string(),
        )
        .create_async()
        .await;

    let expires = (Utc::now() + Duration::hours(1)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let exchange = github
        .mock("POST", "/app/installations/456/access_tokens")
        .with_status(201)
        .with_body(json!({"token": "ghs_live", "expires_at": expires}).to_string())
        .expect(1)
        .create_async()
        .await;
    let _profile = github
        .mock("GET", "/users/ada")
        .match_header("authorization", "token ghs_live")
        .with_status(200)
        .with_body(json!({"name": "Ada L.", "public_repos": 7, "followers": 3}).to_string())
        .create_async()
        .await;
    let commits = github
        .mock("GET", "/repos/ada/portfolio/commits")
        .match_query(Matcher::UrlEncoded("per_page".into(), "5".into()))
        .with_status(200)
        .with_body(
            json!([{
                "sha": "deadbeefcafe",
                "commit": {"message": "ship it\n\ndetails", "author": {"name": "Ada", "date": "2024-05-01"}},
                "html_url": "https://github.com/ada/portfolio/commit/deadbee"
            }])
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let _runs = github
        .mock("GET", "/repos/ada/portfolio/actions/runs")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({"workflow_runs": [{
                "id": 9, "name": "Build & Scan", "status": "completed", "conclusion": "success",
                "head_branch": "main", "head_sha": "0011223344", "created_at": "2024-05-01",
                "html_url": "https://github.com/ada/portfolio/actions/runs/9"
            }]})
            .to_string(),
        )
        .create_async()
        .await;
    let _packages = github
        .mock("GET", "/users/ada/packages")
        .match_query(Matcher::UrlEncoded("package_type".into(), "container".into()))
        .with_status(404)
        .create_async()
        .await;

    let (state, app) = test_app(test_settings(&[
        ("VAULT_ADDR", vault.url().as_str()),
        ("VAULT_TOKEN", "s.token"),
        ("GITHUB_API_URL", github.url().as_str()),
    ]));

    let (status, body) = get(&app, "/dashboard").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("deadbee"));
    assert!(body.contains("ship it"));
    assert!(!body.contains("details"));
    assert!(body.contains("Build &amp; Scan"));
    assert!(body.contains("0011223"));
    assert!(body.contains("No package data available."));
    assert!(body.contains("Vault: connected"));
    assert!(body.contains("GitHub API: connected"));
    commits.assert_async().await;
    // The four concurrent fetches of a cold page share one token refresh.
    lookup.assert_async().await;
    secret.assert_async().await;
    exchange.assert_async().await;

    let (_, status_body) = get_json(&app, "/api/status").await;
    assert_eq!(status_body["integrations"]["vault"], "connected");
    assert_eq!(status_body["integrations"]["github_api"], "connected");
    assert!(state.auth.is_available().await);
}

#[tokio::test]
async fn test_commit_timeout_degrades_to_absent_data() {
    let mut vault = Server::new_async().await;
    let mut github = Server::new_async().await;

    let _lookup = vault
        .mock("GET", "/v1/auth/token/lookup-self")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let _secret = vault
        .mock("GET", "/v1/secret/data/github-app")
        .with_status(200)
        .with_body(
            json!({"data": {"data": {
                "app_id": "123",
                "private_key": PRIVATE_KEY,
                "installation_id": "456"
            }}})
            .to_string(),
        )
        .create_async()
        .await;
    let _exchange = github
        .mock("POST", "/app/installations/456/access_tokens")
        .with_status(201)
        .with_body(json!({"token": "ghs_slow"}).to_string())
        .create_async()
        .await;
    let _commits = github
        .mock("GET", "/repos/ada/portfolio/commits")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(StdDuration::from_millis(1500));
            w.write_all(b"[]")
        })
        .create_async()
        .await;

    let mut settings = test_settings(&[
        ("VAULT_ADDR", vault.url().as_str()),
        ("VAULT_TOKEN", "s.token"),
        ("GITHUB_API_URL", github.url().as_str()),
    ]);
    settings.api_timeout = StdDuration::from_millis(200);
    let (state, app) = test_app(settings);

    assert!(state.github.recent_commits(5).await.is_none());

    let (status, body) = get(&app, "/dashboard").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("No commit data available."));
}

#[tokio::test]
async fn test_no_github_call_without_credentials() {
    let mut github = Server::new_async().await;
    let profile = github
        .mock("GET", "/users/ada")
        .with_status(200)
        .with_body("{}")
        .expect(0)
        .create_async()
        .await;

    let (state, _) = test_app(test_settings(&[("GITHUB_API_URL", github.url().as_str())]));

    assert!(state.github.user_profile().await.is_none());
    assert!(state.github.get("/users/ada", &[]).await.is_none());
    profile.assert_async().await;
}
