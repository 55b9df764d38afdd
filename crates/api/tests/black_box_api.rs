use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde_json::{Value, json};

use bastion_api::app::routes::circuit_breaker::Upstream;
use bastion_api::app::{AppDependencies, build_app};
use bastion_auth::{TokenManager, UserRepository};
use bastion_core::UserId;
use bastion_infra::AppConfig;

const JWT_SECRET: &str = "black-box-secret";

struct TestServer {
    base_url: String,
    tokens: Arc<TokenManager>,
    users: Arc<dyn UserRepository>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(&[], |_| {}).await
    }

    async fn spawn_with(vars: &[(&str, &str)], customize: impl FnOnce(&mut AppDependencies)) -> Self {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = AppConfig::from_lookup(|var| vars.get(var).cloned()).expect("valid test config");

        // Same router as prod, in-memory stores, ephemeral port.
        let mut deps = AppDependencies::in_memory(config, JWT_SECRET.as_bytes());
        customize(&mut deps);
        let tokens = deps.tokens.clone();
        let users = deps.users.clone();
        let app = build_app(deps);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self {
            base_url,
            tokens,
            users,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn register(client: &reqwest::Client, server: &TestServer, email: &str) -> Value {
    let res = client
        .post(server.url("/auth/register"))
        .json(&json!({
            "email": email,
            "password": "correct-horse",
            "first_name": "Ada",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

struct AlwaysFails;

#[async_trait]
impl Upstream for AlwaysFails {
    async fn call(&self) -> anyhow::Result<String> {
        anyhow::bail!("connection refused")
    }
}

struct Panics;

#[async_trait]
impl Upstream for Panics {
    async fn call(&self) -> anyhow::Result<String> {
        panic!("upstream exploded")
    }
}

#[tokio::test]
async fn register_login_and_duplicate_email() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let body = register(&client, &server, "Ada@Example.com ").await;
    assert_eq!(body["user"]["email"], "ada@example.com");
    assert_eq!(body["user"]["first_name"], "Ada");
    assert!(body["user"].get("password_hash").is_none());
    assert!(body["tokens"]["access_token"].is_string());
    assert!(body["tokens"]["refresh_token"].is_string());

    let dup = client
        .post(server.url("/auth/register"))
        .json(&json!({"email": "ada@example.com", "password": "another-password"}))
        .send()
        .await
        .unwrap();
    assert_eq!(dup.status(), StatusCode::CONFLICT);
    let err: Value = dup.json().await.unwrap();
    assert_eq!(err["code"], "conflict");
    assert_eq!(err["message"], "User with this email already exists");

    let ok = client
        .post(server.url("/auth/login"))
        .json(&json!({"email": "ada@example.com", "password": "correct-horse"}))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    let wrong = client
        .post(server.url("/auth/login"))
        .json(&json!({"email": "ada@example.com", "password": "wrong-password"}))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    let err: Value = wrong.json().await.unwrap();
    assert_eq!(err["message"], "Invalid email or password");
}

#[tokio::test]
async fn register_validation_errors_are_400() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/auth/register"))
        .json(&json!({"email": "not-an-email", "password": "correct-horse"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["code"], "bad_request");
    assert_eq!(err["details"]["field"], "email");

    let res = client
        .post(server.url("/auth/register"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn profile_requires_a_live_access_token() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let body = register(&client, &server, "grace@example.com").await;
    let access = body["tokens"]["access_token"].as_str().unwrap();
    let refresh = body["tokens"]["refresh_token"].as_str().unwrap();

    let res = client.get(server.url("/api/profile")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["code"], "unauthorized");

    let res = client
        .get(server.url("/api/profile"))
        .bearer_auth(access)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let profile: Value = res.json().await.unwrap();
    assert_eq!(profile["email"], "grace@example.com");

    // A refresh token is not an access token.
    let res = client
        .get(server.url("/api/profile"))
        .bearer_auth(refresh)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let user_id: UserId = serde_json::from_value(body["user"]["id"].clone()).unwrap();
    let stale = server
        .tokens
        .generate_token_pair_at(user_id, "grace@example.com", Utc::now() - ChronoDuration::hours(2))
        .unwrap();
    let res = client
        .get(server.url("/api/profile"))
        .bearer_auth(&stale.access_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let forged = TokenManager::new(b"someone-else", server.tokens.access_ttl(), server.tokens.refresh_ttl())
        .generate_token_pair(user_id, "grace@example.com")
        .unwrap();
    let res = client
        .get(server.url("/api/profile"))
        .bearer_auth(&forged.access_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_issues_new_pair_until_user_is_deactivated() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let body = register(&client, &server, "linus@example.com").await;
    let refresh = body["tokens"]["refresh_token"].as_str().unwrap().to_string();
    let access = body["tokens"]["access_token"].as_str().unwrap().to_string();

    let res = client
        .post(server.url("/auth/refresh"))
        .json(&json!({"refresh_token": refresh}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let tokens: Value = res.json().await.unwrap();
    assert!(tokens["tokens"]["access_token"].is_string());

    let res = client
        .post(server.url("/auth/refresh"))
        .json(&json!({"refresh_token": access}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["message"], "Invalid refresh token");

    let mut user = server.users.get_by_email("linus@example.com").await.unwrap();
    user.is_active = false;
    server.users.update(&user).await.unwrap();

    let res = client
        .post(server.url("/auth/refresh"))
        .json(&json!({"refresh_token": refresh}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["message"], "User account is not active");
}

#[tokio::test]
async fn healthcheck_is_rate_limited_per_client() {
    // The global limiter would overwrite the x-ratelimit-* headers.
    let server = TestServer::spawn_with(
        &[("HEALTHCHECK_RATE_LIMIT_MAX", "2"), ("RATE_LIMIT_ENABLED", "false")],
        |_| {},
    )
    .await;
    let client = reqwest::Client::new();

    for remaining in ["1", "0"] {
        let res = client.get(server.url("/healthcheck")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-ratelimit-limit"], "2");
        assert_eq!(res.headers()["x-ratelimit-remaining"], remaining);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["status"], "Ok");
    }

    let res = client.get(server.url("/healthcheck")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = res.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["code"], "too_many_requests");

    // Other routes have their own budget.
    let res = client
        .post(server.url("/auth/login"))
        .json(&json!({"email": "nobody@example.com", "password": "whatever-pw"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn forwarded_headers_from_untrusted_peers_do_not_reset_limits() {
    let server = TestServer::spawn_with(
        &[("HEALTHCHECK_RATE_LIMIT_MAX", "2"), ("RATE_LIMIT_ENABLED", "false")],
        |_| {},
    )
    .await;
    let client = reqwest::Client::new();

    let mut statuses = Vec::new();
    for i in 0..5 {
        let res = client
            .get(server.url("/healthcheck"))
            .header("x-forwarded-for", format!("6.6.6.{i}"))
            .header("x-real-ip", format!("7.7.7.{i}"))
            .send()
            .await
            .unwrap();
        statuses.push(res.status());
    }

    assert_eq!(
        statuses,
        vec![
            StatusCode::OK,
            StatusCode::OK,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS,
        ]
    );
}

#[tokio::test]
async fn global_limit_can_be_disabled() {
    let server = TestServer::spawn_with(
        &[("RATE_LIMIT_ENABLED", "false"), ("RATE_LIMIT_MAX", "1")],
        |_| {},
    )
    .await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let res = client.get(server.url("/nope")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn breaker_opens_after_repeated_upstream_failures() {
    let server = TestServer::spawn_with(&[], |deps| deps.upstream = Arc::new(AlwaysFails)).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let res = client
            .get(server.url("/circuit-breaker-example"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        let err: Value = res.json().await.unwrap();
        assert_eq!(err["message"], "Service temporarily unavailable");
    }

    let res = client
        .get(server.url("/circuit-breaker-example"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["code"], "service_unavailable");
    assert_eq!(err["details"]["circuit_breaker"], "open");

    let metrics = client.get(server.url("/metrics")).send().await.unwrap().text().await.unwrap();
    assert!(metrics.contains("circuit_breaker_transitions_total"));
}

#[tokio::test]
async fn panics_become_internal_errors() {
    let server = TestServer::spawn_with(&[], |deps| deps.upstream = Arc::new(Panics)).await;
    let client = reqwest::Client::new();

    let res = client
        .get(server.url("/circuit-breaker-example"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(res.headers().contains_key("x-request-id"));
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["code"], "internal_server_error");
    assert_eq!(err["message"], bastion_core::INTERNAL_MESSAGE);

    // The server keeps serving.
    let res = client.get(server.url("/healthcheck")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn request_id_is_echoed_or_generated() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(server.url("/healthcheck"))
        .header("x-request-id", "trace-me-42")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "trace-me-42");

    let res = client.get(server.url("/does-not-exist")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let id = res.headers()["x-request-id"].to_str().unwrap();
    assert!(!id.is_empty());
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["message"], "Resource not found");
}

#[tokio::test]
async fn metrics_expose_request_counters() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    client.get(server.url("/healthcheck")).send().await.unwrap();

    let res = client.get(server.url("/metrics")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let text = res.text().await.unwrap();
    assert!(text.contains("http_requests_total"));
    assert!(text.contains("path=\"/healthcheck\""));
    assert!(text.ends_with("# EOF\n"));
}
