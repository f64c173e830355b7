//! The browser-facing routes, driven through the full router.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use gateway::{config, router, AppState, Gateway};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_json, header as header_is, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn app_for(backend: &MockServer) -> Router {
    let vars: HashMap<&str, String> = HashMap::from([
        ("GATEWAY_SERVICE_URL", backend.uri()),
        ("GATEWAY_LOOPBACK_URL", backend.uri()),
        ("GATEWAY_TRANSPORT_RETRIES", "0".to_string()),
        ("SERVICE_ACCOUNT_EMAIL", "svc@p0cit.com".to_string()),
        ("SERVICE_ACCOUNT_PASSWORD", "svc-password".to_string()),
    ]);
    let cfg = config::from_lookup(|k: &str| vars.get(k).cloned()).unwrap();
    let gateway = Gateway::from_config(&cfg).unwrap();
    router(Arc::new(AppState {
        gateway,
        config: cfg,
    }))
}

async fn mount_service_login(backend: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "svc-token",
            "token_type": "bearer",
            "user_id": 1,
            "role": "admin"
        })))
        .expect(times)
        .mount(backend)
        .await;
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> axum::http::request::Builder {
    Request::builder().method("GET").uri(uri)
}

#[tokio::test]
async fn test_anonymous_list_uses_service_account_and_uppercases_role() {
    let backend = MockServer::start().await;
    mount_service_login(&backend, 1).await;
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .and(query_param("role", "CLIENT"))
        .and(header_is("authorization", "Bearer svc-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 5, "username": "acme", "role": "CLIENT", "created_at": "2024-03-01T10:00:00"}
        ])))
        .expect(1)
        .mount(&backend)
        .await;

    let resp = app_for(&backend)
        .oneshot(get("/api/users?role=client").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body[0]["id"], "5");
    assert_eq!(body[0]["role"], "client");
}

#[tokio::test]
async fn test_session_cookie_is_forwarded_without_service_login() {
    let backend = MockServer::start().await;
    mount_service_login(&backend, 0).await;
    Mock::given(method("GET"))
        .and(path("/api/projects/42"))
        .and(header_is("authorization", "Bearer browser-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "name": "Q3 external",
            "status": "COMPLETED"
        })))
        .expect(1)
        .mount(&backend)
        .await;

    let resp = app_for(&backend)
        .oneshot(
            get("/api/projects/42")
                .header(header::COOKIE, "token=browser-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["id"], "42");
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn test_rejected_session_asks_for_reauthentication() {
    let backend = MockServer::start().await;
    mount_service_login(&backend, 0).await;
    Mock::given(method("GET"))
        .and(path("/api/vulnerabilities"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Token expired"})))
        .expect(1)
        .mount(&backend)
        .await;

    let resp = app_for(&backend)
        .oneshot(
            get("/api/vulnerabilities")
                .header(header::AUTHORIZATION, "Bearer old-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(resp).await;
    assert_eq!(body["error"]["code"], "authentication_failure");
    assert_eq!(body["error"]["reauthenticate"], true);
}

#[tokio::test]
async fn test_login_sets_session_cookie() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "user-token",
            "token_type": "bearer",
            "user_id": 9,
            "username": "pat",
            "email": "pat@p0cit.com",
            "role": "PENTESTER"
        })))
        .expect(1)
        .mount(&backend)
        .await;

    let resp = app_for(&backend)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"email": "pat@p0cit.com", "password": "pw"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = resp.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cookie.starts_with("token=user-token;"));
    assert!(cookie.contains("HttpOnly"));
    assert!(!cookie.contains("Secure"));

    let body = json_body(resp).await;
    assert_eq!(body["user_id"], "9");
    assert_eq!(body["role"], "pentester");
}

#[tokio::test]
async fn test_login_requires_password() {
    let backend = MockServer::start().await;
    let resp = app_for(&backend)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"email": "pat@p0cit.com", "password": ""}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_path_id_is_rejected_before_upstream() {
    let backend = MockServer::start().await;
    mount_service_login(&backend, 0).await;

    let resp = app_for(&backend)
        .oneshot(get("/api/users/a..b").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_echoes_request_id_and_sets_security_headers() {
    let backend = MockServer::start().await;
    let resp = app_for(&backend)
        .oneshot(
            get("/healthz")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("x-request-id").unwrap(), "req-123");
    assert_eq!(resp.headers().get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-store");
}

#[tokio::test]
async fn test_unknown_api_route_is_not_found() {
    let backend = MockServer::start().await;
    let resp = app_for(&backend)
        .oneshot(get("/api/reports").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_recent_vulnerabilities_is_a_collection() {
    let backend = MockServer::start().await;
    mount_service_login(&backend, 1).await;
    Mock::given(method("GET"))
        .and(path("/api/vulnerabilities/recent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 31, "title": "Stored XSS", "severity": "HIGH", "project_id": 4, "project_name": "Portal"}
        ])))
        .expect(1)
        .mount(&backend)
        .await;

    let resp = app_for(&backend)
        .oneshot(get("/api/vulnerabilities/recent").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body[0]["id"], "31");
    assert_eq!(body[0]["severity"], "high");
}

#[tokio::test]
async fn test_dashboard_stats_pass_through() {
    let backend = MockServer::start().await;
    mount_service_login(&backend, 1).await;
    Mock::given(method("GET"))
        .and(path("/api/dashboard/stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_projects": 12,
            "open_vulnerabilities": 40
        })))
        .expect(1)
        .mount(&backend)
        .await;

    let resp = app_for(&backend)
        .oneshot(get("/api/dashboard/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["total_projects"], 12);
    assert_eq!(body["open_vulnerabilities"], 40);
}

#[tokio::test]
async fn test_user_status_toggle_puts_only_is_active() {
    let backend = MockServer::start().await;
    mount_service_login(&backend, 0).await;
    Mock::given(method("PUT"))
        .and(path("/api/admin/users/12"))
        .and(header_is("authorization", "Bearer admin-token"))
        .and(body_json(json!({"is_active": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 12,
            "username": "mallory",
            "role": "CLIENT",
            "is_active": false
        })))
        .expect(1)
        .mount(&backend)
        .await;

    let resp = app_for(&backend)
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri("/api/admin/users/12/status")
                .header(header::COOKIE, "token=admin-token")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-override-role", "true")
                .body(Body::from(json!({"is_active": false, "role": "admin"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["id"], "12");
    assert_eq!(body["is_active"], false);

    let requests = backend.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.headers.get("x-override-role").is_none()));
}
