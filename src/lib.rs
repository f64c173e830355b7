//! P0cit gateway: credential handling, endpoint fallback, retry policy and
//! payload normalization in front of the P0cit REST API.
//!
//! The binary in `main.rs` is a thin shell around [`router`] and the CLI.

use std::sync::Arc;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::get;
use tower_http::cors::{AllowOrigin, CorsLayer};

pub mod api;
pub mod cli;
pub mod config;
pub mod credential;
pub mod errors;
pub mod gateway;
pub mod middleware;
pub mod models;
pub mod normalize;
pub mod proxy;

pub use errors::GatewayError;
pub use gateway::Gateway;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub gateway: Gateway,
    pub config: config::Config,
}

/// The full HTTP surface: `/api/*`, health and metrics.
pub fn router(state: Arc<AppState>) -> axum::Router {
    let cors = cors_layer(&state.config.ui_origin);

    axum::Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api::api_router(state.clone()))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        middleware::metrics::encode_metrics(),
    )
}

fn cors_layer(ui_origin: &str) -> CorsLayer {
    let ui_origin = ui_origin.to_string();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            let origin = origin.to_str().unwrap_or("");
            origin == ui_origin
                || origin.starts_with("http://localhost:")
                || origin.starts_with("http://127.0.0.1:")
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        // Credentials are allowed, so headers must be listed explicitly.
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(middleware::session::REQUEST_ID_HEADER),
        ])
        .allow_credentials(true)
}

/// Middleware: makes sure every request carries an X-Request-Id, forwards it
/// upstream and echoes it on the response.
async fn request_id_middleware(
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = match req.headers().get(middleware::session::REQUEST_ID_HEADER) {
        Some(existing) => existing.clone(),
        None => {
            let generated = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string());
            match generated {
                Ok(v) => {
                    req.headers_mut()
                        .insert(middleware::session::REQUEST_ID_HEADER, v.clone());
                    v
                }
                Err(_) => return next.run(req).await,
            }
        }
    };
    let mut resp = next.run(req).await;
    resp.headers_mut()
        .insert(middleware::session::REQUEST_ID_HEADER, req_id);
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    // Responses carry user data and session cookies.
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    headers.remove(header::SERVER);

    resp
}
