use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, patch, post},
    Router,
};

use crate::middleware::session::attach_gateway;
use crate::AppState;

pub mod handlers;

/// Browser-facing JSON API. All routes are relative; the caller mounts
/// this under `/api`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let resources = Router::new()
        .route(
            "/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route("/users/clients", get(handlers::list_clients))
        .route("/users/pentesters", get(handlers::list_pentesters))
        .route(
            "/users/:id",
            get(handlers::get_user)
                .put(handlers::replace_user)
                .patch(handlers::update_user)
                .delete(handlers::delete_user),
        )
        .route(
            "/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/projects/:id",
            get(handlers::get_project)
                .put(handlers::replace_project)
                .patch(handlers::update_project)
                .delete(handlers::delete_project),
        )
        .route(
            "/projects/:id/vulnerabilities",
            get(handlers::list_project_vulnerabilities),
        )
        .route(
            "/vulnerabilities",
            get(handlers::list_vulnerabilities).post(handlers::create_vulnerability),
        )
        .route(
            "/vulnerabilities/recent",
            get(handlers::recent_vulnerabilities),
        )
        .route(
            "/vulnerabilities/:id",
            get(handlers::get_vulnerability)
                .put(handlers::replace_vulnerability)
                .patch(handlers::update_vulnerability)
                .delete(handlers::delete_vulnerability),
        )
        .route(
            "/admin/users/:id/status",
            patch(handlers::update_user_status),
        )
        .route("/dashboard/stats", get(handlers::dashboard_stats))
        .layer(middleware::from_fn_with_state(state, attach_gateway));

    Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/auth/session", get(handlers::session))
        .merge(resources)
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}
