use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::credential::LoginIdentity;
use crate::errors::GatewayError;
use crate::gateway::Gateway;
use crate::middleware::session::{session_token, SESSION_COOKIE};
use crate::models::{Project, User, Vulnerability};
use crate::normalize::Normalize;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub skip: Option<u32>,
    pub limit: Option<u32>,
    pub role: Option<String>,
}

impl ListParams {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(skip) = self.skip {
            pairs.push(("skip", skip.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(role) = self.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            // Upstream expects upper-case role filters.
            pairs.push(("role", role.to_uppercase()));
        }
        pairs
    }
}

async fn list<T: Normalize>(
    gateway: &Gateway,
    resource: &str,
    params: &ListParams,
) -> Result<Json<Vec<T>>, GatewayError> {
    let pairs = params.pairs();
    let borrowed: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();
    gateway.get::<Vec<T>>(resource, &borrowed).await.map(Json)
}

/// Path ids are forwarded as URL segments, so only plain identifiers pass.
fn checked_id(id: &str) -> Result<&str, GatewayError> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(GatewayError::Validation(format!("invalid identifier `{id}`")))
    }
}

// -- Auth --

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "username")]
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, GatewayError> {
    let email = payload.email.trim().to_string();
    if email.is_empty() || payload.password.is_empty() {
        return Err(GatewayError::Validation(
            "email and password are required".to_string(),
        ));
    }

    let credential = state
        .gateway
        .login(LoginIdentity::new(email, payload.password))
        .await?;
    let claims = credential.claims();

    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        SESSION_COOKIE,
        credential.token()
    );
    if let Some(exp) = claims.and_then(|c| c.exp) {
        let max_age = (exp - chrono::Utc::now().timestamp()).max(0);
        cookie.push_str(&format!("; Max-Age={max_age}"));
    }
    if state.config.production {
        cookie.push_str("; Secure");
    }
    let cookie = HeaderValue::from_str(&cookie)
        .map_err(|_| GatewayError::Unknown("login token is not a valid cookie value".to_string()))?;

    let body = Json(json!({
        "access_token": credential.token(),
        "token_type": "bearer",
        "user_id": claims.map(|c| c.sub.clone()),
        "username": claims.and_then(|c| c.username.clone()),
        "email": claims.and_then(|c| c.email.clone()),
        "role": claims.and_then(|c| c.role.clone()),
    }));

    Ok(([(header::SET_COOKIE, cookie)], body).into_response())
}

pub async fn session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, GatewayError> {
    let token = session_token(&headers)
        .ok_or_else(|| GatewayError::authentication("no session token presented"))?;
    let claims = state.gateway.session_claims(&token)?;

    Ok(Json(json!({
        "authenticated": true,
        "verified": claims.is_some(),
        "claims": claims,
    })))
}

// -- Users --

pub async fn list_users(
    Extension(gateway): Extension<Gateway>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<User>>, GatewayError> {
    list(&gateway, "users", &params).await
}

pub async fn list_clients(
    Extension(gateway): Extension<Gateway>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<User>>, GatewayError> {
    list(&gateway, "users/clients", &params).await
}

pub async fn list_pentesters(
    Extension(gateway): Extension<Gateway>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<User>>, GatewayError> {
    list(&gateway, "users/pentesters", &params).await
}

pub async fn create_user(
    Extension(gateway): Extension<Gateway>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<User>), GatewayError> {
    let user = gateway.post::<User>("users", body).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user(
    Extension(gateway): Extension<Gateway>,
    Path(id): Path<String>,
) -> Result<Json<User>, GatewayError> {
    let id = checked_id(&id)?;
    gateway.get(&format!("users/{id}"), &[]).await.map(Json)
}

pub async fn replace_user(
    Extension(gateway): Extension<Gateway>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<User>, GatewayError> {
    let id = checked_id(&id)?;
    gateway.put(&format!("users/{id}"), body).await.map(Json)
}

pub async fn update_user(
    Extension(gateway): Extension<Gateway>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<User>, GatewayError> {
    let id = checked_id(&id)?;
    gateway.patch(&format!("users/{id}"), body).await.map(Json)
}

pub async fn delete_user(
    Extension(gateway): Extension<Gateway>,
    Path(id): Path<String>,
) -> Result<StatusCode, GatewayError> {
    let id = checked_id(&id)?;
    gateway.delete(&format!("users/{id}")).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct StatusUpdate {
    pub is_active: bool,
}

/// Activate or deactivate an account through the backend's admin endpoint.
pub async fn update_user_status(
    Extension(gateway): Extension<Gateway>,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<User>, GatewayError> {
    let id = checked_id(&id)?;
    gateway
        .put(
            &format!("admin/users/{id}"),
            json!({ "is_active": update.is_active }),
        )
        .await
        .map(Json)
}

// -- Projects --

pub async fn list_projects(
    Extension(gateway): Extension<Gateway>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Project>>, GatewayError> {
    list(&gateway, "projects", &params).await
}

pub async fn create_project(
    Extension(gateway): Extension<Gateway>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Project>), GatewayError> {
    let project = gateway.post::<Project>("projects", body).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    Extension(gateway): Extension<Gateway>,
    Path(id): Path<String>,
) -> Result<Json<Project>, GatewayError> {
    let id = checked_id(&id)?;
    gateway.get(&format!("projects/{id}"), &[]).await.map(Json)
}

pub async fn replace_project(
    Extension(gateway): Extension<Gateway>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Project>, GatewayError> {
    let id = checked_id(&id)?;
    gateway.put(&format!("projects/{id}"), body).await.map(Json)
}

pub async fn update_project(
    Extension(gateway): Extension<Gateway>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Project>, GatewayError> {
    let id = checked_id(&id)?;
    gateway.patch(&format!("projects/{id}"), body).await.map(Json)
}

pub async fn delete_project(
    Extension(gateway): Extension<Gateway>,
    Path(id): Path<String>,
) -> Result<StatusCode, GatewayError> {
    let id = checked_id(&id)?;
    gateway.delete(&format!("projects/{id}")).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_project_vulnerabilities(
    Extension(gateway): Extension<Gateway>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Vulnerability>>, GatewayError> {
    let id = checked_id(&id)?;
    list(&gateway, &format!("projects/{id}/vulnerabilities"), &params).await
}

// -- Vulnerabilities --

pub async fn list_vulnerabilities(
    Extension(gateway): Extension<Gateway>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Vulnerability>>, GatewayError> {
    list(&gateway, "vulnerabilities", &params).await
}

pub async fn recent_vulnerabilities(
    Extension(gateway): Extension<Gateway>,
) -> Result<Json<Vec<Vulnerability>>, GatewayError> {
    gateway.get("vulnerabilities/recent", &[]).await.map(Json)
}

pub async fn create_vulnerability(
    Extension(gateway): Extension<Gateway>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Vulnerability>), GatewayError> {
    let vulnerability = gateway.post::<Vulnerability>("vulnerabilities", body).await?;
    Ok((StatusCode::CREATED, Json(vulnerability)))
}

pub async fn get_vulnerability(
    Extension(gateway): Extension<Gateway>,
    Path(id): Path<String>,
) -> Result<Json<Vulnerability>, GatewayError> {
    let id = checked_id(&id)?;
    gateway.get(&format!("vulnerabilities/{id}"), &[]).await.map(Json)
}

pub async fn replace_vulnerability(
    Extension(gateway): Extension<Gateway>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Vulnerability>, GatewayError> {
    let id = checked_id(&id)?;
    gateway.put(&format!("vulnerabilities/{id}"), body).await.map(Json)
}

pub async fn update_vulnerability(
    Extension(gateway): Extension<Gateway>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Vulnerability>, GatewayError> {
    let id = checked_id(&id)?;
    gateway.patch(&format!("vulnerabilities/{id}"), body).await.map(Json)
}

pub async fn delete_vulnerability(
    Extension(gateway): Extension<Gateway>,
    Path(id): Path<String>,
) -> Result<StatusCode, GatewayError> {
    let id = checked_id(&id)?;
    gateway.delete(&format!("vulnerabilities/{id}")).await?;
    Ok(StatusCode::NO_CONTENT)
}

// -- Dashboard --

/// Aggregates are passed through as the backend computes them.
pub async fn dashboard_stats(
    Extension(gateway): Extension<Gateway>,
) -> Result<Json<Value>, GatewayError> {
    gateway.get("dashboard/stats", &[]).await.map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_id() {
        assert!(checked_id("42").is_ok());
        assert!(checked_id("44ef495d-0117-40d4-8c12-0851ee26887a").is_ok());
        assert!(checked_id("..").is_err());
        assert!(checked_id("").is_err());
        assert!(checked_id("a b").is_err());
    }

    #[test]
    fn test_list_params_forwarding() {
        let params = ListParams {
            skip: Some(0),
            limit: Some(100),
            role: Some("client".into()),
        };
        assert_eq!(
            params.pairs(),
            vec![
                ("skip", "0".to_string()),
                ("limit", "100".to_string()),
                ("role", "CLIENT".to_string())
            ]
        );
    }
}
