//! Browser session handling for the HTTP surface.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::AppState;

pub const SESSION_COOKIE: &str = "token";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The session token from the `token` cookie, else from
/// `Authorization: Bearer`.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    cookie_token(headers).or_else(|| bearer_token(headers))
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .flat_map(|pair| url::form_urlencoded::parse(pair.trim().as_bytes()))
        .find(|(name, _)| name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim().to_string()).filter(|t| !t.is_empty())
}

/// Attach a [`crate::Gateway`] to the request: one acting for the caller's
/// session when a token is present, the service-account gateway otherwise.
pub async fn attach_gateway(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let mut forwarded = HeaderMap::new();
    if let Some(id) = req.headers().get(REQUEST_ID_HEADER) {
        forwarded.insert(REQUEST_ID_HEADER, id.clone());
    }

    let gateway = match session_token(req.headers()) {
        Some(token) => state.gateway.for_session(&token),
        None => {
            tracing::debug!("no session token, using service account");
            state.gateway.clone()
        }
    };

    req.extensions_mut()
        .insert(gateway.with_forwarded_headers(forwarded));
    next.run(req).await
}
