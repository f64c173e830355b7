use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::normalize::NormalizeError;

/// Closed set of failure classes surfaced to gateway callers.
///
/// Variants without a `detail` payload still keep whatever the upstream said
/// in `upstream`, so it can be logged without being shown to the end user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("authentication failed")]
    AuthenticationFailure { upstream: Option<String> },

    #[error("permission denied")]
    PermissionDenied { upstream: Option<String> },

    #[error("not found")]
    NotFound { upstream: Option<String> },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("upstream unavailable")]
    UpstreamUnavailable { upstream: Option<String> },

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl GatewayError {
    pub fn authentication(upstream: impl Into<String>) -> Self {
        GatewayError::AuthenticationFailure {
            upstream: Some(upstream.into()),
        }
    }

    /// Stable machine-readable code, also used as the metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::AuthenticationFailure { .. } => "authentication_failure",
            GatewayError::PermissionDenied { .. } => "permission_denied",
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::Validation(_) => "validation_error",
            GatewayError::Connection(_) => "connection_error",
            GatewayError::UpstreamUnavailable { .. } => "upstream_unavailable",
            GatewayError::Unknown(_) => "unknown_error",
        }
    }

    /// Text suitable for direct display in the UI.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::AuthenticationFailure { .. } => {
                "Your session has expired. Please sign in again.".to_string()
            }
            GatewayError::PermissionDenied { .. } => {
                "You do not have permission to perform this action.".to_string()
            }
            GatewayError::NotFound { .. } => "The requested item could not be found.".to_string(),
            GatewayError::Validation(detail) => detail.clone(),
            GatewayError::Connection(_) => {
                "Unable to connect to the API service. Check that the backend is running and reachable."
                    .to_string()
            }
            GatewayError::UpstreamUnavailable { .. } => {
                "The API service is temporarily unavailable. Please try again shortly.".to_string()
            }
            GatewayError::Unknown(_) => "An unexpected error occurred.".to_string(),
        }
    }

    /// Original upstream detail, for logging.
    pub fn upstream_detail(&self) -> Option<&str> {
        match self {
            GatewayError::AuthenticationFailure { upstream }
            | GatewayError::PermissionDenied { upstream }
            | GatewayError::NotFound { upstream }
            | GatewayError::UpstreamUnavailable { upstream } => upstream.as_deref(),
            GatewayError::Validation(detail)
            | GatewayError::Connection(detail)
            | GatewayError::Unknown(detail) => Some(detail.as_str()),
        }
    }

    /// Only an authentication failure should send the user back to the login page.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, GatewayError::AuthenticationFailure { .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AuthenticationFailure { .. } => StatusCode::UNAUTHORIZED,
            GatewayError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Connection(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            GatewayError::AuthenticationFailure { .. } => "authentication_error",
            GatewayError::PermissionDenied { .. } => "permission_error",
            GatewayError::NotFound { .. } => "not_found_error",
            GatewayError::Validation(_) => "invalid_request_error",
            GatewayError::Connection(_) | GatewayError::UpstreamUnavailable { .. } => {
                "upstream_error"
            }
            GatewayError::Unknown(_) => "internal_error",
        }
    }
}

impl From<NormalizeError> for GatewayError {
    fn from(e: NormalizeError) -> Self {
        GatewayError::Unknown(e.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            GatewayError::Unknown(detail) => {
                tracing::error!(code = self.code(), detail = %detail, "gateway call failed");
            }
            other => {
                tracing::warn!(
                    code = other.code(),
                    detail = other.upstream_detail().unwrap_or("-"),
                    "gateway call failed"
                );
            }
        }

        let body = Json(json!({
            "error": {
                "message": self.user_message(),
                "type": self.error_type(),
                "code": self.code(),
                "reauthenticate": self.requires_reauth(),
            }
        }));

        let mut response = (status, body).into_response();

        if matches!(self, GatewayError::UpstreamUnavailable { .. }) {
            response.headers_mut().insert(
                "retry-after",
                axum::http::HeaderValue::from_static("30"),
            );
        }

        response
    }
}
