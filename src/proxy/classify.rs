//! Maps raw transport and HTTP failures onto [`GatewayError`].
//!
//! Everything here is pure: the dispatcher hands over what it observed and
//! gets back one member of the closed taxonomy.

use serde_json::Value;

use crate::errors::GatewayError;
use crate::proxy::upstream::TransportError;

/// What the dispatcher observed when a logical call stopped.
#[derive(Debug, Clone)]
pub enum RawFailure {
    /// The candidate never produced an HTTP response.
    Transport(TransportError),
    /// A reachable server answered with a non-2xx status.
    Status { status: u16, body: String },
    /// Every candidate was tried. `last` is the final transport error, if any.
    Exhausted { last: Option<TransportError> },
}

pub fn classify(failure: RawFailure) -> GatewayError {
    match failure {
        RawFailure::Transport(e) => GatewayError::Connection(e.to_string()),
        RawFailure::Status { status, body } => classify_status(status, &body),
        RawFailure::Exhausted { last: Some(e) } => GatewayError::Connection(e.to_string()),
        RawFailure::Exhausted { last: None } => GatewayError::UpstreamUnavailable {
            upstream: Some("no endpoint candidate produced a response".to_string()),
        },
    }
}

pub fn classify_status(status: u16, body: &str) -> GatewayError {
    let detail = extract_detail(body);
    match status {
        401 => GatewayError::AuthenticationFailure { upstream: detail },
        403 => GatewayError::PermissionDenied { upstream: detail },
        404 => GatewayError::NotFound { upstream: detail },
        400 => GatewayError::Validation(
            detail.unwrap_or_else(|| "The request was rejected by the API.".to_string()),
        ),
        503 => GatewayError::UpstreamUnavailable { upstream: detail },
        other => GatewayError::Unknown(match detail {
            Some(d) => format!("HTTP {}: {}", other, d),
            None => format!("HTTP {}", other),
        }),
    }
}

/// Pull a human-readable reason out of an upstream error body.
///
/// Looks at `detail` first (a string, or a list of `{loc, msg}` objects),
/// then `error` and `message`. Non-JSON bodies are returned trimmed.
pub fn extract_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => return Some(truncate(trimmed, 512)),
    };

    for key in ["detail", "error", "message"] {
        if let Some(found) = value.get(key).and_then(detail_text) {
            return Some(found);
        }
    }

    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    }
}

fn detail_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(validation_item).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        // {"error": {"message": "..."}}
        Value::Object(map) => map.get("message").and_then(detail_text),
        _ => None,
    }
}

fn validation_item(item: &Value) -> Option<String> {
    if let Some(s) = item.as_str() {
        return Some(s.to_string());
    }
    let msg = item.get("msg").and_then(Value::as_str)?;
    let loc = item
        .get("loc")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p.as_str() != Some("body"))
                .map(|p| match p {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(".")
        })
        .filter(|l| !l.is_empty());

    Some(match loc {
        Some(l) => format!("{}: {}", l, msg),
        None => msg.to_string(),
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
