//! Conversions between upstream payload shapes and the canonical entities.
//!
//! `from_upstream` never fails on a missing optional field. The only hard
//! error is a missing required identifier. `to_upstream` omits unset
//! optional fields so that `from_upstream(to_upstream(x)) == x`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

pub mod project;
pub mod user;
pub mod vulnerability;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("{entity} payload is missing required identifier `{field}`")]
    MissingIdentifier {
        entity: &'static str,
        field: &'static str,
    },
}

/// A shape the dispatcher can hand a successful payload to.
pub trait Normalize: Sized {
    fn from_upstream(raw: &Value) -> Result<Self, NormalizeError>;
    fn to_upstream(&self) -> Value;
}

impl<T: Normalize> Normalize for Vec<T> {
    fn from_upstream(raw: &Value) -> Result<Self, NormalizeError> {
        match raw {
            Value::Array(items) => items.iter().map(T::from_upstream).collect(),
            Value::Null => Ok(Vec::new()),
            other => {
                tracing::warn!(
                    kind = json_kind(other),
                    "expected an array from upstream, treating as empty collection"
                );
                Ok(Vec::new())
            }
        }
    }

    fn to_upstream(&self) -> Value {
        Value::Array(self.iter().map(T::to_upstream).collect())
    }
}

/// Untyped passthrough for resources without a canonical shape.
impl Normalize for Value {
    fn from_upstream(raw: &Value) -> Result<Self, NormalizeError> {
        Ok(raw.clone())
    }

    fn to_upstream(&self) -> Value {
        self.clone()
    }
}

/// For calls whose response body is irrelevant (e.g. DELETE → 204).
impl Normalize for () {
    fn from_upstream(_raw: &Value) -> Result<Self, NormalizeError> {
        Ok(())
    }

    fn to_upstream(&self) -> Value {
        Value::Null
    }
}

/// Shape an outbound create/update body for the given resource family.
/// Families without a canonical shape pass through untouched.
pub fn body_to_upstream(family: &str, body: Value) -> Value {
    match family {
        "users" => user::body_to_upstream(body),
        "projects" => project::body_to_upstream(body),
        "vulnerabilities" => vulnerability::body_to_upstream(body),
        _ => body,
    }
}

// ── Identifiers ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdShape {
    Uuid,
    Numeric,
    Opaque,
}

pub fn id_shape(id: &str) -> IdShape {
    if Uuid::parse_str(id).is_ok() {
        IdShape::Uuid
    } else if is_canonical_integer(id) {
        IdShape::Numeric
    } else {
        IdShape::Opaque
    }
}

pub fn is_uuid(id: &str) -> bool {
    id_shape(id) == IdShape::Uuid
}

/// `"42"` is canonical, `"042"`, `"+42"` and `"4.2"` are not.
fn is_canonical_integer(s: &str) -> bool {
    s.parse::<i64>().map(|n| n.to_string() == s).unwrap_or(false)
}

/// Coerce an upstream identifier to its canonical string form.
///
/// UUIDs (hyphenated or not, any case) come out lowercase hyphenated.
/// Integral numbers become decimal strings. Empty strings count as absent.
pub fn ensure_id(v: Option<&Value>) -> Option<String> {
    let raw = match v? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        (f as i64).to_string()
                    }
                    _ => n.to_string(),
                }
            }
        }
        Value::Null => return None,
        other => {
            tracing::warn!(kind = json_kind(other), "unexpected identifier type from upstream");
            return None;
        }
    };

    if raw.is_empty() {
        return None;
    }

    Some(match Uuid::parse_str(&raw) {
        Ok(u) => u.hyphenated().to_string(),
        Err(_) => {
            if id_shape(&raw) == IdShape::Opaque {
                tracing::debug!(id = %raw, "identifier is neither a UUID nor an integer");
            }
            raw
        }
    })
}

pub fn require_id(
    obj: &Map<String, Value>,
    entity: &'static str,
    field: &'static str,
) -> Result<String, NormalizeError> {
    ensure_id(obj.get(field)).ok_or(NormalizeError::MissingIdentifier { entity, field })
}

/// Legacy integer ids go back upstream as JSON numbers; everything else
/// (UUIDs included) stays a string.
pub fn id_to_upstream(id: &str) -> Value {
    if id_shape(id) == IdShape::Numeric {
        if let Ok(n) = id.parse::<i64>() {
            return Value::from(n);
        }
    }
    Value::String(id.to_string())
}

pub fn id_list(v: Option<&Value>) -> Option<Vec<String>> {
    match v? {
        Value::Array(items) => Some(items.iter().filter_map(|i| ensure_id(Some(i))).collect()),
        _ => None,
    }
}

// ── Scalars ──────────────────────────────────────────────────

pub fn optional_string(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn string_or_default(v: Option<&Value>) -> String {
    optional_string(v).unwrap_or_default()
}

/// Lowercased enumeration value, or `default` when absent or blank.
pub fn lowercase_enum(v: Option<&Value>, default: &str) -> String {
    match optional_string(v) {
        Some(s) if !s.trim().is_empty() => s.trim().to_lowercase(),
        _ => default.to_string(),
    }
}

pub fn optional_f64(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn bool_or(v: Option<&Value>, default: bool) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().map(|i| i != 0).unwrap_or(default),
        Some(Value::String(s)) => match s.to_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => default,
        },
        _ => default,
    }
}

pub fn string_list(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| optional_string(Some(i)))
            .collect(),
        _ => Vec::new(),
    }
}

// ── Time ─────────────────────────────────────────────────────

/// Accepts RFC 3339, naive ISO datetimes (treated as UTC), plain dates and
/// unix seconds. Anything else is treated as absent.
pub fn parse_timestamp(v: Option<&Value>) -> Option<DateTime<Utc>> {
    match v? {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }
    tracing::warn!(value = %s, "unparseable timestamp from upstream");
    None
}

pub fn parse_date(v: Option<&Value>) -> Option<NaiveDate> {
    if let Some(Value::String(s)) = v {
        if let Ok(d) = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
            return Some(d);
        }
    }
    parse_timestamp(v).map(|dt| dt.date_naive())
}

pub fn timestamp_to_upstream(dt: &DateTime<Utc>) -> Value {
    Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

pub fn date_to_upstream(d: &NaiveDate) -> Value {
    Value::String(d.format("%Y-%m-%d").to_string())
}

/// `created_at` falls back to now, `updated_at` to `created_at`.
pub fn backfill_timestamps(obj: &Map<String, Value>) -> (DateTime<Utc>, DateTime<Utc>) {
    let created = parse_timestamp(obj.get("created_at")).unwrap_or_else(Utc::now);
    let updated = parse_timestamp(obj.get("updated_at")).unwrap_or(created);
    (created, updated)
}

// ── Objects ──────────────────────────────────────────────────

static EMPTY: once_cell::sync::Lazy<Map<String, Value>> = once_cell::sync::Lazy::new(Map::new);

/// Borrow the payload as an object; non-objects behave like `{}`.
pub fn as_object<'a>(raw: &'a Value, entity: &str) -> &'a Map<String, Value> {
    match raw {
        Value::Object(map) => map,
        other => {
            tracing::warn!(entity, kind = json_kind(other), "expected an object from upstream");
            &EMPTY
        }
    }
}

/// Insert only when there is something to insert.
pub fn put_opt(obj: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(v) = value {
        obj.insert(key.to_string(), v);
    }
}

/// Shape a partial request body for upstream: listed id fields get the
/// numeric/UUID treatment, display-only keys are dropped, an empty `id`
/// is removed so upstream generates one.
pub fn shape_body(mut body: Value, id_fields: &[&str], strip: &[&str]) -> Value {
    let Some(obj) = body.as_object_mut() else {
        return body;
    };

    for key in strip {
        obj.remove(*key);
    }

    if ensure_id(obj.get("id")).is_none() {
        obj.remove("id");
    }

    for field in id_fields {
        if let Some(id) = ensure_id(obj.get(*field)) {
            obj.insert(field.to_string(), id_to_upstream(&id));
        }
    }

    body
}

pub(crate) fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_shapes() {
        assert_eq!(id_shape("42"), IdShape::Numeric);
        assert_eq!(id_shape("042"), IdShape::Opaque);
        assert_eq!(id_shape("44ef495d-0117-40d4-8c12-0851ee26887a"), IdShape::Uuid);
        assert_eq!(id_shape("44ef495d011740d48c120851ee26887a"), IdShape::Uuid);
        assert_eq!(id_shape("user-1"), IdShape::Opaque);
    }

    #[test]
    fn test_ensure_id_coerces_numbers_and_uuids() {
        assert_eq!(ensure_id(Some(&json!(42))).as_deref(), Some("42"));
        assert_eq!(ensure_id(Some(&json!(42.0))).as_deref(), Some("42"));
        assert_eq!(
            ensure_id(Some(&json!("44EF495D011740D48C120851EE26887A"))).as_deref(),
            Some("44ef495d-0117-40d4-8c12-0851ee26887a")
        );
        assert_eq!(ensure_id(Some(&json!(""))), None);
        assert_eq!(ensure_id(Some(&json!(null))), None);
        assert_eq!(ensure_id(None), None);
    }

    #[test]
    fn test_id_to_upstream_only_converts_canonical_integers() {
        assert_eq!(id_to_upstream("42"), json!(42));
        assert_eq!(id_to_upstream("007"), json!("007"));
        assert_eq!(
            id_to_upstream("44ef495d-0117-40d4-8c12-0851ee26887a"),
            json!("44ef495d-0117-40d4-8c12-0851ee26887a")
        );
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let naive = parse_timestamp(Some(&json!("2024-03-01T10:20:30.123456"))).unwrap();
        assert_eq!(naive.to_rfc3339_opts(SecondsFormat::Micros, true), "2024-03-01T10:20:30.123456Z");

        let offset = parse_timestamp(Some(&json!("2024-03-01T12:20:30+02:00"))).unwrap();
        assert_eq!(offset.to_rfc3339(), "2024-03-01T10:20:30+00:00");

        let date = parse_timestamp(Some(&json!("2024-03-01"))).unwrap();
        assert_eq!(date.to_rfc3339(), "2024-03-01T00:00:00+00:00");

        assert!(parse_timestamp(Some(&json!("yesterday"))).is_none());
        assert!(parse_timestamp(Some(&json!(null))).is_none());
    }

    #[test]
    fn test_backfill_uses_created_at_then_now() {
        let obj = json!({"created_at": "2024-01-01T00:00:00Z", "updated_at": null});
        let (created, updated) = backfill_timestamps(obj.as_object().unwrap());
        assert_eq!(created, updated);

        let before = Utc::now();
        let (created, updated) = backfill_timestamps(json!({}).as_object().unwrap());
        assert!(created >= before);
        assert_eq!(created, updated);
    }

    #[test]
    fn test_lowercase_enum_defaults_on_blank() {
        assert_eq!(lowercase_enum(Some(&json!("IN_PROGRESS")), "planning"), "in_progress");
        assert_eq!(lowercase_enum(Some(&json!("  ")), "planning"), "planning");
        assert_eq!(lowercase_enum(None, "planning"), "planning");
    }

    #[test]
    fn test_vec_of_non_array_is_empty() {
        let v: Vec<Value> = Normalize::from_upstream(&json!({"unexpected": true})).unwrap();
        assert!(v.is_empty());
        let v: Vec<Value> = Normalize::from_upstream(&json!(null)).unwrap();
        assert!(v.is_empty());
    }

    #[test]
    fn test_shape_body_drops_empty_id_and_display_keys() {
        let shaped = shape_body(
            json!({"id": "", "client_id": "7", "client": {"name": "Acme"}}),
            &["client_id"],
            &["client"],
        );
        assert_eq!(shaped, json!({"client_id": 7}));
    }
}
