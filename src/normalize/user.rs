use serde_json::{Map, Value};

use super::{
    as_object, backfill_timestamps, bool_or, ensure_id, id_to_upstream, lowercase_enum,
    optional_string, parse_timestamp, put_opt, require_id, shape_body, string_list,
    string_or_default, timestamp_to_upstream, Normalize, NormalizeError,
};
use crate::models::{User, UserSummary};

const ENTITY: &str = "user";

pub fn from_upstream(raw: &Value) -> Result<User, NormalizeError> {
    let obj = as_object(raw, ENTITY);
    let id = require_id(obj, ENTITY, "id")?;
    let (created_at, updated_at) = backfill_timestamps(obj);

    Ok(User {
        id,
        username: string_or_default(obj.get("username")),
        email: optional_string(obj.get("email")),
        role: lowercase_enum(obj.get("role"), "user"),
        is_active: bool_or(obj.get("is_active"), true),
        full_name: optional_string(obj.get("full_name")),
        company: optional_string(obj.get("company")),
        bio: optional_string(obj.get("bio")),
        avatar_url: optional_string(obj.get("avatar_url")),
        specialities: string_list(obj.get("specialities")),
        last_login: parse_timestamp(obj.get("last_login")),
        created_at,
        updated_at,
    })
}

pub fn many_from_upstream(raw: &Value) -> Result<Vec<User>, NormalizeError> {
    Vec::<User>::from_upstream(raw)
}

pub fn to_upstream(user: &User) -> Value {
    let mut obj = Map::new();
    obj.insert("id".into(), id_to_upstream(&user.id));
    obj.insert("username".into(), Value::String(user.username.clone()));
    put_opt(&mut obj, "email", user.email.clone().map(Value::String));
    obj.insert("role".into(), Value::String(user.role.clone()));
    obj.insert("is_active".into(), Value::Bool(user.is_active));
    put_opt(&mut obj, "full_name", user.full_name.clone().map(Value::String));
    put_opt(&mut obj, "company", user.company.clone().map(Value::String));
    put_opt(&mut obj, "bio", user.bio.clone().map(Value::String));
    put_opt(&mut obj, "avatar_url", user.avatar_url.clone().map(Value::String));
    obj.insert(
        "specialities".into(),
        Value::Array(user.specialities.iter().cloned().map(Value::String).collect()),
    );
    put_opt(&mut obj, "last_login", user.last_login.as_ref().map(timestamp_to_upstream));
    obj.insert("created_at".into(), timestamp_to_upstream(&user.created_at));
    obj.insert("updated_at".into(), timestamp_to_upstream(&user.updated_at));
    Value::Object(obj)
}

/// Shape a create/update body (possibly partial) for upstream.
pub fn body_to_upstream(body: Value) -> Value {
    shape_body(body, &["id"], &[])
}

pub fn summary_from_upstream(raw: &Value) -> Option<UserSummary> {
    let obj = raw.as_object()?;
    let id = ensure_id(obj.get("id"))?;
    Some(UserSummary {
        id,
        username: optional_string(obj.get("username")),
        email: optional_string(obj.get("email")),
    })
}

pub fn summary_to_upstream(summary: &UserSummary) -> Value {
    let mut obj = Map::new();
    obj.insert("id".into(), id_to_upstream(&summary.id));
    put_opt(&mut obj, "username", summary.username.clone().map(Value::String));
    put_opt(&mut obj, "email", summary.email.clone().map(Value::String));
    Value::Object(obj)
}

impl Normalize for User {
    fn from_upstream(raw: &Value) -> Result<Self, NormalizeError> {
        from_upstream(raw)
    }

    fn to_upstream(&self) -> Value {
        to_upstream(self)
    }
}
