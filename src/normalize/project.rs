use serde_json::{Map, Value};

use super::{
    as_object, backfill_timestamps, date_to_upstream, ensure_id, id_list, id_to_upstream,
    lowercase_enum, optional_string, parse_date, put_opt, require_id, shape_body,
    string_or_default, timestamp_to_upstream, user, vulnerability, Normalize, NormalizeError,
};
use crate::models::{ClientSummary, Project, ProjectSummary};

const ENTITY: &str = "project";
const DEFAULT_STATUS: &str = "planning";

/// Keys that only exist for display and are never sent back upstream in a
/// create/update body.
const DISPLAY_ONLY: &[&str] = &["client", "pentesters", "vulnerabilities"];

pub fn from_upstream(raw: &Value) -> Result<Project, NormalizeError> {
    let obj = as_object(raw, ENTITY);
    let id = require_id(obj, ENTITY, "id")?;
    let (created_at, updated_at) = backfill_timestamps(obj);

    let client_id = ensure_id(obj.get("client_id"));
    let client = client_from_upstream(obj, client_id.as_deref());

    let pentesters: Vec<_> = match obj.get("pentesters") {
        Some(Value::Array(items)) => items.iter().filter_map(user::summary_from_upstream).collect(),
        _ => Vec::new(),
    };

    // Older payloads carry a single `pentester_id`; some only embed `pentesters`.
    let pentester_ids = id_list(obj.get("pentester_ids"))
        .or_else(|| ensure_id(obj.get("pentester_id")).map(|id| vec![id]))
        .unwrap_or_else(|| pentesters.iter().map(|p| p.id.clone()).collect());

    let vulnerabilities = match obj.get("vulnerabilities") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(vulnerability::summary_from_upstream)
            .collect(),
        _ => Vec::new(),
    };

    Ok(Project {
        id,
        name: string_or_default(obj.get("name")),
        description: optional_string(obj.get("description")),
        client_id,
        client,
        status: lowercase_enum(obj.get("status"), DEFAULT_STATUS),
        start_date: parse_date(obj.get("start_date")),
        end_date: parse_date(obj.get("end_date")),
        pentester_ids,
        pentesters,
        vulnerabilities,
        created_at,
        updated_at,
    })
}

pub fn many_from_upstream(raw: &Value) -> Result<Vec<Project>, NormalizeError> {
    Vec::<Project>::from_upstream(raw)
}

pub fn to_upstream(project: &Project) -> Value {
    let mut obj = Map::new();
    obj.insert("id".into(), id_to_upstream(&project.id));
    obj.insert("name".into(), Value::String(project.name.clone()));
    put_opt(&mut obj, "description", project.description.clone().map(Value::String));
    put_opt(&mut obj, "client_id", project.client_id.as_deref().map(id_to_upstream));
    put_opt(&mut obj, "client", project.client.as_ref().map(client_to_upstream));
    obj.insert("status".into(), Value::String(project.status.clone()));
    put_opt(&mut obj, "start_date", project.start_date.as_ref().map(date_to_upstream));
    put_opt(&mut obj, "end_date", project.end_date.as_ref().map(date_to_upstream));
    obj.insert(
        "pentester_ids".into(),
        Value::Array(project.pentester_ids.iter().map(|id| id_to_upstream(id)).collect()),
    );
    put_opt(
        &mut obj,
        "pentester_id",
        project.pentester_ids.first().map(|id| id_to_upstream(id)),
    );
    obj.insert(
        "pentesters".into(),
        Value::Array(project.pentesters.iter().map(user::summary_to_upstream).collect()),
    );
    obj.insert(
        "vulnerabilities".into(),
        Value::Array(
            project
                .vulnerabilities
                .iter()
                .map(vulnerability::summary_to_upstream)
                .collect(),
        ),
    );
    obj.insert("created_at".into(), timestamp_to_upstream(&project.created_at));
    obj.insert("updated_at".into(), timestamp_to_upstream(&project.updated_at));
    Value::Object(obj)
}

/// Shape a create/update body for upstream.
///
/// Upstream requires `pentester_id` alongside the list, so it is derived
/// from the first entry of `pentester_ids` when the caller did not set it.
pub fn body_to_upstream(body: Value) -> Value {
    let mut body = shape_body(body, &["id", "client_id", "pentester_id"], DISPLAY_ONLY);
    let Some(obj) = body.as_object_mut() else {
        return body;
    };

    if let Some(ids) = id_list(obj.get("pentester_ids")) {
        if ensure_id(obj.get("pentester_id")).is_none() {
            if let Some(first) = ids.first() {
                obj.insert("pentester_id".into(), id_to_upstream(first));
            }
        }
        obj.insert(
            "pentester_ids".into(),
            Value::Array(ids.iter().map(|id| id_to_upstream(id)).collect()),
        );
    }

    body
}

fn client_from_upstream(obj: &Map<String, Value>, client_id: Option<&str>) -> Option<ClientSummary> {
    match obj.get("client") {
        Some(Value::Object(client)) => Some(ClientSummary {
            id: ensure_id(client.get("id")),
            name: ["name", "company_name", "username", "full_name"]
                .iter()
                .find_map(|k| optional_string(client.get(*k)))
                .unwrap_or_default(),
        }),
        // Flat `client_name` from list endpoints.
        _ => optional_string(obj.get("client_name")).map(|name| ClientSummary {
            id: client_id.map(str::to_string),
            name,
        }),
    }
}

fn client_to_upstream(client: &ClientSummary) -> Value {
    let mut obj = Map::new();
    put_opt(&mut obj, "id", client.id.as_deref().map(id_to_upstream));
    obj.insert("name".into(), Value::String(client.name.clone()));
    Value::Object(obj)
}

pub fn summary_from_upstream(obj: &Map<String, Value>, project_id: Option<&str>) -> Option<ProjectSummary> {
    match obj.get("project") {
        Some(Value::Object(project)) => Some(ProjectSummary {
            id: ensure_id(project.get("id")),
            name: string_or_default(project.get("name")),
        }),
        _ => optional_string(obj.get("project_name")).map(|name| ProjectSummary {
            id: project_id.map(str::to_string),
            name,
        }),
    }
}

pub fn summary_to_upstream(summary: &ProjectSummary) -> Value {
    let mut obj = Map::new();
    put_opt(&mut obj, "id", summary.id.as_deref().map(id_to_upstream));
    obj.insert("name".into(), Value::String(summary.name.clone()));
    Value::Object(obj)
}

impl Normalize for Project {
    fn from_upstream(raw: &Value) -> Result<Self, NormalizeError> {
        from_upstream(raw)
    }

    fn to_upstream(&self) -> Value {
        to_upstream(self)
    }
}
