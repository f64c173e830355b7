use serde_json::{Map, Value};

use super::{
    as_object, backfill_timestamps, ensure_id, id_to_upstream, lowercase_enum, optional_f64,
    optional_string, project, put_opt, require_id, shape_body, string_or_default,
    timestamp_to_upstream, Normalize, NormalizeError,
};
use crate::models::{Vulnerability, VulnerabilitySummary};

const ENTITY: &str = "vulnerability";
const DEFAULT_SEVERITY: &str = "info";
const DEFAULT_STATUS: &str = "open";

pub fn from_upstream(raw: &Value) -> Result<Vulnerability, NormalizeError> {
    let obj = as_object(raw, ENTITY);
    let id = require_id(obj, ENTITY, "id")?;
    let (created_at, updated_at) = backfill_timestamps(obj);
    let project_id = ensure_id(obj.get("project_id"));

    Ok(Vulnerability {
        id,
        title: string_or_default(obj.get("title")),
        description_md: optional_string(obj.get("description_md"))
            .or_else(|| optional_string(obj.get("description")))
            .unwrap_or_default(),
        severity: lowercase_enum(obj.get("severity"), DEFAULT_SEVERITY),
        cvss_score: optional_f64(obj.get("cvss_score")),
        status: lowercase_enum(obj.get("status"), DEFAULT_STATUS),
        project: project::summary_from_upstream(obj, project_id.as_deref()),
        project_id,
        reported_by: ensure_id(obj.get("reported_by")),
        remediation_md: optional_string(obj.get("remediation_md")),
        proof_of_concept: optional_string(obj.get("proof_of_concept")),
        affected_asset: optional_string(obj.get("affected_asset")),
        created_at,
        updated_at,
    })
}

pub fn many_from_upstream(raw: &Value) -> Result<Vec<Vulnerability>, NormalizeError> {
    Vec::<Vulnerability>::from_upstream(raw)
}

pub fn to_upstream(v: &Vulnerability) -> Value {
    let mut obj = Map::new();
    obj.insert("id".into(), id_to_upstream(&v.id));
    obj.insert("title".into(), Value::String(v.title.clone()));
    obj.insert("description_md".into(), Value::String(v.description_md.clone()));
    obj.insert("severity".into(), Value::String(v.severity.clone()));
    put_opt(&mut obj, "cvss_score", v.cvss_score.map(Value::from));
    obj.insert("status".into(), Value::String(v.status.clone()));
    put_opt(&mut obj, "project_id", v.project_id.as_deref().map(id_to_upstream));
    put_opt(&mut obj, "project", v.project.as_ref().map(project::summary_to_upstream));
    put_opt(&mut obj, "reported_by", v.reported_by.as_deref().map(id_to_upstream));
    put_opt(&mut obj, "remediation_md", v.remediation_md.clone().map(Value::String));
    put_opt(&mut obj, "proof_of_concept", v.proof_of_concept.clone().map(Value::String));
    put_opt(&mut obj, "affected_asset", v.affected_asset.clone().map(Value::String));
    obj.insert("created_at".into(), timestamp_to_upstream(&v.created_at));
    obj.insert("updated_at".into(), timestamp_to_upstream(&v.updated_at));
    Value::Object(obj)
}

pub fn body_to_upstream(body: Value) -> Value {
    shape_body(body, &["id", "project_id", "reported_by"], &["project"])
}

pub fn summary_from_upstream(raw: &Value) -> Option<VulnerabilitySummary> {
    let obj = raw.as_object()?;
    Some(VulnerabilitySummary {
        id: ensure_id(obj.get("id"))?,
        title: string_or_default(obj.get("title")),
        severity: lowercase_enum(obj.get("severity"), DEFAULT_SEVERITY),
        status: lowercase_enum(obj.get("status"), DEFAULT_STATUS),
    })
}

pub fn summary_to_upstream(summary: &VulnerabilitySummary) -> Value {
    let mut obj = Map::new();
    obj.insert("id".into(), id_to_upstream(&summary.id));
    obj.insert("title".into(), Value::String(summary.title.clone()));
    obj.insert("severity".into(), Value::String(summary.severity.clone()));
    obj.insert("status".into(), Value::String(summary.status.clone()));
    Value::Object(obj)
}

impl Normalize for Vulnerability {
    fn from_upstream(raw: &Value) -> Result<Self, NormalizeError> {
        from_upstream(raw)
    }

    fn to_upstream(&self) -> Value {
        to_upstream(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProjectSummary;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_severity_and_status_lowercased() {
        let v = from_upstream(&json!({
            "id": "3f1c2b9e-8d4a-4c6b-9e2f-7a1b3c5d7e9f",
            "title": "Stored XSS",
            "severity": "HIGH",
            "status": "Open",
            "cvss_score": "7.5",
            "project_id": 12
        }))
        .unwrap();
        assert_eq!(v.severity, "high");
        assert_eq!(v.status, "open");
        assert_eq!(v.cvss_score, Some(7.5));
        assert_eq!(v.project_id.as_deref(), Some("12"));
        assert_eq!(v.project, None);
    }

    #[test]
    fn test_description_fallback_and_project_name() {
        let v = from_upstream(&json!({
            "id": 5,
            "description": "plain description",
            "project_id": "7",
            "project_name": "API Security Assessment"
        }))
        .unwrap();
        assert_eq!(v.description_md, "plain description");
        assert_eq!(
            v.project,
            Some(ProjectSummary {
                id: Some("7".into()),
                name: "API Security Assessment".into()
            })
        );
        assert_eq!(v.severity, "info");
    }

    #[test]
    fn test_round_trip() {
        let v = Vulnerability {
            id: "11".into(),
            title: "IDOR on /invoices".into(),
            description_md: "## Details".into(),
            severity: "medium".into(),
            cvss_score: Some(6.1),
            status: "fixed".into(),
            project_id: Some("44ef495d-0117-40d4-8c12-0851ee26887a".into()),
            project: Some(ProjectSummary {
                id: Some("44ef495d-0117-40d4-8c12-0851ee26887a".into()),
                name: "Portal".into(),
            }),
            reported_by: None,
            remediation_md: Some("Check ownership".into()),
            proof_of_concept: None,
            affected_asset: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 5, 2, 8, 30, 0).unwrap(),
        };
        assert_eq!(from_upstream(&to_upstream(&v)).unwrap(), v);
    }

    #[test]
    fn test_body_strips_project_summary() {
        let body = body_to_upstream(json!({
            "title": "t",
            "project_id": "44",
            "project": {"id": "44", "name": "x"}
        }));
        assert_eq!(body, json!({"title": "t", "project_id": 44}));
    }
}
