use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::project::ProjectSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    pub title: String,
    pub description_md: String,
    /// One of `critical`, `high`, `medium`, `low`, `info` (lowercase).
    pub severity: String,
    pub cvss_score: Option<f64>,
    pub status: String,
    pub project_id: Option<String>,
    pub project: Option<ProjectSummary>,
    pub reported_by: Option<String>,
    pub remediation_md: Option<String>,
    pub proof_of_concept: Option<String>,
    pub affected_asset: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilitySummary {
    pub id: String,
    pub title: String,
    pub severity: String,
    pub status: String,
}
