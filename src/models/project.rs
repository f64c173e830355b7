use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::user::UserSummary;
use super::vulnerability::VulnerabilitySummary;

/// Canonical project.
///
/// The client and assigned pentesters are embedded so a list page can show
/// display names without a second round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub client_id: Option<String>,
    pub client: Option<ClientSummary>,
    /// Lowercase, e.g. `planning`, `in_progress`, `completed`.
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub pentester_ids: Vec<String>,
    pub pentesters: Vec<UserSummary>,
    pub vulnerabilities: Vec<VulnerabilitySummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub id: Option<String>,
    pub name: String,
}

/// Embedded reference to a project, carried by vulnerabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: Option<String>,
    pub name: String,
}
