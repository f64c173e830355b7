use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical user as seen by the UI.
///
/// `id` is always a string: legacy deployments hand out integers, newer ones
/// UUIDs. `role` is always lowercase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub full_name: Option<String>,
    pub company: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub specialities: Vec<String>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Embedded reference to a user (e.g. a pentester assigned to a project).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub username: Option<String>,
    pub email: Option<String>,
}
