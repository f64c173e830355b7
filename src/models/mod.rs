//! Canonical entities handed to the UI.

pub mod project;
pub mod user;
pub mod vulnerability;

pub use project::{ClientSummary, Project, ProjectSummary};
pub use user::{User, UserSummary};
pub use vulnerability::{Vulnerability, VulnerabilitySummary};
