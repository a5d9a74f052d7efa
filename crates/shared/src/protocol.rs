use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Priority, ProjectId, ProjectStatus, StatusKey, UserProfile};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: StatusKey,
}

/// Body of task create (`POST /tasks/`, `POST /projects/{id}/tasks/`) and
/// full update (`PUT /tasks/{id}/`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: StatusKey,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectId>,
}

impl TaskInput {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            status: StatusKey::todo(),
            priority: Priority::default(),
            due_date: None,
            project: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: ProjectStatus,
}

/// Query of the task list view: `GET /tasks/?status=<key|all>&sort=<field>`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskQuery {
    /// `None` lists every status.
    pub status: Option<StatusKey>,
    /// Ordering field; the backend default is `created_at`.
    pub sort: Option<String>,
}

impl TaskQuery {
    pub const ALL_STATUSES: &'static str = "all";
    pub const DEFAULT_SORT: &'static str = "created_at";

    pub fn pairs(&self) -> [(&'static str, &str); 2] {
        [
            (
                "status",
                self.status
                    .as_ref()
                    .map_or(Self::ALL_STATUSES, StatusKey::as_str),
            ),
            ("sort", self.sort.as_deref().unwrap_or(Self::DEFAULT_SORT)),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub tokens: TokenPair,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    /// Present when the backend rotates refresh tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: u32,
    pub completed: u32,
    pub in_progress: u32,
    pub todo: u32,
    #[serde(default)]
    pub overdue: u32,
    #[serde(default)]
    pub high_priority: u32,
}
