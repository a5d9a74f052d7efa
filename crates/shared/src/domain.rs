use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(TaskId);
id_newtype!(ProjectId);
id_newtype!(UserId);

impl TaskId {
    /// Parses a draggable identifier. The board view uses the bare id (`"5"`),
    /// the project detail view prefixes it (`"task-5"`).
    pub fn parse_draggable(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let digits = raw.rsplit_once('-').map_or(raw, |(_, tail)| tail);
        digits.parse::<i64>().ok().map(TaskId)
    }
}

/// Column key. Tasks carry it as their `status` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusKey(String);

impl StatusKey {
    pub const TODO: &'static str = "todo";
    pub const IN_PROGRESS: &'static str = "in_progress";
    pub const COMPLETED: &'static str = "completed";

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn todo() -> Self {
        Self::new(Self::TODO)
    }

    pub fn in_progress() -> Self {
        Self::new(Self::IN_PROGRESS)
    }

    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StatusKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Active,
    Planning,
    InProgress,
    OnHold,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub key: StatusKey,
    pub title: String,
}

impl ColumnSpec {
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: StatusKey::new(key),
            title: title.into(),
        }
    }
}

/// Ordered set of columns a board renders. Only these keys are valid
/// drag destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardLayout {
    pub columns: Vec<ColumnSpec>,
}

impl BoardLayout {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    pub fn contains(&self, key: &StatusKey) -> bool {
        self.columns.iter().any(|column| &column.key == key)
    }

    pub fn position(&self, key: &StatusKey) -> Option<usize> {
        self.columns.iter().position(|column| &column.key == key)
    }
}

impl Default for BoardLayout {
    fn default() -> Self {
        Self::new(vec![
            ColumnSpec::new(StatusKey::TODO, "To Do"),
            ColumnSpec::new(StatusKey::IN_PROGRESS, "In Progress"),
            ColumnSpec::new(StatusKey::COMPLETED, "Completed"),
        ])
    }
}
