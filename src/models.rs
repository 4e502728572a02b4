//! Task and user models
//!
//! Field names follow the camelCase JSON stored in the shared bucket so that
//! every device (including non-Rust clients) reads the same document.
//! Timestamps are RFC 3339 strings for the same reason.

use chrono::Utc;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Priority level for tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Where a task is in its repair lifecycle.
///
/// The usual order is `Pending -> InProgress -> Completed`, but nothing stops
/// a caller from setting any status directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// A repair or maintenance task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    /// Label of the machine the work is for
    #[serde(default)]
    pub machine: String,
    pub assigned_to: String,
    pub created_by: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TaskStatus,
    pub created_at: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub manager_note: Option<String>,
    #[serde(default)]
    pub rating: Option<u8>,
}

/// Fields a manager fills in when creating a task
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub image: Option<String>,
    pub machine: String,
    pub assigned_to: String,
    pub priority: Priority,
}

impl Task {
    /// Build a fresh pending task with a random id
    pub fn new(fields: NewTask, created_by: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: fields.title,
            description: fields.description,
            image: fields.image,
            machine: fields.machine,
            assigned_to: fields.assigned_to,
            created_by: created_by.to_string(),
            priority: fields.priority,
            status: TaskStatus::Pending,
            created_at: Utc::now().to_rfc3339(),
            started_at: None,
            completed_at: None,
            manager_note: None,
            rating: None,
        }
    }

    /// Set the status and stamp the matching lifecycle timestamps
    pub fn set_status(&mut self, status: TaskStatus) {
        let now = Utc::now().to_rfc3339();
        match status {
            TaskStatus::Pending => {}
            TaskStatus::InProgress => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            TaskStatus::Completed => {
                if self.started_at.is_none() {
                    self.started_at = Some(now.clone());
                }
                self.completed_at = Some(now);
            }
        }
        self.status = status;
    }
}

/// A task list as stored in a bucket or the cache.
///
/// Entries that do not decode as a [`Task`] (written by a newer or different
/// client) are carried verbatim in `foreign` and written back unchanged, so
/// re-uploading the list never drops another device's records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskList {
    pub tasks: Vec<Task>,
    pub foreign: Vec<Value>,
}

impl TaskList {
    /// Decode a JSON array. Anything other than an array is an empty list.
    pub fn decode(body: &[u8]) -> Self {
        let items = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Array(items)) => items,
            Ok(_) | Err(_) => return Self::default(),
        };

        let mut list = Self::default();
        for item in items {
            match Task::deserialize(&item) {
                Ok(task) => list.tasks.push(task),
                Err(e) => {
                    tracing::warn!(error = %e, "Keeping unreadable task entry as-is");
                    list.foreign.push(item);
                }
            }
        }
        list
    }

    /// True when there are neither tasks nor foreign entries
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.foreign.is_empty()
    }
}

impl From<Vec<Task>> for TaskList {
    fn from(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            foreign: Vec::new(),
        }
    }
}

/// Serialized as one flat array: tasks first, then foreign entries
impl Serialize for TaskList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.tasks.len() + self.foreign.len()))?;
        for task in &self.tasks {
            seq.serialize_element(task)?;
        }
        for entry in &self.foreign {
            seq.serialize_element(entry)?;
        }
        seq.end()
    }
}

/// Role selected at login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Manager,
    Technician,
}

impl Role {
    /// Managers create, delete, annotate and rate tasks
    pub fn manages_tasks(self) -> bool {
        matches!(self, Role::Manager)
    }
}

/// A person on the roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub role: Role,
}

/// Connection state of the sync session. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Offline,
    Syncing,
    Online,
    Error,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in-progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Manager => f.write_str("manager"),
            Role::Technician => f.write_str("technician"),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Offline => "offline",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Online => "online",
            SyncStatus::Error => "error",
        };
        f.write_str(s)
    }
}
