use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskLifecycle {
    Pending,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub archived: bool,
    pub location_id: Option<String>,
    pub pending_deletion: bool,
    pub needs_sync: bool,
    #[serde(default)]
    pub version: u64,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, due_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            due_at,
            completed_at: None,
            archived: false,
            location_id: None,
            pending_deletion: false,
            needs_sync: true,
            version: 0,
        }
    }

    pub fn lifecycle(&self) -> TaskLifecycle {
        if self.archived {
            TaskLifecycle::Archived
        } else if self.completed_at.is_some() {
            TaskLifecycle::Completed
        } else {
            TaskLifecycle::Pending
        }
    }

    /// Visible in the location and due-date lists.
    pub fn is_active(&self) -> bool {
        !self.archived && !self.pending_deletion
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.title, "task.title")?;
        if self.archived && self.completed_at.is_none() {
            return Err("task.archived requires task.completed_at".to_string());
        }
        if let Some(location_id) = &self.location_id {
            validate_non_empty(location_id, "task.location_id")?;
        }
        Ok(())
    }

    pub fn mark_for_deletion(&mut self) {
        self.pending_deletion = true;
        self.needs_sync = true;
    }

    pub fn apply_patch(&mut self, patch: &TaskPatch) -> Result<(), String> {
        if let Some(title) = &patch.title {
            let title = title.trim();
            validate_non_empty(title, "task.title")?;
            self.title = title.to_string();
        }
        if let Some(due_at) = patch.due_at {
            self.due_at = due_at;
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = completed_at;
            if completed_at.is_none() {
                self.archived = false;
            }
        }
        if let Some(archived) = patch.archived {
            self.archived = archived;
        }
        if let Some(location_id) = &patch.location_id {
            self.location_id = location_id.clone();
        }
        self.needs_sync = true;
        self.validate()
    }
}

/// Field-level update. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub due_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub archived: Option<bool>,
    pub location_id: Option<Option<String>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self == &TaskPatch::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub id: String,
    pub title: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "location.id")?;
        validate_non_empty(&self.title, "location.title")?;
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err("location.latitude must be within [-90, 90]".to_string());
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err("location.longitude must be within [-180, 180]".to_string());
        }
        Ok(())
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
