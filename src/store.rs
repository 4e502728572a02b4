//! In-memory task list mirrored to the local cache

use std::sync::Arc;
use thiserror::Error;

use crate::cache::{LocalCache, TASKS_KEY};
use crate::models::{NewTask, Task, TaskList, TaskStatus};

/// Rejected task-list edits
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no task with id '{0}'")]
    NotFound(String),

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("task title cannot be empty")]
    EmptyTitle,
}

/// Ordered task collection, newest first.
///
/// Every change is written through to the cache in the same array format the
/// bucket uses, foreign entries included. Write failures are logged and do
/// not undo the in-memory change.
pub struct TaskStore {
    cache: Arc<LocalCache>,
    list: TaskList,
}

impl TaskStore {
    /// Load whatever the cache holds; a missing or malformed entry gives an
    /// empty list.
    pub fn load(cache: Arc<LocalCache>) -> Self {
        let list = match cache.get(TASKS_KEY) {
            Ok(Some(raw)) => TaskList::decode(raw.as_bytes()),
            Ok(None) => TaskList::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read cached tasks");
                TaskList::default()
            }
        };
        tracing::debug!(tasks = list.tasks.len(), "Loaded cached tasks");
        Self { cache, list }
    }

    pub fn all(&self) -> &[Task] {
        &self.list.tasks
    }

    /// Tasks plus entries this build cannot read
    pub fn list(&self) -> &TaskList {
        &self.list
    }

    pub fn len(&self) -> usize {
        self.list.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.tasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.list.tasks.iter().find(|t| t.id == id)
    }

    /// Tasks assigned to one technician
    pub fn assigned_to<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a Task> + 'a {
        self.list.tasks.iter().filter(move |t| t.assigned_to == user_id)
    }

    pub fn create(&mut self, fields: NewTask, created_by: &str) -> Result<Task, StoreError> {
        if fields.title.trim().is_empty() {
            return Err(StoreError::EmptyTitle);
        }

        let task = Task::new(fields, created_by);
        self.list.tasks.insert(0, task.clone());
        self.persist();
        Ok(task)
    }

    pub fn set_status(&mut self, id: &str, status: TaskStatus) -> Result<Task, StoreError> {
        self.edit(id, |task| task.set_status(status))
    }

    /// Replace the manager note; an empty note clears it
    pub fn set_note(&mut self, id: &str, note: &str) -> Result<Task, StoreError> {
        let note = note.trim();
        let note = (!note.is_empty()).then(|| note.to_string());
        self.edit(id, |task| task.manager_note = note)
    }

    pub fn rate(&mut self, id: &str, rating: u8) -> Result<Task, StoreError> {
        if !(1..=5).contains(&rating) {
            return Err(StoreError::InvalidRating(rating));
        }
        self.edit(id, |task| task.rating = Some(rating))
    }

    pub fn remove(&mut self, id: &str) -> Result<Task, StoreError> {
        let index = self
            .list
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let removed = self.list.tasks.remove(index);
        self.persist();
        Ok(removed)
    }

    /// Swap in new tasks; foreign entries are kept
    pub fn replace(&mut self, tasks: Vec<Task>) {
        self.list.tasks = tasks;
        self.persist();
    }

    /// Swap in a whole list as read from the bucket
    pub fn replace_list(&mut self, list: TaskList) {
        self.list = list;
        self.persist();
    }

    fn edit(&mut self, id: &str, f: impl FnOnce(&mut Task)) -> Result<Task, StoreError> {
        let task = self
            .list
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        f(task);
        let updated = task.clone();
        self.persist();
        Ok(updated)
    }

    fn persist(&self) {
        if let Err(e) = self.cache.store_json(TASKS_KEY, &self.list) {
            tracing::warn!(error = %e, "Failed to write tasks to cache");
        }
    }
}
