//! HTTP client for the shared key-value store
//!
//! Each factory code maps to one document at `{base}/{code}/tasks` holding
//! the full task list as a JSON array. Reads and writes always move the
//! whole list.

use chrono::Utc;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

use crate::bucket::BucketId;
use crate::models::{Task, TaskList};

/// Failed remote operation. Messages are meant for end users.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("could not reach the sync server")]
    Connectivity(#[source] reqwest::Error),

    #[error("sync server returned an error (HTTP {0})")]
    Status(u16),
}

/// Result of reading a bucket
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// Nothing has ever been written under this code
    Missing,
    /// The bucket exists; the list may be empty
    Found(TaskList),
}

impl Fetched {
    /// Tasks in the bucket; empty for a missing bucket
    pub fn tasks(&self) -> &[Task] {
        match self {
            Fetched::Missing => &[],
            Fetched::Found(list) => &list.tasks,
        }
    }

    pub fn into_list(self) -> TaskList {
        match self {
            Fetched::Missing => TaskList::default(),
            Fetched::Found(list) => list,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Fetched::Missing)
    }
}

/// Stateless client; cheap to clone
#[derive(Debug, Clone)]
pub struct RemoteClient {
    base_url: String,
    client: Client,
}

impl RemoteClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn tasks_url(&self, bucket: &BucketId) -> String {
        format!("{}/{}/tasks", self.base_url, bucket)
    }

    /// Read the task list stored under `bucket`. No retries.
    pub async fn fetch(&self, bucket: &BucketId) -> Result<Fetched, RemoteError> {
        let cache_buster = Utc::now().timestamp_millis().to_string();
        let resp = self
            .client
            .get(self.tasks_url(bucket))
            .query(&[("_t", cache_buster)])
            .send()
            .await
            .map_err(RemoteError::Connectivity)?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(bucket = %bucket, "Bucket does not exist yet");
            return Ok(Fetched::Missing);
        }
        if !status.is_success() {
            tracing::warn!(bucket = %bucket, status = status.as_u16(), "Fetch rejected");
            return Err(RemoteError::Status(status.as_u16()));
        }

        // Anything other than a JSON array reads as an empty list
        let body = resp.bytes().await.map_err(RemoteError::Connectivity)?;
        let list = TaskList::decode(&body);
        tracing::debug!(
            bucket = %bucket,
            tasks = list.tasks.len(),
            foreign = list.foreign.len(),
            "Fetched bucket"
        );
        Ok(Fetched::Found(list))
    }

    /// Overwrite the task list stored under `bucket`. No retries.
    pub async fn push(&self, bucket: &BucketId, list: &TaskList) -> Result<(), RemoteError> {
        let resp = self
            .client
            .post(self.tasks_url(bucket))
            .json(list)
            .send()
            .await
            .map_err(RemoteError::Connectivity)?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(bucket = %bucket, tasks = list.tasks.len(), "Pushed bucket");
            Ok(())
        } else {
            tracing::warn!(bucket = %bucket, status = status.as_u16(), "Push rejected");
            Err(RemoteError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_has_no_tasks() {
        assert!(Fetched::Missing.tasks().is_empty());
        assert!(Fetched::Missing.is_missing());
        assert!(!Fetched::Found(TaskList::default()).is_missing());
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let client = RemoteClient::new("http://kv.local/", Duration::from_secs(1)).unwrap();
        let bucket = BucketId::parse("line-4").unwrap();
        assert_eq!(client.tasks_url(&bucket), "http://kv.local/line-4/tasks");
    }
}
