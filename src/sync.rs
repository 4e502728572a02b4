//! Sync coordinator
//!
//! Owns the task list, the active factory code and the sync status, and
//! decides when to read from and write to the shared bucket.
//!
//! Conflict policy is deliberately simple: the last fetch wins for incoming
//! data and the last push wins for outgoing data. There is no per-task merge,
//! so two devices editing at the same time overwrite each other.
//!
//! The state mutex is never held across an `.await`. Each step between two
//! network calls therefore runs as one uninterrupted read-modify-write.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bucket::{BucketId, MIN_LEN};
use crate::cache::{BUCKET_KEY, LocalCache};
use crate::models::{SyncStatus, Task, TaskList};
use crate::remote::{Fetched, RemoteClient, RemoteError};
use crate::store::{StoreError, TaskStore};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("factory code '{0}' is too short (at least {min} characters)", min = MIN_LEN)]
    InvalidBucket(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("could not set up the new factory code: {0}")]
    Setup(#[source] RemoteError),
}

/// How a successful `connect` went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The code was unused; local tasks were uploaded to create it
    Created { pushed: usize },
    /// The code already existed
    Joined { replaced: bool },
    /// The remote list was offered and the user kept the local one
    Declined,
}

/// Result of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No factory code is active
    Inactive,
    Failed,
    /// Remote list was empty or missing
    Empty,
    Unchanged,
    Replaced { tasks: usize },
    /// The factory code changed while the request was in flight
    Stale,
}

/// Point-in-time view for the presentation layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub status: SyncStatus,
    pub bucket: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub tasks: usize,
    /// Bumped on every state change
    pub revision: u64,
}

struct SyncState {
    store: TaskStore,
    bucket: Option<BucketId>,
    status: SyncStatus,
    last_sync: Option<DateTime<Utc>>,
    last_error: Option<String>,
    revision: u64,
}

struct Inner {
    remote: RemoteClient,
    cache: Arc<LocalCache>,
    state: Mutex<SyncState>,
    updates: watch::Sender<SyncSnapshot>,
}

/// Handle to the sync session; clones share the same state
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    /// Restore tasks and the active factory code from the cache.
    ///
    /// The status starts `offline` until the first remote operation.
    pub fn restore(remote: RemoteClient, cache: Arc<LocalCache>) -> Self {
        let store = TaskStore::load(cache.clone());

        let bucket = match cache.get(BUCKET_KEY) {
            Ok(Some(raw)) => match BucketId::parse(&raw) {
                Ok(bucket) => Some(bucket),
                Err(_) => {
                    tracing::warn!(code = %raw, "Ignoring invalid cached factory code");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read cached factory code");
                None
            }
        };

        let state = SyncState {
            store,
            bucket,
            status: SyncStatus::Offline,
            last_sync: None,
            last_error: None,
            revision: 0,
        };
        let (updates, _) = watch::channel(state.snapshot());

        Self {
            inner: Arc::new(Inner {
                remote,
                cache,
                state: Mutex::new(state),
                updates,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &mut SyncState) {
        state.revision += 1;
        self.inner.updates.send_replace(state.snapshot());
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.lock().snapshot()
    }

    /// Receive a fresh snapshot after every state change
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.inner.updates.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.lock().status
    }

    pub fn active_bucket(&self) -> Option<BucketId> {
        self.lock().bucket.clone()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.lock().last_sync
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.lock().store.all().to_vec()
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.lock().store.get(id).cloned()
    }

    /// Join or create the shared list named by `raw_id`.
    ///
    /// When the bucket already holds tasks, `confirm` sees them and decides
    /// whether they replace the local list.
    pub async fn connect<F>(&self, raw_id: &str, confirm: F) -> Result<ConnectOutcome, SyncError>
    where
        F: FnOnce(&[Task]) -> bool,
    {
        let bucket = BucketId::parse(raw_id).map_err(SyncError::InvalidBucket)?;

        let previous = {
            let mut state = self.lock();
            let previous = state.status;
            state.status = SyncStatus::Syncing;
            self.publish(&mut state);
            previous
        };

        tracing::info!(bucket = %bucket, "Connecting to factory code");

        let fetched = match self.inner.remote.fetch(&bucket).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(bucket = %bucket, error = %e, "Connect failed");
                self.fail(&e);
                return Err(SyncError::Remote(e));
            }
        };

        match fetched {
            Fetched::Missing => {
                let local = self.lock().store.list().clone();
                if let Err(e) = self.inner.remote.push(&bucket, &local).await {
                    tracing::warn!(bucket = %bucket, error = %e, "Creating factory code failed");
                    self.fail(&e);
                    return Err(SyncError::Setup(e));
                }

                self.activate(bucket.clone(), None);
                let pushed = local.tasks.len();
                tracing::info!(bucket = %bucket, tasks = pushed, "Created factory code");
                Ok(ConnectOutcome::Created { pushed })
            }
            Fetched::Found(remote) if remote.is_empty() => {
                self.activate(bucket.clone(), None);
                tracing::info!(bucket = %bucket, "Joined empty factory code");
                Ok(ConnectOutcome::Joined { replaced: false })
            }
            Fetched::Found(remote) => {
                if !confirm(&remote.tasks) {
                    let mut state = self.lock();
                    state.status = previous;
                    self.publish(&mut state);
                    tracing::info!(bucket = %bucket, "Kept local tasks, not joining");
                    return Ok(ConnectOutcome::Declined);
                }

                let count = remote.tasks.len();
                self.activate(bucket.clone(), Some(remote));
                tracing::info!(bucket = %bucket, tasks = count, "Joined factory code");
                Ok(ConnectOutcome::Joined { replaced: true })
            }
        }
    }

    fn activate(&self, bucket: BucketId, replacement: Option<TaskList>) {
        if let Err(e) = self.inner.cache.put(BUCKET_KEY, bucket.as_str()) {
            tracing::warn!(error = %e, "Failed to cache factory code");
        }

        let mut state = self.lock();
        if let Some(list) = replacement {
            state.store.replace_list(list);
        }
        state.bucket = Some(bucket);
        state.status = SyncStatus::Online;
        state.last_sync = Some(Utc::now());
        state.last_error = None;
        self.publish(&mut state);
    }

    fn fail(&self, error: &RemoteError) {
        let mut state = self.lock();
        state.status = SyncStatus::Error;
        state.last_error = Some(error.to_string());
        self.publish(&mut state);
    }

    /// Stop syncing. Local tasks stay as they are.
    pub fn disconnect(&self) {
        if let Err(e) = self.inner.cache.remove(BUCKET_KEY) {
            tracing::warn!(error = %e, "Failed to clear cached factory code");
        }

        let mut state = self.lock();
        if let Some(bucket) = state.bucket.take() {
            tracing::info!(bucket = %bucket, "Disconnected from factory code");
        }
        state.status = SyncStatus::Offline;
        state.last_error = None;
        self.publish(&mut state);
    }

    /// Replace the local list and upload it in the background.
    ///
    /// Returns the upload task when a factory code is active. Awaiting it is
    /// optional; its completion only updates status and last-sync time.
    pub fn push(&self, tasks: Vec<Task>) -> Option<JoinHandle<()>> {
        self.update(|store| {
            store.replace(tasks);
            Ok(())
        })
        .ok()
        .and_then(|mutation| mutation.push)
    }

    /// Edit the local list, then upload the result like [`push`](Self::push)
    pub fn update<T, F>(&self, edit: F) -> Result<Mutation<T>, StoreError>
    where
        F: FnOnce(&mut TaskStore) -> Result<T, StoreError>,
    {
        let (value, upload) = {
            let mut state = self.lock();
            let value = edit(&mut state.store)?;
            let upload = match state.bucket.clone() {
                Some(bucket) => {
                    state.status = SyncStatus::Syncing;
                    Some((bucket, state.store.list().clone()))
                }
                None => None,
            };
            self.publish(&mut state);
            (value, upload)
        };

        let push = upload.map(|(bucket, list)| self.spawn_push(bucket, list));
        Ok(Mutation { value, push })
    }

    fn spawn_push(&self, bucket: BucketId, list: TaskList) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let result = this.inner.remote.push(&bucket, &list).await;

            let mut state = this.lock();
            if state.bucket.as_ref() != Some(&bucket) {
                tracing::debug!(bucket = %bucket, "Ignoring push result for inactive code");
                return;
            }
            match result {
                Ok(()) => {
                    state.status = SyncStatus::Online;
                    state.last_sync = Some(Utc::now());
                    state.last_error = None;
                }
                Err(e) => {
                    tracing::warn!(bucket = %bucket, error = %e, "Push failed, keeping local changes");
                    state.status = SyncStatus::Error;
                    state.last_error = Some(e.to_string());
                }
            }
            this.publish(&mut state);
        })
    }

    /// Fetch the shared list and adopt it if it differs from the local one
    pub async fn poll(&self) -> PollOutcome {
        let Some(bucket) = self.active_bucket() else {
            return PollOutcome::Inactive;
        };

        let result = self.inner.remote.fetch(&bucket).await;

        let mut state = self.lock();
        if state.bucket.as_ref() != Some(&bucket) {
            return PollOutcome::Stale;
        }

        let remote = match result {
            Ok(fetched) => fetched.into_list(),
            Err(e) => {
                tracing::debug!(bucket = %bucket, error = %e, "Poll failed");
                if state.status == SyncStatus::Online {
                    state.status = SyncStatus::Error;
                    state.last_error = Some(e.to_string());
                    self.publish(&mut state);
                }
                return PollOutcome::Failed;
            }
        };

        if remote.is_empty() {
            return PollOutcome::Empty;
        }

        if &remote == state.store.list() {
            if state.status != SyncStatus::Online {
                state.status = SyncStatus::Online;
                state.last_error = None;
                self.publish(&mut state);
            }
            return PollOutcome::Unchanged;
        }

        let count = remote.tasks.len();
        state.store.replace_list(remote);
        state.status = SyncStatus::Online;
        state.last_sync = Some(Utc::now());
        state.last_error = None;
        self.publish(&mut state);
        tracing::info!(bucket = %bucket, tasks = count, "Adopted remote task list");
        PollOutcome::Replaced { tasks: count }
    }

    /// Pull the shared list before a one-off edit so the following upload
    /// starts from what other devices wrote.
    ///
    /// Returns `false` when a code is active but the fetch failed; the caller
    /// may still edit, at the risk of overwriting newer remote changes.
    pub async fn refresh(&self) -> bool {
        match self.poll().await {
            PollOutcome::Failed => {
                tracing::warn!("Could not refresh tasks before editing");
                false
            }
            _ => true,
        }
    }
}

/// A local edit plus its background upload, if any
pub struct Mutation<T> {
    pub value: T,
    pub push: Option<JoinHandle<()>>,
}

impl<T> Mutation<T> {
    /// Wait for the upload to finish (no-op when offline)
    pub async fn settle(self) -> T {
        if let Some(push) = self.push
            && let Err(e) = push.await
        {
            tracing::warn!(error = %e, "Upload task did not finish");
        }
        self.value
    }
}

impl SyncState {
    fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            status: self.status,
            bucket: self.bucket.as_ref().map(|b| b.to_string()),
            last_sync: self.last_sync,
            last_error: self.last_error.clone(),
            tasks: self.store.len(),
            revision: self.revision,
        }
    }
}
