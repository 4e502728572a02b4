//! In-process stand-in for the shared key-value store
//!
//! Serves `GET`/`POST /{bucket}/tasks` with the same status codes as the real
//! store and counts requests so tests can assert on network traffic.

#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use factory_tasks::cache::LocalCache;
use factory_tasks::models::{NewTask, Priority, Task};
use factory_tasks::remote::RemoteClient;
use factory_tasks::sync::{ConnectOutcome, SyncCoordinator};

#[derive(Default)]
pub struct FakeStore {
    buckets: Mutex<HashMap<String, Value>>,
    gets: AtomicUsize,
    posts: AtomicUsize,
    fail_gets: AtomicBool,
    fail_posts: AtomicBool,
    post_delay_ms: AtomicUsize,
    get_delay_ms: AtomicUsize,
    gets_in_flight: AtomicUsize,
    max_gets_in_flight: AtomicUsize,
    last_query: Mutex<HashMap<String, String>>,
}

impl FakeStore {
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn posts(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_posts(&self, fail: bool) {
        self.fail_posts.store(fail, Ordering::SeqCst);
    }

    pub fn delay_posts(&self, delay: Duration) {
        self.post_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn delay_gets(&self, delay: Duration) {
        self.get_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Most GETs ever being served at the same time
    pub fn max_gets_in_flight(&self) -> usize {
        self.max_gets_in_flight.load(Ordering::SeqCst)
    }

    /// Write a bucket directly, as another device would
    pub fn put(&self, bucket: &str, body: Value) {
        self.buckets
            .lock()
            .unwrap()
            .insert(bucket.to_string(), body);
    }

    pub fn put_tasks(&self, bucket: &str, tasks: &[Task]) {
        self.put(bucket, serde_json::to_value(tasks).unwrap());
    }

    pub fn tasks(&self, bucket: &str) -> Option<Vec<Task>> {
        let body = self.buckets.lock().unwrap().get(bucket).cloned()?;
        Some(serde_json::from_value(body).unwrap())
    }

    /// Bucket body exactly as stored
    pub fn raw(&self, bucket: &str) -> Option<Value> {
        self.buckets.lock().unwrap().get(bucket).cloned()
    }

    pub fn last_query(&self) -> HashMap<String, String> {
        self.last_query.lock().unwrap().clone()
    }
}

pub struct FakeServer {
    pub url: String,
    pub store: Arc<FakeStore>,
}

pub async fn start_fake_server() -> FakeServer {
    let store = Arc::new(FakeStore::default());
    let app = Router::new()
        .route("/{bucket}/tasks", get(read_bucket).post(write_bucket))
        .with_state(store.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeServer {
        url: format!("http://{}", addr),
        store,
    }
}

async fn read_bucket(
    State(store): State<Arc<FakeStore>>,
    Path(bucket): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    store.gets.fetch_add(1, Ordering::SeqCst);
    *store.last_query.lock().unwrap() = query;

    let in_flight = store.gets_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    store.max_gets_in_flight.fetch_max(in_flight, Ordering::SeqCst);
    let delay = store.get_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay as u64)).await;
    }
    store.gets_in_flight.fetch_sub(1, Ordering::SeqCst);

    if store.fail_gets.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match store.buckets.lock().unwrap().get(&bucket) {
        Some(body) => Json(body.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn write_bucket(
    State(store): State<Arc<FakeStore>>,
    Path(bucket): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    store.posts.fetch_add(1, Ordering::SeqCst);

    let delay = store.post_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay as u64)).await;
    }

    if store.fail_posts.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    store.put(&bucket, body.clone());
    Json(body).into_response()
}

/// URL on which nothing is listening
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

pub fn client(url: &str) -> RemoteClient {
    RemoteClient::new(url, Duration::from_secs(2)).unwrap()
}

pub fn coordinator(url: &str) -> (Arc<LocalCache>, SyncCoordinator) {
    let cache = Arc::new(LocalCache::open_in_memory().unwrap());
    let sync = SyncCoordinator::restore(client(url), cache.clone());
    (cache, sync)
}

pub fn new_task(title: &str) -> Task {
    Task::new(
        NewTask {
            title: title.to_string(),
            description: "found during inspection".to_string(),
            machine: "Press 3".to_string(),
            assigned_to: "erkan".to_string(),
            priority: Priority::High,
            image: None,
        },
        "manager",
    )
}

pub fn fields(title: &str) -> NewTask {
    NewTask {
        title: title.to_string(),
        machine: "Lathe 1".to_string(),
        assigned_to: "erkan".to_string(),
        ..Default::default()
    }
}

/// Coordinator connected to a freshly created bucket holding one task
pub async fn connected(server: &FakeServer, code: &str) -> SyncCoordinator {
    let (_, sync) = coordinator(&server.url);
    sync.update(|store| store.create(fields("Check hydraulics"), "manager"))
        .unwrap();
    let outcome = sync.connect(code, |_| true).await.unwrap();
    assert_eq!(outcome, ConnectOutcome::Created { pushed: 1 });
    sync
}
