//! Helpers for testing managed blobs and their stores.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - [`MockStore`] records every call it receives, including the (tokio) instant it was made.
//!    Combined with `#[tokio::test(start_paused = true)]` this allows asserting on debounce and
//!    retry timing without actually waiting.
//!
//!  - When using [`BlobServer`], make sure that the server is held until all requests to
//!    the server have been made. It stops serving when dropped. Do not use paused time with
//!    it, since request timeouts would fire right away.
//!
//!  - When using [`tempdir`], hold on to the returned handle for the entire test, otherwise the
//!    directory is removed while the store still writes to it.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::{OriginalUri, Path, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{any, get};
use axum::Router;
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tokio::time::Instant;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use url::Url;

use managed_blob::config::HttpStoreConfig;
use managed_blob::{BlobError, BlobKey, BlobResult, BlobStore, ErrorReporter};

pub use tempfile::TempDir;

/// The bearer token accepted by the `/private/` routes of [`BlobServer`].
pub const AUTH_TOKEN: &str = "s3cr3t";

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `managed_blob` crate and mutes all
///    other logs (such as reqwest or hyper).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("managed_blob=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped. Use it as a guard to
/// automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// A write received by the [`MockStore`].
#[derive(Clone, Debug)]
pub struct WriteCall {
    pub key: BlobKey,
    pub content: String,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MockState {
    blobs: BTreeMap<BlobKey, String>,
    reads: usize,
    writes: Vec<WriteCall>,
    removes: usize,
    failing_writes: usize,
    fail_all_writes: bool,
    read_error: Option<BlobError>,
    remove_error: Option<BlobError>,
}

/// An in-memory [`BlobStore`] that counts calls and fails on demand.
#[derive(Debug, Default)]
pub struct MockStore {
    state: Mutex<MockState>,
    read_delay: Duration,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a store whose reads take the given time to complete.
    pub fn with_read_delay(read_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::default(),
            read_delay,
        })
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Stores a raw blob without counting it as a write.
    pub fn insert(&self, key: &BlobKey, content: impl Into<String>) {
        self.state().blobs.insert(key.clone(), content.into());
    }

    /// Lets the next `n` writes fail with a transport error.
    pub fn fail_next_writes(&self, n: usize) {
        self.state().failing_writes = n;
    }

    /// Lets every write fail with a transport error.
    pub fn fail_all_writes(&self) {
        self.state().fail_all_writes = true;
    }

    /// Lets every read fail with the given error, `None` restores normal operation.
    pub fn fail_reads(&self, error: Option<BlobError>) {
        self.state().read_error = error;
    }

    /// Lets every remove fail with the given error.
    pub fn fail_removes(&self, error: BlobError) {
        self.state().remove_error = Some(error);
    }

    pub fn reads(&self) -> usize {
        self.state().reads
    }

    pub fn writes(&self) -> Vec<WriteCall> {
        self.state().writes.clone()
    }

    /// The contents of all writes in order, including failed ones.
    pub fn write_contents(&self) -> Vec<String> {
        self.state()
            .writes
            .iter()
            .map(|call| call.content.clone())
            .collect()
    }

    pub fn removes(&self) -> usize {
        self.state().removes
    }

    /// The raw blob currently stored under the key.
    pub fn stored(&self, key: &BlobKey) -> Option<String> {
        self.state().blobs.get(key).cloned()
    }
}

impl BlobStore for MockStore {
    fn read<'a>(&'a self, key: &'a BlobKey) -> BoxFuture<'a, BlobResult<String>> {
        // The response is made up when the request arrives, like on a real server.
        let result = {
            let mut state = self.state();
            state.reads += 1;
            match &state.read_error {
                Some(error) => Err(error.clone()),
                None => state.blobs.get(key).cloned().ok_or(BlobError::NotFound),
            }
        };

        let read_delay = self.read_delay;
        async move {
            if !read_delay.is_zero() {
                tokio::time::sleep(read_delay).await;
            }
            result
        }
        .boxed()
    }

    fn write<'a>(&'a self, key: &'a BlobKey, contents: String) -> BoxFuture<'a, BlobResult<()>> {
        let mut state = self.state();
        state.writes.push(WriteCall {
            key: key.clone(),
            content: contents.clone(),
            at: Instant::now(),
        });

        let result = if state.fail_all_writes || state.failing_writes > 0 {
            state.failing_writes = state.failing_writes.saturating_sub(1);
            Err(BlobError::Transport("503 Service Unavailable".into()))
        } else {
            state.blobs.insert(key.clone(), contents);
            Ok(())
        };
        future::ready(result).boxed()
    }

    fn remove<'a>(&'a self, key: &'a BlobKey) -> BoxFuture<'a, BlobResult<()>> {
        let mut state = self.state();
        state.removes += 1;

        let result = match state.remove_error.clone() {
            Some(error) => Err(error),
            None => {
                state.blobs.remove(key);
                Ok(())
            }
        };
        future::ready(result).boxed()
    }
}

/// An [`ErrorReporter`] that remembers everything it is given.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    entries: Mutex<Vec<(String, BlobError)>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<(String, BlobError)> {
        self.entries.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn log(&self, message: &str, error: &BlobError) {
        self.entries
            .lock()
            .unwrap()
            .push((message.to_owned(), error.clone()));
    }
}

#[derive(Clone, Debug, Default)]
struct ServerState {
    blobs: Arc<Mutex<BTreeMap<String, String>>>,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

fn blob_path(owner: &str, slot: &str) -> String {
    format!("{owner}/{slot}")
}

async fn count_hits(
    State(state): State<ServerState>,
    OriginalUri(uri): OriginalUri,
    request: Request,
    next: Next,
) -> Response {
    {
        let mut hits = state.hits.lock().unwrap();
        *hits.entry(uri.to_string()).or_default() += 1;
    }

    next.run(request).await
}

async fn get_blob(
    State(state): State<ServerState>,
    Path((owner, slot)): Path<(String, String)>,
) -> Result<String, StatusCode> {
    let blobs = state.blobs.lock().unwrap();
    blobs
        .get(&blob_path(&owner, &slot))
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

async fn put_blob(
    State(state): State<ServerState>,
    Path((owner, slot)): Path<(String, String)>,
    body: String,
) -> StatusCode {
    let mut blobs = state.blobs.lock().unwrap();
    blobs.insert(blob_path(&owner, &slot), body);
    StatusCode::NO_CONTENT
}

async fn delete_blob(
    State(state): State<ServerState>,
    Path((owner, slot)): Path<(String, String)>,
) -> StatusCode {
    let mut blobs = state.blobs.lock().unwrap();
    match blobs.remove(&blob_path(&owner, &slot)) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

async fn get_private_blob(
    headers: HeaderMap,
    state: State<ServerState>,
    path: Path<(String, String)>,
) -> Result<String, StatusCode> {
    let expected = format!("Bearer {AUTH_TOKEN}");
    match headers.get(header::AUTHORIZATION) {
        Some(value) if value.as_bytes() == expected.as_bytes() => get_blob(state, path).await,
        Some(_) => Err(StatusCode::FORBIDDEN),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

/// A test server that binds to a random port and serves blobs over HTTP.
///
/// Routes:
///
///  - `/blobs/:owner/:slot`: `GET`, `PUT` and `DELETE` on an in-memory map.
///  - `/private/:owner/:slot`: `GET` that requires `Authorization: Bearer` [`AUTH_TOKEN`].
///  - `/status/:code/:owner/:slot`: responds with the given status code to any method.
///  - `/delay/:time/:owner/:slot`: waits for the given humantime duration, then responds `null`.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct BlobServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    state: ServerState,
}

impl BlobServer {
    pub fn new() -> Self {
        let state = ServerState::default();

        let router = Router::new()
            .route(
                "/blobs/:owner/:slot",
                get(get_blob).put(put_blob).delete(delete_blob),
            )
            .route("/private/:owner/:slot", get(get_private_blob))
            .route(
                "/status/:code/:owner/:slot",
                any(
                    |Path((code, _, _)): Path<(u16, String, String)>| async move {
                        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    },
                ),
            )
            .route(
                "/delay/:time/:owner/:slot",
                get(
                    |Path((time, _, _)): Path<(String, String, String)>| async move {
                        let duration = humantime::parse_duration(&time).unwrap();
                        tokio::time::sleep(duration).await;
                        "null"
                    },
                ),
            )
            .layer(middleware::from_fn_with_state(state.clone(), count_hits))
            .with_state(state.clone());

        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            handle,
            socket,
            state,
        }
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
            .parse()
            .unwrap()
    }

    /// A store configuration pointing to the given path of this server.
    pub fn store_config(&self, path: &str) -> HttpStoreConfig {
        HttpStoreConfig {
            url: self.url(path),
            auth_token: None,
            timeout: Duration::from_secs(5),
        }
    }

    /// Stores a blob directly in the server's map.
    pub fn insert(&self, owner: &str, slot: &str, content: &str) {
        let mut blobs = self.state.blobs.lock().unwrap();
        blobs.insert(blob_path(owner, slot), content.to_owned());
    }

    /// The blob currently held by the server.
    pub fn blob(&self, owner: &str, slot: &str) -> Option<String> {
        let blobs = self.state.blobs.lock().unwrap();
        blobs.get(&blob_path(owner, slot)).cloned()
    }

    /// Returns the number of requests since the last call, and resets the counter.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.state.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns all requested URIs with their request counts, and resets the counter.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.state.hits.lock().unwrap());
        map.into_iter().collect()
    }
}

impl Default for BlobServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BlobServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
