//! Common test utilities for gcman integration tests
//!
//! Provides a temp-dir fixture, file helpers and a minimal HTTP settings
//! endpoint for exercising the HTTP backend.

#![allow(dead_code)]

use gcman::{ConfigStore, StoreConfig, StoreConfigBuilder};
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// =============================================================================
// Test Fixture
// =============================================================================

/// Temp directory holding the local settings file.
pub struct TestFixture {
    pub temp_dir: TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self { temp_dir }
    }

    /// Builder pointing at the fixture's settings file, autosave off.
    pub fn builder(&self) -> StoreConfigBuilder {
        StoreConfig::builder("test-bot")
            .file(self.settings_path())
            .autosave_interval_ms(0)
    }

    pub fn config(&self) -> StoreConfig {
        self.builder().build()
    }

    /// Store over the local file, already loaded.
    pub async fn open(&self) -> ConfigStore {
        ConfigStore::open(self.config())
            .await
            .expect("Failed to open store")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.temp_dir.path().join("settings.json")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// `file://` URL for a file inside the fixture directory.
    pub fn file_url(&self, name: &str) -> String {
        format!("file://{}", self.path(name).display())
    }

    /// Files in the fixture directory whose name starts with `prefix`.
    pub fn files_starting_with(&self, prefix: &str) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = std::fs::read_dir(self.temp_dir.path())
            .expect("Failed to list temp dir")
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with(prefix))
            })
            .collect();
        found.sort();
        found
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Read and parse a JSON file, `None` if missing or unparseable.
pub fn read_json(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

pub fn write_json(path: &Path, value: &Value) {
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Await a future with a five second limit.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

// =============================================================================
// HTTP Settings Endpoint
// =============================================================================

#[derive(Default)]
struct StubState {
    /// Body served on GET; `None` answers 404
    document: Option<String>,
    posts: usize,
    gets: usize,
    fail_status: Option<u16>,
    post_delay: Option<Duration>,
    last_authorization: Option<String>,
}

/// One-route HTTP server: GET returns the stored document, POST replaces it.
///
/// Every response closes the connection.
#[derive(Clone)]
pub struct HttpStub {
    pub url: String,
    state: Arc<Mutex<StubState>>,
}

impl HttpStub {
    pub async fn start(initial: Option<Value>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(StubState {
            document: initial.map(|v| v.to_string()),
            ..StubState::default()
        }));

        let shared = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, Arc::clone(&shared)));
            }
        });

        Self {
            url: format!("http://{addr}/settings"),
            state,
        }
    }

    /// Same endpoint with basic-auth credentials embedded in the URL.
    pub fn url_with_credentials(&self, user: &str, password: &str) -> String {
        self.url
            .replacen("http://", &format!("http://{user}:{password}@"), 1)
    }

    pub fn document(&self) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state
            .document
            .as_deref()
            .and_then(|d| serde_json::from_str(d).ok())
    }

    pub fn posts(&self) -> usize {
        self.state.lock().unwrap().posts
    }

    pub fn gets(&self) -> usize {
        self.state.lock().unwrap().gets
    }

    /// Answer every request with `status` (or stop failing with `None`).
    pub fn fail_with(&self, status: Option<u16>) {
        self.state.lock().unwrap().fail_status = status;
    }

    /// Hold every POST for `delay` before answering.
    pub fn slow_posts(&self, delay: Duration) {
        self.state.lock().unwrap().post_delay = Some(delay);
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.state.lock().unwrap().last_authorization.clone()
    }
}

async fn serve(mut socket: TcpStream, state: Arc<Mutex<StubState>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let method = head.split_whitespace().next().unwrap_or_default().to_string();
    let header = |name: &str| {
        head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    };
    let length: usize = header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let authorization = header("authorization");

    while buf.len() < header_end + length {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..header_end + length]).into_owned();

    let delay = {
        let state = state.lock().unwrap();
        if method == "POST" { state.post_delay } else { None }
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let (status, reply) = {
        let mut state = state.lock().unwrap();
        state.last_authorization = authorization;
        match (state.fail_status, method.as_str()) {
            (Some(status), _) => (status, String::new()),
            (None, "GET") => {
                state.gets += 1;
                match &state.document {
                    Some(document) => (200, document.clone()),
                    None => (404, String::new()),
                }
            }
            (None, "POST") => {
                state.posts += 1;
                state.document = Some(body);
                (200, "{}".to_string())
            }
            _ => (405, String::new()),
        }
    };

    let response = format!(
        "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
        reply.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}
