//! Concurrency-limited async file I/O.
//!
//! Every operation resolves to a result record instead of raising, so
//! batched callers can tell partial failures apart without losing the
//! rest of the batch. Reads and writes are throttled by separate
//! semaphores; requests past the limit queue in submission order.

use std::path::PathBuf;

use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::sync::{Semaphore, watch};

use crate::config::FileManagerConfig;

/// Outcome of a single file operation. `data` carries file content for
/// reads and is `None` for writes.
#[derive(Debug, Clone, Serialize)]
pub struct FileOpResult {
    pub path: PathBuf,
    pub success: bool,
    pub data: Option<String>,
    pub error: Option<String>,
}

impl FileOpResult {
    fn ok(path: PathBuf, data: Option<String>) -> Self {
        Self {
            path,
            success: true,
            data,
            error: None,
        }
    }

    fn err(path: PathBuf, error: impl Into<String>) -> Self {
        Self {
            path,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of a typed JSON read.
#[derive(Debug, Clone)]
pub struct JsonOpResult<T> {
    pub path: PathBuf,
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

/// Decrements the pending counter on every exit path, including a
/// caller abandoning the operation while it is still queued.
struct PendingTicket<'a>(&'a watch::Sender<usize>);

impl Drop for PendingTicket<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
    }
}

/// Concurrency-limited file read/write queue.
pub struct AsyncFileManager {
    read_permits: Semaphore,
    write_permits: Semaphore,
    pending: watch::Sender<usize>,
}

impl AsyncFileManager {
    pub fn new(config: &FileManagerConfig) -> Self {
        Self {
            read_permits: Semaphore::new(config.read_concurrency.max(1)),
            write_permits: Semaphore::new(config.write_concurrency.max(1)),
            pending: watch::Sender::new(0),
        }
    }

    fn begin(&self) -> PendingTicket<'_> {
        self.pending.send_modify(|n| *n += 1);
        PendingTicket(&self.pending)
    }

    /// Write `content` to `path`, creating parent directories as needed.
    pub async fn write_file(
        &self,
        path: impl Into<PathBuf>,
        content: impl Into<String>,
    ) -> FileOpResult {
        let path = path.into();
        let content = content.into();
        let _ticket = self.begin();
        let _permit = match self.write_permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return FileOpResult::err(path, "file manager closed"),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent).await {
                    return FileOpResult::err(path, format!("Failed to create directories: {e}"));
                }
            }
        }

        match fs::write(&path, content).await {
            Ok(()) => FileOpResult::ok(path, None),
            Err(e) => FileOpResult::err(path, format!("Failed to write file: {e}")),
        }
    }

    /// Read `path` as UTF-8 text.
    pub async fn read_file(&self, path: impl Into<PathBuf>) -> FileOpResult {
        let path = path.into();
        let _ticket = self.begin();
        let _permit = match self.read_permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return FileOpResult::err(path, "file manager closed"),
        };

        match fs::read_to_string(&path).await {
            Ok(content) => FileOpResult::ok(path, Some(content)),
            Err(e) => FileOpResult::err(path, format!("Failed to read file: {e}")),
        }
    }

    /// Serialize `value` as pretty JSON and write it to `path`.
    pub async fn write_json<T: Serialize>(
        &self,
        path: impl Into<PathBuf>,
        value: &T,
    ) -> FileOpResult {
        let path = path.into();
        match serde_json::to_string_pretty(value) {
            Ok(json) => self.write_file(path, json).await,
            Err(e) => FileOpResult::err(path, format!("Failed to serialize JSON: {e}")),
        }
    }

    /// Read `path` and deserialize its JSON contents.
    pub async fn read_json<T: DeserializeOwned>(&self, path: impl Into<PathBuf>) -> JsonOpResult<T> {
        let read = self.read_file(path).await;
        if !read.success {
            return JsonOpResult {
                path: read.path,
                success: false,
                data: None,
                error: read.error,
            };
        }

        let raw = read.data.unwrap_or_default();
        match serde_json::from_str(&raw) {
            Ok(value) => JsonOpResult {
                path: read.path,
                success: true,
                data: Some(value),
                error: None,
            },
            Err(e) => JsonOpResult {
                path: read.path,
                success: false,
                data: None,
                error: Some(format!("Failed to parse JSON: {e}")),
            },
        }
    }

    /// Write a batch concurrently. Each item reports its own outcome; a
    /// failure never aborts its siblings.
    pub async fn write_batch(&self, items: Vec<(PathBuf, String)>) -> Vec<FileOpResult> {
        join_all(
            items
                .into_iter()
                .map(|(path, content)| self.write_file(path, content)),
        )
        .await
    }

    /// Resolve once every queued and in-flight operation has completed.
    /// Cancels nothing; used for graceful shutdown.
    pub async fn wait_for_pending_operations(&self) {
        let mut rx = self.pending.subscribe();
        // wait_for inspects the current value first, so a drain that
        // finished before we subscribed is still observed.
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }

    /// Operations currently queued or in flight.
    pub fn pending_operations(&self) -> usize {
        *self.pending.borrow()
    }
}
