//! In-memory blob driver for testing.

use crate::backend::{BlobDriver, BlobStream, BoxAsyncRead};
use crate::error::{ErrorKind, Result};
use crate::models::{BlobInfo, ListItem, UploadMetadata};
use crate::path::{self, validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Failure modes that can be switched on for a [`MockBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `append` fails without touching the stored blob.
    FailWrites,
    /// `delete` fails without removing anything.
    FailDeletes,
    /// `copy` fails without writing the destination.
    FailCopies,
    /// `copy` reports success but never writes the destination, like a
    /// replica that silently lost the request.
    DropCopies,
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Vec<u8>,
    created: OffsetDateTime,
    modified: OffsetDateTime,
    content_type: Option<String>,
}

/// In-memory blob driver for testing.
///
/// Blobs are stored in a `BTreeMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Faults can be
/// injected at any time to simulate a misbehaving replica, and every trait
/// call is counted so tests can assert that no I/O happened at all.
///
/// # Examples
///
/// ```
/// use blobfan_storage::backend::{BlobDriver, Fault, MockBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("docs/readme.txt", b"hello")]);
/// assert!(backend.exists("docs/readme.txt").await?);
///
/// backend.inject(Fault::DropCopies);
/// backend.copy("docs/readme.txt", "docs/copy.txt").await?;
/// assert!(!backend.exists("docs/copy.txt").await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<BTreeMap<String, StoredBlob>>,
    faults: Mutex<HashSet<Fault>>,
    operations: AtomicUsize,
    website: AtomicBool,
}

impl MockBackend {
    /// Create a mock backend pre-populated with blobs.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = BTreeMap::new();
        let now = OffsetDateTime::now_utc();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                // The panic here is DELIBERATE. MockBackend is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockBackend::with_files: invalid path {path}");
            };
            let blob = StoredBlob {
                data: data.into(),
                created: now,
                modified: now,
                content_type: None,
            };
            map.insert(validated, blob);
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            faults: Mutex::new(HashSet::new()),
            operations: AtomicUsize::new(0),
            website: AtomicBool::new(false),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_fault(self, fault: Fault) -> Self {
        self.inject(fault);
        self
    }

    /// Switch a fault on for every following call.
    pub fn inject(&self, fault: Fault) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).insert(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Number of [`BlobDriver`] calls made against this backend.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    pub fn website_enabled(&self) -> bool {
        self.website.load(Ordering::SeqCst)
    }

    /// Snapshot of every stored blob name, in order.
    pub async fn paths(&self) -> Vec<String> {
        self.storage.read().await.keys().cloned().collect()
    }

    /// Contents of a blob, bypassing faults and the operation counter.
    pub async fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.storage.read().await.get(path).map(|blob| blob.data.clone())
    }

    fn record(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }

    fn has_fault(&self, fault: Fault) -> bool {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).contains(&fault)
    }

    fn fail(&self, operation: &str) -> exn::Exn<ErrorKind> {
        exn::Exn::from(ErrorKind::BackendError(format!("{}: injected {operation} failure", self.name)))
    }

    fn blob_info(path: &str, blob: &StoredBlob) -> BlobInfo {
        let info = BlobInfo::new(path, blob.data.len() as u64, blob.modified).with_created(blob.created);
        match &blob.content_type {
            Some(content_type) => info.with_content_type(content_type),
            None => info,
        }
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl BlobDriver for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "mock"
    }

    fn list_stream<'a>(&'a self, prefix: &'a str) -> BlobStream<'a> {
        self.record();
        Box::pin(stream! {
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let entries: Vec<BlobInfo> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| path.starts_with(prefix))
                    .map(|(path, blob)| Self::blob_info(path, blob))
                    .collect()
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn list_children(&self, folder: &str) -> Result<Vec<ListItem>> {
        self.record();
        let prefix = path::folder_prefix(folder)?;
        let guard = self.storage.read().await;
        let mut folders = BTreeSet::new();
        let mut children = Vec::new();
        for (name, blob) in guard.range(prefix.clone()..) {
            let Some(rest) = name.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    folders.insert(format!("{prefix}{folder}/"));
                },
                None => children.push(ListItem::Blob(Self::blob_info(name, blob))),
            }
        }
        children.extend(folders.into_iter().map(ListItem::Prefix));
        children.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(children)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.record();
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn stat(&self, path: &str) -> Result<BlobInfo> {
        self.record();
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let blob = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(Self::blob_info(&path, blob))
    }

    async fn reader(&self, path: &str) -> Result<BoxAsyncRead> {
        self.record();
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let blob = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(Box::pin(std::io::Cursor::new(blob.data.clone())))
    }

    async fn append(&self, data: &[u8], upload: &UploadMetadata, mark: OffsetDateTime) -> Result<()> {
        self.record();
        let path = validate_path(&upload.path)?;
        if self.has_fault(Fault::FailWrites) {
            return Err(self.fail("write"));
        }
        let mut guard = self.storage.write().await;
        match guard.get_mut(&path) {
            Some(blob) if !upload.is_first_chunk() => {
                blob.data.extend_from_slice(data);
                blob.modified = mark;
            },
            _ => {
                let blob = StoredBlob {
                    data: data.to_vec(),
                    created: mark,
                    modified: mark,
                    content_type: upload.content_type.clone(),
                };
                guard.insert(path, blob);
            },
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.record();
        let path = validate_path(path)?;
        if self.has_fault(Fault::FailDeletes) {
            return Err(self.fail("delete"));
        }
        self.storage.write().await.remove(&path);
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.record();
        let from = validate_path(from)?;
        let to = validate_path(to)?;
        if self.has_fault(Fault::FailCopies) {
            return Err(self.fail("copy"));
        }
        let mut guard = self.storage.write().await;
        let mut blob = guard.get(&from).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(from)))?;
        if self.has_fault(Fault::DropCopies) {
            return Ok(());
        }
        let now = OffsetDateTime::now_utc();
        blob.created = now;
        blob.modified = now;
        guard.insert(to, blob);
        Ok(())
    }

    async fn enable_static_website(&self) -> Result<()> {
        self.record();
        self.website.store(true, Ordering::SeqCst);
        Ok(())
    }
}
