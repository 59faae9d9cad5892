//! Local filesystem blob driver.
//!
//! This module provides a driver implementation for the local filesystem.
//! Blobs are stored as files under a configured container directory and
//! accessed via `tokio::fs` for async I/O. Directories only exist as a side
//! effect of blob names containing `/`, and are pruned again once empty, so
//! listings behave like those of an object store.

use crate::backend::{BlobDriver, BlobStream, BoxAsyncRead};
use crate::error::{ErrorKind, Result};
use crate::models::{BlobInfo, ListItem, UploadMetadata};
use crate::path::{self, validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use time::OffsetDateTime;
use tokio::fs::{self, DirEntry, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Suffix of in-flight chunk files; these never show up in listings.
const TEMP_SUFFIX: &str = ".blobfan-tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

enum WalkEntry {
    File(BlobInfo),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem blob driver.
///
/// All blob names are relative to the configured container directory.
///
/// # Examples
///
/// ```no_run
/// use blobfan_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("local", "/srv/blobfan/site")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Container directory
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem driver, creating the container
    /// directory if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute or is not a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root.display().to_string()));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root.display().to_string()));
            }
        } else {
            // Use non-async here; it only happens when the driver is built and
            // it's not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| ErrorKind::io(e, &root.display().to_string()))?;
        }
        Ok(Self { name: name.into(), root })
    }

    /// Get the absolute path for a blob name.
    fn absolute_path(&self, path: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(path)?))
    }

    /// Convert an absolute path back to a blob name.
    fn relative_path(&self, absolute: &Path) -> Result<String> {
        let relative = absolute.strip_prefix(&self.root).map_err(|_| {
            ErrorKind::BackendError(format!("path `{}` is not within root `{}`", absolute.display(), self.root.display()))
        })?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component.as_os_str().to_str() {
                Some(segment) => segments.push(segment),
                None => exn::bail!(ErrorKind::InvalidPath(relative.display().to_string())),
            }
        }
        Ok(segments.join("/"))
    }

    /// Re-use same data collection from file metadata for both list and stat functions
    fn blob_info(path: &str, metadata: &Metadata) -> Result<BlobInfo> {
        let modified = metadata.modified().map_err(|e| ErrorKind::io(e, path))?.into();
        let info = BlobInfo::new(path, metadata.len(), modified);
        Ok(match metadata.created() {
            Ok(created) => info.with_created(created.into()),
            Err(_) => info,
        })
    }

    fn is_temp(name: &str) -> bool {
        name.ends_with(TEMP_SUFFIX)
    }

    /// Sibling path for writing a blob before it is moved into place.
    fn temp_path(target: &Path) -> PathBuf {
        let file_name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let unique = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        target.with_file_name(format!(".{file_name}.{}-{unique}{TEMP_SUFFIX}", std::process::id()))
    }

    async fn create_parent(&self, absolute: &Path, path: &str) -> Result<()> {
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await.map_err(|e| ErrorKind::io(e, path))?;
        }
        Ok(())
    }

    /// Remove directories left empty by a delete, stopping at the first one
    /// that still has content (or at the container root).
    async fn prune_empty_parents(&self, absolute: &Path) {
        let mut current = absolute.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }

    /// Write the first chunk of an upload aside and rename it over the blob.
    async fn replace(&self, target: &Path, data: &[u8], path: &str, mark: OffsetDateTime) -> Result<()> {
        let temp = Self::temp_path(target);
        let written: std::io::Result<()> = async {
            let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&temp).await?;
            file.write_all(data).await?;
            file.flush().await?;
            // Every replica of this chunk carries the same logical write time.
            file.into_std().await.set_modified(SystemTime::from(mark))?;
            fs::rename(&temp, target).await
        }
        .await;
        if let Err(e) = written {
            _ = fs::remove_file(&temp).await;
            exn::bail!(ErrorKind::io(e, path));
        }
        Ok(())
    }

    /// Append a later chunk to the blob in place, truncating it back to its
    /// previous length if the write fails part way.
    async fn append_in_place(&self, target: &Path, data: &[u8], path: &str, mark: OffsetDateTime) -> Result<()> {
        let previous_len = match fs::metadata(target).await {
            Ok(metadata) => Some(metadata.len()),
            Err(e) if is_missing(&e) => None,
            Err(e) => exn::bail!(ErrorKind::io(e, path)),
        };
        let written: std::io::Result<()> = async {
            let mut file = OpenOptions::new().create(true).append(true).open(target).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.into_std().await.set_modified(SystemTime::from(mark))
        }
        .await;
        if let Err(e) = written {
            Self::restore(target, previous_len).await;
            exn::bail!(ErrorKind::io(e, path));
        }
        Ok(())
    }

    /// Put a blob back to `previous_len` bytes, or remove it when the failed
    /// chunk is what created it.
    async fn restore(target: &Path, previous_len: Option<u64>) {
        let restored = match previous_len {
            Some(len) => match OpenOptions::new().write(true).open(target).await {
                Ok(file) => file.set_len(len).await,
                Err(e) => Err(e),
            },
            None => fs::remove_file(target).await,
        };
        match restored {
            Ok(()) => {},
            Err(e) if is_missing(&e) => {},
            Err(e) => tracing::warn!(path = %target.display(), error = %e, "Could not restore blob after failed append"),
        }
    }

    async fn process_entry(&self, entry: DirEntry, prefix: &str) -> Result<WalkEntry> {
        let absolute = entry.path();
        let relative = self.relative_path(&absolute)?;
        let metadata = entry.metadata().await.map_err(|e| ErrorKind::io(e, &relative))?;
        if metadata.is_dir() {
            // Only descend when something below this directory could match.
            let folder = format!("{relative}/");
            return Ok(match folder.starts_with(prefix) || prefix.starts_with(&folder) {
                true => WalkEntry::Descend(absolute),
                false => WalkEntry::Skip,
            });
        }
        if metadata.is_file() && relative.starts_with(prefix) && !Self::is_temp(&relative) {
            return Ok(WalkEntry::File(Self::blob_info(&relative, &metadata)?));
        }
        // Note: silently drop what is most likely a broken symlink.
        Ok(WalkEntry::Skip)
    }
}

/// Blob names form a flat keyspace, so a path running through an existing
/// blob (`readme.txt/x`) is just as absent as one that was never written.
fn is_missing(err: &std::io::Error) -> bool {
    matches!(err.kind(), std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory)
}

#[async_trait]
impl BlobDriver for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "local"
    }

    fn list_stream<'a>(&'a self, prefix: &'a str) -> BlobStream<'a> {
        // Walk from the deepest directory the prefix fully names, so "docs/re"
        // starts in "docs" and matches "docs/readme.txt" and "docs/recipes/a".
        let start_dir = match prefix.rsplit_once('/') {
            Some((dir, _)) => match path::normalize(dir) {
                Ok(dir) => self.root.join(dir),
                Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
            },
            None => self.root.clone(),
        };
        let mut stack = vec![start_dir];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // Listing a folder that doesn't exist yields nothing, the
                    // same as an object store.
                    Err(err) if is_missing(&err) => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(ErrorKind::io(err, prefix)));
                        continue 'dirs;
                    }
                };
                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(ErrorKind::io(e, prefix))); continue 'entries; },
                    };
                    match self.process_entry(entry, prefix).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn list_children(&self, folder: &str) -> Result<Vec<ListItem>> {
        let prefix = path::folder_prefix(folder)?;
        let dir = self.root.join(&prefix);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if is_missing(&e) => return Ok(Vec::new()),
            Err(e) => exn::bail!(ErrorKind::io(e, &prefix)),
        };
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| ErrorKind::io(e, &prefix))? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let metadata = entry.metadata().await.map_err(|e| ErrorKind::io(e, &name))?;
            if metadata.is_dir() {
                children.push(ListItem::Prefix(format!("{prefix}{name}/")));
            } else if metadata.is_file() && !Self::is_temp(&name) {
                children.push(ListItem::Blob(Self::blob_info(&format!("{prefix}{name}"), &metadata)?));
            }
        }
        children.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(children)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let absolute = self.absolute_path(path)?;
        match fs::metadata(&absolute).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => exn::bail!(ErrorKind::io(e, path)),
        }
    }

    async fn stat(&self, path: &str) -> Result<BlobInfo> {
        let absolute = self.absolute_path(path)?;
        let metadata = fs::metadata(&absolute).await.map_err(|e| ErrorKind::io(e, path))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_string()));
        }
        Self::blob_info(&validate_path(path)?, &metadata)
    }

    async fn reader(&self, path: &str) -> Result<BoxAsyncRead> {
        let absolute = self.absolute_path(path)?;
        let file = fs::File::open(&absolute).await.map_err(|e| ErrorKind::io(e, path))?;
        Ok(Box::pin(file))
    }

    async fn append(&self, data: &[u8], upload: &UploadMetadata, mark: OffsetDateTime) -> Result<()> {
        let target = self.absolute_path(&upload.path)?;
        self.create_parent(&target, &upload.path).await?;
        match upload.is_first_chunk() {
            true => self.replace(&target, data, &upload.path, mark).await,
            false => self.append_in_place(&target, data, &upload.path, mark).await,
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let absolute = self.absolute_path(path)?;
        match fs::remove_file(&absolute).await {
            Ok(()) => {},
            Err(e) if is_missing(&e) => return Ok(()),
            Err(e) => exn::bail!(ErrorKind::io(e, path)),
        }
        self.prune_empty_parents(&absolute).await;
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let source = self.absolute_path(from)?;
        let target = self.absolute_path(to)?;
        if !fs::metadata(&source).await.map_err(|e| ErrorKind::io(e, from))?.is_file() {
            exn::bail!(ErrorKind::NotFound(from.to_string()));
        }
        self.create_parent(&target, to).await?;
        let temp = Self::temp_path(&target);
        if let Err(e) = fs::copy(&source, &temp).await {
            _ = fs::remove_file(&temp).await;
            exn::bail!(ErrorKind::io(e, from));
        }
        fs::rename(&temp, &target).await.map_err(|e| ErrorKind::io(e, to))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::io::Write;
    use time::macros::datetime;
    use tokio::io::AsyncReadExt;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("local", temp_dir.path()).unwrap();
        (temp_dir, backend)
    }

    async fn put(backend: &LocalBackend, path: &str, data: &[u8]) {
        let upload = UploadMetadata::single(path, data.len() as u64);
        backend.append(data, &upload, OffsetDateTime::now_utc()).await.unwrap();
    }

    async fn read_all(backend: &LocalBackend, path: &str) -> Vec<u8> {
        let mut reader = backend.reader(path).await.unwrap();
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await.unwrap();
        buffer
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new("name", temp_dir.path()).is_ok());
        assert!(LocalBackend::new("name", temp_dir.path().join("created/on/demand")).is_ok());
        assert!(temp_dir.path().join("created/on/demand").is_dir());
        assert!(LocalBackend::new("name", "relative/path").is_err());
    }

    #[test]
    fn test_relative_path() {
        let (temp_dir, backend) = backend();
        let abs = temp_dir.path().join("docs/readme.txt");
        assert_eq!(backend.relative_path(&abs).unwrap(), "docs/readme.txt");
        assert!(backend.relative_path(Path::new("/other/file.txt")).is_err());
        assert!(backend.absolute_path("../etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_append_creates_then_appends() {
        let (_temp_dir, backend) = backend();
        let first = UploadMetadata::single("docs/big.bin", 6).with_chunk(0, 2);
        let second = UploadMetadata::single("docs/big.bin", 6).with_chunk(1, 2);
        backend.append(b"abc", &first, OffsetDateTime::now_utc()).await.unwrap();
        backend.append(b"def", &second, OffsetDateTime::now_utc()).await.unwrap();
        assert_eq!(read_all(&backend, "docs/big.bin").await, b"abcdef");
        // A new upload starts over.
        backend.append(b"xyz", &first, OffsetDateTime::now_utc()).await.unwrap();
        assert_eq!(read_all(&backend, "docs/big.bin").await, b"xyz");
        assert_eq!(backend.list_names("docs/", &[]).await.unwrap(), vec!["docs/big.bin".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_append_restores_blob() {
        let (temp_dir, backend) = backend();
        put(&backend, "docs/big.bin", b"abc").await;
        let target = temp_dir.path().join("docs/big.bin");
        // Half of a later chunk made it to disk before the write failed.
        std::fs::OpenOptions::new().append(true).open(&target).unwrap().write_all(b"de").unwrap();
        LocalBackend::restore(&target, Some(3)).await;
        assert_eq!(read_all(&backend, "docs/big.bin").await, b"abc");

        // A chunk that created the blob takes it away again.
        std::fs::write(temp_dir.path().join("docs/new.bin"), b"partial").unwrap();
        LocalBackend::restore(&temp_dir.path().join("docs/new.bin"), None).await;
        assert!(!backend.exists("docs/new.bin").await.unwrap());
        LocalBackend::restore(&temp_dir.path().join("docs/new.bin"), None).await;
    }

    #[tokio::test]
    async fn test_failed_append_leaves_blob_alone() {
        let (_temp_dir, backend) = backend();
        put(&backend, "docs/readme.txt", b"data").await;
        // The parent of this blob is a file, so the write can't even start.
        let upload = UploadMetadata::single("docs/readme.txt/more.txt", 4).with_chunk(1, 2);
        assert!(backend.append(b"more", &upload, OffsetDateTime::now_utc()).await.is_err());
        assert_eq!(read_all(&backend, "docs/readme.txt").await, b"data");
    }

    #[tokio::test]
    async fn test_append_without_first_chunk_creates() {
        let (_temp_dir, backend) = backend();
        let upload = UploadMetadata::single("late.bin", 3).with_chunk(3, 4);
        backend.append(b"end", &upload, OffsetDateTime::now_utc()).await.unwrap();
        assert_eq!(read_all(&backend, "late.bin").await, b"end");
    }

    #[tokio::test]
    async fn test_append_stamps_mark() {
        let (_temp_dir, backend) = backend();
        let mark = datetime!(2024-03-01 12:00:00 UTC);
        let upload = UploadMetadata::single("stamped.txt", 2);
        backend.append(b"hi", &upload, mark).await.unwrap();
        assert_eq!(backend.stat("stamped.txt").await.unwrap().modified, mark);
    }

    #[tokio::test]
    async fn test_temp_files_are_hidden() {
        let (temp_dir, backend) = backend();
        std::fs::write(temp_dir.path().join(format!(".x.1-1{TEMP_SUFFIX}")), b"partial").unwrap();
        put(&backend, "visible.txt", b"data").await;
        let names = backend.list_names("", &[]).await.unwrap();
        assert_eq!(names, vec!["visible.txt".to_string()]);
        assert_eq!(backend.list_children("").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exists_and_stat() {
        let (_temp_dir, backend) = backend();
        assert!(!backend.exists("nonexistent.txt").await.unwrap());
        put(&backend, "docs/readme.txt", b"Hello, world!").await;
        assert!(backend.exists("/docs/readme.txt").await.unwrap());
        // Directories are not blobs.
        assert!(!backend.exists("docs").await.unwrap());
        let info = backend.stat("/docs/readme.txt").await.unwrap();
        assert_eq!(info.path, "docs/readme.txt");
        assert_eq!(info.size, 13);
        let err = backend.stat("docs").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_paths_through_a_blob_are_absent() {
        let (_temp_dir, backend) = backend();
        put(&backend, "readme.txt", b"data").await;
        assert!(!backend.exists("readme.txt/x").await.unwrap());
        let err = backend.stat("readme.txt/x").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let err = backend.reader("readme.txt/x").await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        assert!(backend.list_children("readme.txt").await.unwrap().is_empty());
        assert!(backend.list("readme.txt/").await.unwrap().is_empty());
        assert!(backend.list("readme.txt/x/").await.unwrap().is_empty());
        backend.delete("readme.txt/x").await.unwrap();
        assert_eq!(read_all(&backend, "readme.txt").await, b"data");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_prunes() {
        let (temp_dir, backend) = backend();
        put(&backend, "a/b/c/file.txt", b"data").await;
        put(&backend, "a/keep.txt", b"data").await;
        backend.delete("a/b/c/file.txt").await.unwrap();
        assert!(!backend.exists("a/b/c/file.txt").await.unwrap());
        assert!(!temp_dir.path().join("a/b").exists());
        assert!(temp_dir.path().join("a").exists());
        backend.delete("a/b/c/file.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_copy() {
        let (_temp_dir, backend) = backend();
        put(&backend, "docs/readme.txt", b"data").await;
        backend.copy("docs/readme.txt", "archive/readme.txt").await.unwrap();
        assert!(backend.exists("docs/readme.txt").await.unwrap());
        assert_eq!(read_all(&backend, "archive/readme.txt").await, b"data");
        let err = backend.copy("missing.txt", "other.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_stream_raw_prefix() {
        let (_temp_dir, backend) = backend();
        put(&backend, "docs/readme.txt", b"1").await;
        put(&backend, "docs/recipes/cake.txt", b"2").await;
        put(&backend, "docs/other.txt", b"3").await;
        put(&backend, "docs2/readme.txt", b"4").await;
        let mut names: Vec<String> =
            backend.list_stream("docs/re").map_ok(|info| info.path).try_collect().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["docs/readme.txt", "docs/recipes/cake.txt"]);
        assert_eq!(backend.list("docs/").await.unwrap().len(), 3);
        assert_eq!(backend.list("docs").await.unwrap().len(), 4);
        assert_eq!(backend.list("nonexistent/").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_list_children() {
        let (_temp_dir, backend) = backend();
        put(&backend, "docs/readme.txt", b"1").await;
        put(&backend, "docs/sub/deep.txt", b"2").await;
        backend.create_folder("docs/empty").await.unwrap();
        let children = backend.list_children("/docs").await.unwrap();
        let names: Vec<&str> = children.iter().map(ListItem::name).collect();
        assert_eq!(names, vec!["docs/empty/", "docs/readme.txt", "docs/sub/"]);
        assert!(children[0].is_prefix());
        assert!(backend.exists("docs/empty/folder.stubxx").await.unwrap());
        assert!(backend.list_children("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bytes_consumed() {
        let (_temp_dir, backend) = backend();
        put(&backend, "a.txt", b"12345").await;
        put(&backend, "b/c.txt", b"123").await;
        assert_eq!(backend.bytes_consumed().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_static_website_unsupported() {
        let (_temp_dir, backend) = backend();
        let err = backend.enable_static_website().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unsupported(kind) if kind == "local"));
    }

    #[tokio::test]
    async fn test_path_security() {
        let (_temp_dir, backend) = backend();
        assert!(backend.reader("../etc/passwd").await.is_err());
        assert!(backend.exists("etc/../../passwd").await.is_err());
        assert!(backend.delete("../../file").await.is_err());
        let upload = UploadMetadata::single("../escape", 3);
        assert!(backend.append(b"bad", &upload, OffsetDateTime::now_utc()).await.is_err());
    }
}
