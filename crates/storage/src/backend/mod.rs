//! Blob driver trait and implementations.
//!
//! This module defines the [`BlobDriver`] trait, which provides a unified
//! interface over one storage account (local filesystem, S3-compatible
//! services, etc.). A coordinator above this crate fans the same logical
//! operation out to several drivers, so every driver has to agree on the
//! flat-keyspace semantics documented on each method.

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::{Fault, MockBackend};
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::{ErrorKind, Result};
use crate::models::{BlobInfo, ListItem, UploadMetadata};
use crate::path;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;
use time::OffsetDateTime;
use tokio::io::AsyncRead;

pub type BlobStream<'a> = Pin<Box<dyn Stream<Item = Result<BlobInfo>> + Send + 'a>>;
pub type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// Unified interface for blob storage drivers.
///
/// All operations are asynchronous. Paths are logical blob names relative to
/// the driver's container and are validated with
/// [`validate`](crate::path::validate) by every implementation, so callers
/// may pass user input straight through.
///
/// # Examples
///
/// ```no_run
/// use blobfan_storage::{backend::BlobDriver, error::Result};
///
/// async fn size_of_readme(driver: &dyn BlobDriver) -> Result<u64> {
///     if driver.exists("docs/readme.txt").await? {
///         Ok(driver.stat("docs/readme.txt").await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait BlobDriver: Send + Sync {
    /// Name of the configured backend (taken from its descriptor). Names are
    /// **supposed** to be unique; they are only used for logging and error
    /// reporting.
    fn name(&self) -> &str;

    /// Short name of the driver implementation (`"local"`, `"s3"`, ...).
    fn kind(&self) -> &'static str;

    /// Stream metadata for every blob whose name starts with `prefix`.
    ///
    /// The prefix is a raw string match, exactly like an object store: pass a
    /// [folder prefix](crate::path::folder_prefix) to stay inside a folder.
    /// The listing is recursive; folder markers are included.
    fn list_stream<'a>(&'a self, prefix: &'a str) -> BlobStream<'a>;

    /// Collect [`list_stream()`](Self::list_stream) into a [`Vec`].
    async fn list(&self, prefix: &str) -> Result<Vec<BlobInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Blob names under `prefix`, optionally restricted to the given
    /// extensions (see [`matches_extension`](crate::path::matches_extension)).
    async fn list_names(&self, prefix: &str, extensions: &[String]) -> Result<Vec<String>> {
        self.list_stream(prefix)
            .try_filter_map(|info| async move {
                Ok(path::matches_extension(&info.path, extensions).then_some(info.path))
            })
            .try_collect()
            .await
    }

    /// List the immediate children of a folder prefix.
    ///
    /// Blobs directly inside the folder come back as [`ListItem::Blob`];
    /// anything deeper is folded into one [`ListItem::Prefix`] per
    /// sub-folder. A folder that doesn't exist is simply empty.
    async fn list_children(&self, folder: &str) -> Result<Vec<ListItem>>;

    /// Check if a blob exists.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Blob metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the blob
    /// does not exist.
    async fn stat(&self, path: &str) -> Result<BlobInfo>;

    /// Open a blob for streaming reads.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the blob
    /// does not exist.
    async fn reader(&self, path: &str) -> Result<BoxAsyncRead>;

    /// Write one upload chunk.
    ///
    /// The first chunk of an upload creates the blob (replacing whatever was
    /// there); later chunks append to it, creating it if it is missing. A
    /// failed call must leave the previous content intact. `mark` is shared
    /// by every driver receiving the same chunk so all replicas record the
    /// same logical write time.
    async fn append(&self, data: &[u8], upload: &UploadMetadata, mark: OffsetDateTime) -> Result<()>;

    /// Delete a blob. Deleting a blob that doesn't exist is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Copy a blob within this backend, overwriting the destination. The
    /// source is left untouched.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the source
    /// does not exist.
    async fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// Total bytes stored in the container.
    async fn bytes_consumed(&self) -> Result<u64> {
        self.list_stream("").try_fold(0u64, |total, info| async move { Ok(total + info.size) }).await
    }

    /// Create the [marker](crate::path::FOLDER_MARKER) for `folder`.
    async fn create_folder(&self, folder: &str) -> Result<()> {
        let marker = path::marker_path(folder)?;
        self.append(&[], &UploadMetadata::single(marker, 0), OffsetDateTime::now_utc()).await
    }

    /// Serve the container as a static website, where the provider supports
    /// it.
    async fn enable_static_website(&self) -> Result<()> {
        exn::bail!(ErrorKind::Unsupported(self.kind().to_string()))
    }
}
