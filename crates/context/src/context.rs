use crate::driver_set::{CloudDriverFactory, DriverFactory, DriverSet, resolve};
use crate::entry::FileManagerEntry;
use crate::error::{Error, ErrorKind, Result};
use crate::fanout::BatchReport;
use blobfan_config::Config;
use blobfan_storage::error::{Error as StorageError, ErrorKind as StorageErrorKind};
use blobfan_storage::{BoxAsyncRead, DriverHandle, ListItem, UploadMetadata, path};
use exn::ResultExt;
use futures::future::try_join_all;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Copy,
    Move,
}

/// Front door for every blob operation.
///
/// Reads (existence checks, entries, streams, listings) are answered by the
/// primary backend alone. Writes are fanned out to every backend and wait for
/// all of them; the first failure is returned and nothing is rolled back,
/// except by [`copy_path()`](Self::copy_path) and
/// [`rename_path()`](Self::rename_path), which verify each copy and remove it
/// again from every backend if any backend is missing it.
///
/// Drivers are resolved from the configuration snapshot on every call.
pub struct StorageContext {
    config: Config,
    container: Option<String>,
    factory: Arc<dyn DriverFactory>,
}

impl StorageContext {
    /// Coordinator over the real drivers described by `config`.
    pub fn new(config: Config) -> Self {
        Self::with_factory(config, CloudDriverFactory)
    }

    /// Coordinator building its drivers with `factory`.
    pub fn with_factory(config: Config, factory: impl DriverFactory + 'static) -> Self {
        let container = config.container().map(str::to_string);
        Self { config, container, factory: Arc::new(factory) }
    }

    /// Whether there is at least one backend, a usable primary and a
    /// container. An unconfigured context fails every other call with
    /// [`NotConfigured`](ErrorKind::NotConfigured).
    pub fn is_configured(&self) -> bool {
        self.config.primary_descriptor().is_some() && self.container_name().is_some()
    }

    pub fn container_name(&self) -> Option<&str> {
        self.container.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// Switch every later call to another container.
    pub fn set_container_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        tracing::debug!(container = %name, "Switching container");
        self.container = Some(name);
    }

    /// Resolve the driver set for the current container.
    pub async fn drivers(&self) -> Result<DriverSet> {
        let container = self.container_name().ok_or(ErrorKind::NotConfigured)?;
        resolve(&self.config, container, self.factory.as_ref()).await
    }

    #[instrument(skip(self))]
    pub async fn blob_exists(&self, path: &str) -> Result<bool> {
        let path = blob_path(path)?;
        let drivers = self.drivers().await?;
        let primary = drivers.primary();
        primary.exists(&path).await.or_raise(|| backend(primary))
    }

    /// Copy a blob, or a folder with everything below it, on every backend.
    /// The source is left in place.
    #[instrument(skip(self))]
    pub async fn copy_path(&self, source: &str, destination: &str) -> Result<()> {
        self.transfer(source, destination, Transfer::Copy).await
    }

    /// Move a blob, or a folder with everything below it, on every backend.
    #[instrument(skip(self))]
    pub async fn rename_path(&self, source: &str, destination: &str) -> Result<()> {
        self.transfer(source, destination, Transfer::Move).await
    }

    async fn transfer(&self, source: &str, destination: &str, transfer: Transfer) -> Result<()> {
        let from = folder_path(source)?;
        if from.is_empty() {
            exn::bail!(ErrorKind::RootFolder);
        }
        let to = folder_path(destination)?;
        if to.is_empty() || path::is_within(&to, &from) {
            exn::bail!(ErrorKind::InvalidPath(destination.to_string()));
        }
        let drivers = self.drivers().await?;
        let primary = drivers.primary();
        let pairs: Vec<(String, String)> = primary
            .list(&from)
            .await
            .or_raise(|| backend(primary))?
            .into_iter()
            .filter_map(|info| path::rebase(&info.path, &from, &to).map(|target| (info.path, target)))
            .collect();
        if pairs.is_empty() {
            exn::bail!(ErrorKind::NotFound(from));
        }
        tracing::debug!(blobs = pairs.len(), %from, %to, ?transfer, "Transferring blobs");

        // Every destination is checked before the first copy, so a conflict
        // never leaves a half-done transfer behind.
        for (_, target) in &pairs {
            let found = BatchReport::run(drivers.all(), |driver| driver.exists(target)).await.require_all()?;
            if let Some(taken) = drivers.all().zip(found).find_map(|(driver, exists)| exists.then(|| driver.name())) {
                exn::bail!(ErrorKind::AlreadyExists { path: target.clone(), backend: taken.to_string() });
            }
        }

        for (committed, (name, target)) in pairs.iter().enumerate() {
            self.copy_verified(&drivers, name, target, committed).await?;
            if transfer == Transfer::Move {
                BatchReport::run(drivers.all(), |driver| driver.delete(name)).await.require_all()?;
            }
        }
        Ok(())
    }

    /// Copy one blob on every backend and check that it arrived everywhere,
    /// deleting the destination from every backend otherwise.
    async fn copy_verified(&self, drivers: &DriverSet, name: &str, target: &str, committed: usize) -> Result<()> {
        let copies = BatchReport::run(drivers.all(), |driver| driver.copy(name, target)).await;
        let checks = BatchReport::run(drivers.all(), |driver| driver.exists(target)).await;
        let missing: Vec<&str> = checks
            .outcomes()
            .iter()
            .filter(|outcome| !matches!(outcome.result, Ok(true)))
            .map(|outcome| outcome.backend.as_str())
            .collect();
        if copies.is_success() && missing.is_empty() {
            return Ok(());
        }

        tracing::warn!(from = name, to = target, ?missing, "Copy verification failed; rolling back destination");
        let rollback = BatchReport::run(drivers.all(), |driver| driver.delete(target)).await;
        for (backend, err) in rollback.failures() {
            tracing::warn!(%backend, to = target, error = ?err, "Rollback delete failed; destination left behind");
        }
        if committed > 0 {
            tracing::warn!(committed, "Transfer halted; blobs transferred earlier are kept");
        }
        let kind = ErrorKind::CopyVerification { from: name.to_string(), to: target.to_string(), committed };
        let cause = copies.into_outcomes().into_iter().find_map(|outcome| outcome.result.err());
        Err(match cause {
            Some(err) => err.raise(kind),
            None => Error::from(kind),
        })
    }

    /// Delete every blob below `folder` on every backend. Deleting a folder
    /// with nothing in it does nothing.
    #[instrument(skip(self))]
    pub async fn delete_folder(&self, folder: &str) -> Result<()> {
        let folder = folder_path(folder)?;
        if folder.is_empty() {
            exn::bail!(ErrorKind::RootFolder);
        }
        let prefix = path::folder_prefix(&folder).or_raise(|| ErrorKind::InvalidPath(folder.clone()))?;
        let drivers = self.drivers().await?;
        let primary = drivers.primary();
        let names = primary.list_names(&prefix, &[]).await.or_raise(|| backend(primary))?;
        tracing::debug!(blobs = names.len(), %folder, "Deleting folder");
        for name in &names {
            BatchReport::run(drivers.all(), |driver| driver.delete(name)).await.require_all()?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        self.delete_file_report(path).await?.require_all()?;
        Ok(())
    }

    /// Delete a blob on every backend, reporting each backend's outcome
    /// instead of failing on the first error.
    pub async fn delete_file_report(&self, path: &str) -> Result<BatchReport<()>> {
        let path = blob_path(path)?;
        let drivers = self.drivers().await?;
        Ok(BatchReport::run(drivers.all(), |driver| driver.delete(&path)).await)
    }

    /// Entry for a blob, a folder, or a folder's marker blob.
    #[instrument(skip(self))]
    pub async fn get_file(&self, path: &str) -> Result<FileManagerEntry> {
        let target = folder_path(path)?;
        let drivers = self.drivers().await?;
        let primary = drivers.primary();
        if target.is_empty() {
            return folder_entry(primary, &target).await;
        }
        if path::is_marker(&target) {
            // A marker stands for its folder, but only while it is stored.
            return match primary.stat(&target).await {
                Ok(_) => folder_entry(primary, path::parent(&target)).await,
                Err(err) if is_not_found(&err) => Err(err.raise(ErrorKind::NotFound(target))),
                Err(err) => Err(err.raise(backend(primary))),
            };
        }
        match primary.stat(&target).await {
            Ok(info) => Ok(FileManagerEntry::from_blob(&info)),
            Err(err) if is_not_found(&err) => {
                let children = primary.list_children(&target).await.or_raise(|| backend(primary))?;
                if children.is_empty() {
                    return Err(err.raise(ErrorKind::NotFound(target)));
                }
                folder_entry(primary, &target).await
            },
            Err(err) => Err(err.raise(backend(primary))),
        }
    }

    #[instrument(skip(self))]
    pub async fn open_read_stream(&self, path: &str) -> Result<BoxAsyncRead> {
        let path = blob_path(path)?;
        let drivers = self.drivers().await?;
        let primary = drivers.primary();
        primary.reader(&path).await.map_err(|err| match is_not_found(&err) {
            true => err.raise(ErrorKind::NotFound(path.clone())),
            false => err.raise(backend(primary)),
        })
    }

    /// Bytes stored across all backends; every backend account is billed on
    /// its own.
    #[instrument(skip(self))]
    pub async fn get_byte_consumption(&self) -> Result<u64> {
        let drivers = self.drivers().await?;
        let totals = BatchReport::run(drivers.all(), |driver| driver.bytes_consumed()).await.require_all()?;
        Ok(totals.into_iter().sum())
    }

    /// Write one upload chunk to every backend.
    #[instrument(skip(self, data), fields(path = %upload.path, size = data.len(), chunk = upload.chunk_index))]
    pub async fn append_blob(&self, data: &[u8], upload: &UploadMetadata) -> Result<()> {
        self.append_blob_report(data, upload).await?.require_all()?;
        Ok(())
    }

    /// Write one upload chunk to every backend, reporting each backend's
    /// outcome. All backends record the same upload mark.
    pub async fn append_blob_report(&self, data: &[u8], upload: &UploadMetadata) -> Result<BatchReport<()>> {
        let upload = UploadMetadata { path: blob_path(&upload.path)?, ..upload.clone() };
        let drivers = self.drivers().await?;
        let mark = OffsetDateTime::now_utc();
        Ok(BatchReport::run(drivers.all(), |driver| driver.append(data, &upload, mark)).await)
    }

    /// Create a folder on every backend, or return the existing one.
    #[instrument(skip(self))]
    pub async fn create_folder(&self, name: &str) -> Result<FileManagerEntry> {
        let folder = folder_path(name)?;
        if folder.is_empty() {
            exn::bail!(ErrorKind::RootFolder);
        }
        let marker = path::marker_path(&folder).or_raise(|| ErrorKind::InvalidPath(name.to_string()))?;
        let drivers = self.drivers().await?;
        let primary = drivers.primary();
        if primary.exists(&marker).await.or_raise(|| backend(primary))? {
            tracing::debug!(%folder, "Folder already exists");
            return folder_entry(primary, &folder).await;
        }
        BatchReport::run(drivers.all(), |driver| driver.create_folder(&folder)).await.require_all()?;
        Ok(FileManagerEntry::synthesized_folder(&folder))
    }

    /// Immediate children of a folder, as seen by the primary. Folder markers
    /// are never listed.
    #[instrument(skip(self))]
    pub async fn get_folder_contents(&self, path: &str) -> Result<Vec<FileManagerEntry>> {
        let folder = folder_path(path)?;
        let drivers = self.drivers().await?;
        let primary = drivers.primary();
        let children = primary.list_children(&folder).await.or_raise(|| backend(primary))?;
        try_join_all(children.into_iter().filter_map(|child| match child {
            ListItem::Blob(info) if path::is_marker(&info.path) => None,
            child => Some(child_entry(primary, child)),
        }))
        .await
    }

    /// Serve the container as a static website. Only the primary is
    /// configured.
    #[instrument(skip(self))]
    pub async fn enable_static_website_hosting(&self) -> Result<()> {
        let drivers = self.drivers().await?;
        let primary = drivers.primary();
        primary.enable_static_website().await.or_raise(|| backend(primary))
    }
}

async fn child_entry(primary: &DriverHandle, child: ListItem) -> Result<FileManagerEntry> {
    match child {
        ListItem::Blob(info) => Ok(FileManagerEntry::from_blob(&info)),
        ListItem::Prefix(prefix) => Ok(FileManagerEntry::from_prefix(&prefix, has_directories(primary, &prefix).await?)),
    }
}

/// Entry for `folder`, using its marker's timestamps when it has one.
async fn folder_entry(primary: &DriverHandle, folder: &str) -> Result<FileManagerEntry> {
    let has_directories = has_directories(primary, folder).await?;
    let marker = match folder.is_empty() {
        true => None,
        false => {
            let marker = path::marker_path(folder).or_raise(|| ErrorKind::InvalidPath(folder.to_string()))?;
            match primary.stat(&marker).await {
                Ok(info) => Some(info),
                Err(err) if is_not_found(&err) => None,
                Err(err) => return Err(err.raise(backend(primary))),
            }
        },
    };
    Ok(FileManagerEntry::folder(folder, marker.as_ref(), has_directories))
}

async fn has_directories(primary: &DriverHandle, folder: &str) -> Result<bool> {
    let children = primary.list_children(folder).await.or_raise(|| backend(primary))?;
    Ok(children.iter().any(ListItem::is_prefix))
}

fn backend(driver: &DriverHandle) -> ErrorKind {
    ErrorKind::Backend(driver.name().to_string())
}

fn is_not_found(err: &StorageError) -> bool {
    matches!(&**err, StorageErrorKind::NotFound(_))
}

fn blob_path(path: &str) -> Result<String> {
    path::validate(path).or_raise(|| ErrorKind::InvalidPath(path.to_string()))
}

fn folder_path(path: &str) -> Result<String> {
    path::normalize(path).or_raise(|| ErrorKind::InvalidPath(path.to_string()))
}
