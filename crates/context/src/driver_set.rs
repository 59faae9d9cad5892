//! Turning a configuration snapshot into live driver handles.
//!
//! Handles are cheap and unpooled. The coordinator re-resolves them on every
//! call, so a changed container (or rotated credentials) takes effect
//! immediately.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use blobfan_config::{BackendDescriptor, BackendKind, Config};
use blobfan_storage::DriverHandle;
use blobfan_storage::backend::LocalBackend;
#[cfg(feature = "s3")]
use blobfan_storage::backend::S3Backend;
use blobfan_storage::error::Result as StorageResult;
use blobfan_storage::path;
use exn::ResultExt;
use std::sync::Arc;

/// Builds one driver per backend descriptor.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Build a driver for `descriptor` operating inside `container`.
    async fn build(&self, descriptor: &BackendDescriptor, container: &str) -> StorageResult<DriverHandle>;
}

/// Builds the real drivers: the local filesystem driver (the container is a
/// sub-directory of its root) and, with the `s3` feature, the S3 driver (the
/// container is the bucket).
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudDriverFactory;

#[async_trait]
impl DriverFactory for CloudDriverFactory {
    async fn build(&self, descriptor: &BackendDescriptor, container: &str) -> StorageResult<DriverHandle> {
        match &descriptor.kind {
            BackendKind::Local { root } => Ok(Arc::new(LocalBackend::new(&descriptor.name, root.join(container))?)),
            #[cfg(feature = "s3")]
            BackendKind::S3 { region, endpoint, key_id, key_secret, prefix } => {
                let backend = S3Backend::new(
                    &descriptor.name,
                    container,
                    prefix.clone(),
                    region,
                    endpoint.as_deref(),
                    key_id,
                    key_secret.expose(),
                )
                .await?;
                Ok(Arc::new(backend))
            },
            #[cfg(not(feature = "s3"))]
            BackendKind::S3 { .. } => exn::bail!(blobfan_storage::error::ErrorKind::Unsupported(descriptor.kind_name().to_string())),
        }
    }
}

/// Every active driver, with the primary held apart from the replicas.
///
/// Reads go to the primary only; writes go to [`all()`](Self::all).
#[derive(Clone)]
pub struct DriverSet {
    primary: DriverHandle,
    replicas: Vec<DriverHandle>,
}
impl DriverSet {
    pub fn new(primary: DriverHandle, replicas: Vec<DriverHandle>) -> Self {
        Self { primary, replicas }
    }

    pub fn primary(&self) -> &DriverHandle {
        &self.primary
    }

    pub fn replicas(&self) -> &[DriverHandle] {
        &self.replicas
    }

    /// The primary first, then the replicas in configured order.
    pub fn all(&self) -> impl Iterator<Item = &DriverHandle> + Clone {
        std::iter::once(&self.primary).chain(self.replicas.iter())
    }

    pub fn len(&self) -> usize {
        1 + self.replicas.len()
    }

    /// A driver set always contains its primary.
    pub fn is_empty(&self) -> bool {
        false
    }
}
impl std::fmt::Debug for DriverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverSet")
            .field("primary", &self.primary.name())
            .field("replicas", &self.replicas.iter().map(|d| d.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Build the driver set for `container` from a configuration snapshot.
///
/// Fails with [`NotConfigured`](ErrorKind::NotConfigured) when there is no
/// backend, no usable primary or no container, and with
/// [`InvalidPath`](ErrorKind::InvalidPath) when the container is not a single
/// path segment.
pub async fn resolve(config: &Config, container: &str, factory: &dyn DriverFactory) -> Result<DriverSet> {
    let primary = config.primary_descriptor().ok_or(ErrorKind::NotConfigured)?;
    let container = container_segment(container)?;
    let primary = build(factory, primary, &container).await?;
    let mut replicas = Vec::new();
    for descriptor in config.replica_descriptors() {
        replicas.push(build(factory, descriptor, &container).await?);
    }
    let set = DriverSet::new(primary, replicas);
    tracing::trace!(?set, %container, "Resolved driver set");
    Ok(set)
}

async fn build(factory: &dyn DriverFactory, descriptor: &BackendDescriptor, container: &str) -> Result<DriverHandle> {
    factory.build(descriptor, container).await.or_raise(|| ErrorKind::Backend(descriptor.name.clone()))
}

fn container_segment(container: &str) -> Result<String> {
    let normalized = path::normalize(container).or_raise(|| ErrorKind::InvalidPath(container.to_string()))?;
    if normalized.is_empty() {
        exn::bail!(ErrorKind::NotConfigured);
    }
    if normalized.contains('/') {
        exn::bail!(ErrorKind::InvalidPath(container.to_string()));
    }
    Ok(normalized)
}
