//! S3-compatible blob driver.
//!
//! This module provides a driver implementation for S3-compatible services
//! including AWS S3, Backblaze B2, Tigris (Fly.io), MinIO and others. The
//! container name is the bucket; an optional key prefix scopes the driver to
//! a virtual directory inside it.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration file. Each
//! backend specifies its own `key_id` and `key_secret`.
//!
//! # Appends
//!
//! S3 has no append primitive. A chunk after the first is appended by
//! reading the current object and writing the combined content back in a
//! single `PutObject`, which keeps each call all-or-nothing at the cost of
//! re-uploading the object.

use crate::backend::{BlobDriver, BlobStream, BoxAsyncRead};
use crate::error::{ErrorKind, Result};
use crate::models::{BlobInfo, ListItem, UploadMetadata};
use crate::path::{self, validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::{ByteStream, DateTime},
    types::{ErrorDocument, IndexDocument, WebsiteConfiguration},
};
use exn::ResultExt;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;
/// Object metadata key holding the first upload mark of a blob.
const CREATED_METADATA: &str = "created-mark";
/// Object metadata key holding the latest upload mark of a blob.
const MARK_METADATA: &str = "upload-mark";
const INDEX_DOCUMENT: &str = "index.html";
const ERROR_DOCUMENT: &str = "404.html";

/// S3-compatible blob driver.
///
/// # Examples
///
/// ```no_run
/// use blobfan_storage::backend::S3Backend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "b2",
///     "my-bucket",
///     Some("site/".to_string()),
///     "us-west-004",
///     Some("https://s3.us-west-004.backblazeb2.com"),
///     "access_key_id",
///     "secret_access_key",
/// ).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 driver.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in logging and errors)
    /// * `bucket` - S3 bucket name (the container)
    /// * `prefix` - Optional key prefix (acts as virtual directory)
    /// * `region` - AWS region or provider-specific region (e.g., "us-west-004" for Backblaze)
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - AWS/provider access key ID
    /// * `key_secret` - AWS/provider secret access key
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let credentials = Credentials::new(key_id, key_secret, None, None, "blobfan-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region.into()))
            // Configure retry policy with exponential backoff (1 initial + 3 retries)
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Use path-style addressing for better compatibility with
            // S3-compatible services (Backblaze, MinIO, etc.)
            .force_path_style(true);
        // Set custom endpoint for non-AWS services
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Self::from_client(name, Client::from_conf(config_builder.build()), bucket, prefix)
    }

    /// Wrap an already configured client.
    pub fn from_client(
        name: impl Into<String>,
        client: Client,
        bucket: impl Into<String>,
        prefix: Option<String>,
    ) -> Result<Self> {
        let prefix = prefix.map(|p| path::normalize(&p)).transpose()?.filter(|p| !p.is_empty());
        Ok(Self {
            name: name.into(),
            client,
            bucket: bucket.into(),
            prefix,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Construct the full S3 key from a blob name.
    fn full_key(&self, path: &str) -> Result<String> {
        let validated = validate_path(path)?;
        Ok(self.with_prefix(&validated))
    }

    /// Prepend the configured key prefix to a raw (unvalidated) listing prefix.
    fn with_prefix(&self, raw: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{raw}"),
            None => raw.to_string(),
        }
    }

    /// Strip the configured prefix from an S3 key to get the blob name.
    fn relative_path<'k>(&self, key: &'k str) -> &'k str {
        match &self.prefix {
            Some(prefix) => key.strip_prefix(prefix.as_str()).and_then(|s| s.strip_prefix('/')).unwrap_or(key),
            None => key,
        }
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError(format!("{}: request limiter closed", self.name)))
    }

    /// Convert AWS DateTime to OffsetDateTime.
    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }

    fn parse_mark(metadata: Option<&HashMap<String, String>>, key: &str) -> Option<OffsetDateTime> {
        metadata?.get(key).and_then(|value| OffsetDateTime::parse(value, &Rfc3339).ok())
    }

    fn format_mark(mark: OffsetDateTime) -> Result<String> {
        mark.format(&Rfc3339).or_raise(|| ErrorKind::BackendError("unformattable upload mark".to_string()))
    }

    fn object_info(&self, key: &str, size: Option<i64>, modified: Option<&DateTime>) -> Result<BlobInfo> {
        let modified = match modified {
            Some(dt) => Self::parse_datetime(dt)?,
            None => OffsetDateTime::UNIX_EPOCH,
        };
        let size = size.and_then(|s| u64::try_from(s).ok()).unwrap_or(0);
        Ok(BlobInfo::new(self.relative_path(key), size, modified))
    }

    /// Read the current object for an append. A missing object is empty.
    async fn current_object(&self, key: &str, path: &str) -> Result<(Vec<u8>, Option<String>)> {
        let _permit = self.acquire_permit().await?;
        match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => {
                let created = output.metadata().and_then(|m| m.get(CREATED_METADATA).cloned());
                let body = output.body.collect().await.or_raise(|| ErrorKind::Network(path.to_string()))?;
                Ok((body.into_bytes().to_vec(), created))
            },
            Err(e) if e.as_service_error().is_some_and(|s| s.is_no_such_key()) => Ok((Vec::new(), None)),
            Err(e) => exn::bail!(sdk_error(e, path)),
        }
    }

    async fn list_page(
        &self,
        prefix: &str,
        delimiter: bool,
        token: Option<String>,
    ) -> Result<aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output> {
        let _permit = self.acquire_permit().await?;
        let mut request = self.client.list_objects_v2().bucket(&self.bucket).prefix(prefix);
        if delimiter {
            request = request.delimiter("/");
        }
        if let Some(token) = token {
            request = request.continuation_token(token);
        }
        request.send().await.map_err(|e| exn::Exn::from(sdk_error(e, prefix)))
    }
}

/// Map an SDK failure onto an actionable storage error.
fn sdk_error<E, R>(err: SdkError<E, R>, path: &str) -> ErrorKind
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            ErrorKind::Network(DisplayErrorContext(&err).to_string())
        },
        _ => match err.code() {
            Some("NoSuchKey" | "NotFound") => ErrorKind::NotFound(path.to_string()),
            Some("AccessDenied" | "Forbidden") => ErrorKind::PermissionDenied(path.to_string()),
            _ => ErrorKind::BackendError(DisplayErrorContext(&err).to_string()),
        },
    }
}

/// Percent-encode an object key for the `x-amz-copy-source` header, leaving
/// unreserved characters and the `/` separators alone.
fn encode_copy_source(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[async_trait]
impl BlobDriver for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "s3"
    }

    fn list_stream<'a>(&'a self, prefix: &'a str) -> BlobStream<'a> {
        let full_prefix = self.with_prefix(prefix);
        Box::pin(stream! {
            let mut token: Option<String> = None;
            loop {
                let page = match self.list_page(&full_prefix, false, token.take()).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                for object in page.contents() {
                    let Some(key) = object.key() else { continue };
                    yield self.object_info(key, object.size(), object.last_modified());
                }
                token = match page.is_truncated() {
                    Some(true) => page.next_continuation_token().map(str::to_string),
                    _ => None,
                };
                if token.is_none() {
                    break;
                }
            }
        })
    }

    async fn list_children(&self, folder: &str) -> Result<Vec<ListItem>> {
        let full_prefix = self.with_prefix(&path::folder_prefix(folder)?);
        let mut children = Vec::new();
        let mut token = None;
        loop {
            let page = self.list_page(&full_prefix, true, token).await?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    children.push(ListItem::Blob(self.object_info(key, object.size(), object.last_modified())?));
                }
            }
            for common in page.common_prefixes() {
                if let Some(prefix) = common.prefix() {
                    children.push(ListItem::Prefix(self.relative_path(prefix).to_string()));
                }
            }
            token = match page.is_truncated() {
                Some(true) => page.next_continuation_token().map(str::to_string),
                _ => None,
            };
            if token.is_none() {
                break;
            }
        }
        children.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(children)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(false),
            Err(e) => exn::bail!(sdk_error(e, path)),
        }
    }

    async fn stat(&self, path: &str) -> Result<BlobInfo> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        let output = match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => {
                exn::bail!(ErrorKind::NotFound(path.to_string()))
            },
            Err(e) => exn::bail!(sdk_error(e, path)),
        };
        let mut info = self.object_info(&key, output.content_length(), output.last_modified())?;
        if let Some(created) = Self::parse_mark(output.metadata(), CREATED_METADATA) {
            info = info.with_created(created);
        }
        if let Some(content_type) = output.content_type() {
            info = info.with_content_type(content_type);
        }
        Ok(info)
    }

    async fn reader(&self, path: &str) -> Result<BoxAsyncRead> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => Ok(Box::pin(output.body.into_async_read())),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_no_such_key()) => {
                exn::bail!(ErrorKind::NotFound(path.to_string()))
            },
            Err(e) => exn::bail!(sdk_error(e, path)),
        }
    }

    async fn append(&self, data: &[u8], upload: &UploadMetadata, mark: OffsetDateTime) -> Result<()> {
        let key = self.full_key(&upload.path)?;
        let mark = Self::format_mark(mark)?;
        let (body, created) = match upload.is_first_chunk() {
            true => (data.to_vec(), None),
            false => {
                let (mut existing, created) = self.current_object(&key, &upload.path).await?;
                existing.extend_from_slice(data);
                (existing, created)
            },
        };
        let _permit = self.acquire_permit().await?;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .metadata(CREATED_METADATA, created.unwrap_or_else(|| mark.clone()))
            .metadata(MARK_METADATA, mark);
        if let Some(content_type) = &upload.content_type {
            request = request.content_type(content_type);
        }
        request.send().await.map_err(|e| sdk_error(e, &upload.path))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        // DeleteObject already succeeds for keys that don't exist.
        self.client.delete_object().bucket(&self.bucket).key(&key).send().await.map_err(|e| sdk_error(e, path))?;
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let source = self.full_key(from)?;
        let target = self.full_key(to)?;
        let _permit = self.acquire_permit().await?;
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, encode_copy_source(&source)))
            .key(&target)
            .send()
            .await
            .map_err(|e| sdk_error(e, from))?;
        Ok(())
    }

    async fn enable_static_website(&self) -> Result<()> {
        let index = IndexDocument::builder()
            .suffix(INDEX_DOCUMENT)
            .build()
            .or_raise(|| ErrorKind::BackendError("invalid index document".to_string()))?;
        let error = ErrorDocument::builder()
            .key(ERROR_DOCUMENT)
            .build()
            .or_raise(|| ErrorKind::BackendError("invalid error document".to_string()))?;
        let website = WebsiteConfiguration::builder().index_document(index).error_document(error).build();
        let _permit = self.acquire_permit().await?;
        self.client
            .put_bucket_website()
            .bucket(&self.bucket)
            .website_configuration(website)
            .send()
            .await
            .map_err(|e| sdk_error(e, &self.bucket))?;
        tracing::info!(backend = %self.name, bucket = %self.bucket, "Enabled static website hosting");
        Ok(())
    }
}
