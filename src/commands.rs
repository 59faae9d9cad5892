use crate::error::{ErrorKind, Result};
use blobfan_config::Config;
use blobfan_context::StorageContext;
use blobfan_storage::UploadMetadata;
use exn::ResultExt;
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn print_json(value: &impl Serialize) -> Result<()> {
    let output = serde_json::to_string_pretty(value).or_raise(|| ErrorKind::Output)?;
    println!("{output}");
    Ok(())
}

pub fn status(config: &Config, context: &StorageContext) -> Result<()> {
    let backends: Vec<_> =
        config.backends.iter().map(|backend| json!({ "name": backend.name, "kind": backend.kind_name() })).collect();
    print_json(&json!({
        "configured": context.is_configured(),
        "container": context.container_name(),
        "primary": config.primary_descriptor().map(|backend| &backend.name),
        "backends": backends,
    }))
}

pub async fn ls(context: &StorageContext, path: &str) -> Result<()> {
    print_json(&context.get_folder_contents(path).await.or_raise(|| ErrorKind::Storage)?)
}

pub async fn stat(context: &StorageContext, path: &str) -> Result<()> {
    print_json(&context.get_file(path).await.or_raise(|| ErrorKind::Storage)?)
}

pub async fn cat(context: &StorageContext, path: &str) -> Result<()> {
    let mut reader = context.open_read_stream(path).await.or_raise(|| ErrorKind::Storage)?;
    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut reader, &mut stdout).await.or_raise(|| ErrorKind::Output)?;
    stdout.flush().await.or_raise(|| ErrorKind::Output)
}

/// Upload `local` in `chunk_size` pieces. Each piece is appended on every
/// backend before the next one is read.
pub async fn put(
    context: &StorageContext,
    local: &Path,
    remote: &str,
    chunk_size: u64,
    content_type: Option<String>,
) -> Result<()> {
    let read_error = || ErrorKind::Read(local.display().to_string());
    let mut file = File::open(local).await.or_raise(read_error)?;
    let total_size = file.metadata().await.or_raise(read_error)?.len();
    // An empty file still takes one (empty) chunk to create the blob.
    let total_chunks = total_size.div_ceil(chunk_size).max(1);
    let mut upload = UploadMetadata::single(remote, total_size);
    if let Some(content_type) = content_type {
        upload = upload.with_content_type(content_type);
    }
    let mut buffer = Vec::new();
    for index in 0..total_chunks {
        buffer.clear();
        (&mut file).take(chunk_size).read_to_end(&mut buffer).await.or_raise(read_error)?;
        let chunk = upload.clone().with_chunk(index, total_chunks);
        context.append_blob(&buffer, &chunk).await.or_raise(|| ErrorKind::Storage)?;
        match chunk.is_last_chunk() {
            true => tracing::info!(remote, total_size, total_chunks, "Upload complete"),
            false => tracing::debug!(chunk = index + 1, total_chunks, bytes = buffer.len(), "Uploaded chunk"),
        }
    }
    print_json(&context.get_file(remote).await.or_raise(|| ErrorKind::Storage)?)
}

pub async fn mkdir(context: &StorageContext, path: &str) -> Result<()> {
    print_json(&context.create_folder(path).await.or_raise(|| ErrorKind::Storage)?)
}

/// Delete on every backend, listing how each one fared before failing.
pub async fn rm(context: &StorageContext, path: &str) -> Result<()> {
    let report = context.delete_file_report(path).await.or_raise(|| ErrorKind::Storage)?;
    let outcomes: Vec<_> = report
        .outcomes()
        .iter()
        .map(|outcome| json!({ "backend": outcome.backend, "deleted": outcome.is_success() }))
        .collect();
    print_json(&outcomes)?;
    report.require_all().or_raise(|| ErrorKind::Storage)?;
    Ok(())
}

pub async fn du(context: &StorageContext) -> Result<()> {
    let bytes = context.get_byte_consumption().await.or_raise(|| ErrorKind::Storage)?;
    print_json(&json!({ "bytes": bytes }))
}
