//! Storage models.
//!
//! These types describe what drivers hand back from listing and stat calls,
//! and what callers hand to drivers when uploading.

use time::OffsetDateTime;

/// Blob metadata returned by drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// Normalized blob name relative to the container
    pub path: String,
    /// Blob size in bytes
    pub size: u64,
    /// Creation time, when the backend records one
    pub created: Option<OffsetDateTime>,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
    pub content_type: Option<String>,
}
impl BlobInfo {
    /// Create a new BlobInfo from a listing operation.
    pub fn new(path: impl Into<String>, size: u64, modified: OffsetDateTime) -> Self {
        Self {
            path: path.into(),
            size,
            created: None,
            modified,
            content_type: None,
        }
    }

    pub fn with_created(mut self, created: OffsetDateTime) -> Self {
        self.created = Some(created);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One entry of a delimited (single level) listing.
///
/// Object stores have no directories; a listing with a `/` delimiter folds
/// every deeper key into a virtual folder prefix instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListItem {
    Blob(BlobInfo),
    /// Virtual folder, always ending in `/`.
    Prefix(String),
}
impl ListItem {
    pub fn is_prefix(&self) -> bool {
        matches!(self, Self::Prefix(_))
    }

    /// Blob name or folder prefix.
    pub fn name(&self) -> &str {
        match self {
            Self::Blob(info) => &info.path,
            Self::Prefix(prefix) => prefix,
        }
    }
}

/// Describes one chunk of an in-flight upload.
///
/// Large files arrive as a sequence of chunks; chunk `0` starts the blob and
/// every later chunk is appended to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    /// Target blob name
    pub path: String,
    pub content_type: Option<String>,
    /// Zero-based index of this chunk
    pub chunk_index: u64,
    pub total_chunks: u64,
    /// Size of the complete upload in bytes
    pub total_size: u64,
}
impl UploadMetadata {
    /// Metadata for a blob uploaded in a single chunk.
    pub fn single(path: impl Into<String>, total_size: u64) -> Self {
        Self {
            path: path.into(),
            content_type: None,
            chunk_index: 0,
            total_chunks: 1,
            total_size,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_chunk(mut self, chunk_index: u64, total_chunks: u64) -> Self {
        self.chunk_index = chunk_index;
        self.total_chunks = total_chunks;
        self
    }

    /// Whether this chunk starts a fresh blob, replacing anything already
    /// stored under the same name.
    pub fn is_first_chunk(&self) -> bool {
        self.chunk_index == 0
    }

    /// Whether this chunk completes the upload.
    pub fn is_last_chunk(&self) -> bool {
        self.chunk_index + 1 >= self.total_chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1, true, true)]
    #[case(0, 3, true, false)]
    #[case(1, 3, false, false)]
    #[case(2, 3, false, true)]
    fn test_chunk_position(#[case] index: u64, #[case] total: u64, #[case] first: bool, #[case] last: bool) {
        let upload = UploadMetadata::single("big.bin", 30).with_chunk(index, total);
        assert_eq!(upload.is_first_chunk(), first);
        assert_eq!(upload.is_last_chunk(), last);
    }
}
