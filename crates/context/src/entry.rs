//! Directory-style view of blob listings.

use blobfan_storage::{BlobInfo, path};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use time::{OffsetDateTime, UtcOffset};

static LOCAL_OFFSET: OnceLock<UtcOffset> = OnceLock::new();

/// One file or folder as shown by a file manager.
///
/// Entries are built on demand from driver listings and never stored. Every
/// timestamp is given twice: in the local offset of this process (UTC when
/// the offset can't be determined) and in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileManagerEntry {
    /// File name without its extension, or the folder name.
    pub name: String,
    /// Normalized logical path; folders have no trailing slash.
    pub path: String,
    /// Extension including its leading dot; empty for folders and
    /// extensionless files.
    pub extension: String,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_utc: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_utc: OffsetDateTime,
    pub is_directory: bool,
    /// Whether the folder has at least one sub-folder.
    pub has_directories: bool,
}

impl FileManagerEntry {
    /// Entry for a plain blob.
    pub fn from_blob(info: &BlobInfo) -> Self {
        let created = info.created.unwrap_or(info.modified);
        Self {
            name: path::file_stem(&info.path).to_string(),
            path: info.path.clone(),
            extension: path::extension(&info.path).unwrap_or_default().to_string(),
            size: info.size,
            created: local(created),
            created_utc: utc(created),
            modified: local(info.modified),
            modified_utc: utc(info.modified),
            is_directory: false,
            has_directories: false,
        }
    }

    /// Entry for a virtual folder prefix (`docs/sub/`) from a delimited
    /// listing. Prefixes carry no metadata, so the timestamps are "now".
    pub fn from_prefix(prefix: &str, has_directories: bool) -> Self {
        Self::folder(prefix.trim_end_matches('/'), None, has_directories)
    }

    /// Entry for a folder, timestamped from its marker blob when there is
    /// one.
    pub fn folder(folder: &str, marker: Option<&BlobInfo>, has_directories: bool) -> Self {
        let now = OffsetDateTime::now_utc();
        let created = marker.map(|info| info.created.unwrap_or(info.modified)).unwrap_or(now);
        let modified = marker.map(|info| info.modified).unwrap_or(now);
        let folder = folder.trim_matches('/');
        Self {
            name: path::file_name(folder).to_string(),
            path: folder.to_string(),
            extension: String::new(),
            size: 0,
            created: local(created),
            created_utc: utc(created),
            modified: local(modified),
            modified_utc: utc(modified),
            is_directory: true,
            has_directories,
        }
    }

    /// Entry for a folder that was only just created.
    pub fn synthesized_folder(folder: &str) -> Self {
        Self::folder(folder, None, false)
    }
}

/// Offset used for the local timestamps of every entry.
///
/// The first call decides it for the rest of the process. The local offset
/// can only be read while a Unix process is single-threaded, so binaries
/// should call this before starting a multi-threaded runtime; later callers
/// that miss that window get UTC.
pub fn local_offset() -> UtcOffset {
    *LOCAL_OFFSET.get_or_init(|| UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
}

fn local(at: OffsetDateTime) -> OffsetDateTime {
    at.to_offset(local_offset())
}

fn utc(at: OffsetDateTime) -> OffsetDateTime {
    at.to_offset(UtcOffset::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::datetime;

    #[rstest]
    #[case("docs/readme.txt", "readme", ".txt")]
    #[case("docs/archive.tar.gz", "archive.tar", ".gz")]
    #[case("Makefile", "Makefile", "")]
    #[case("docs/.gitignore", ".gitignore", "")]
    fn test_from_blob_names(#[case] path: &str, #[case] name: &str, #[case] extension: &str) {
        let entry = FileManagerEntry::from_blob(&BlobInfo::new(path, 42, datetime!(2024-05-01 12:00 UTC)));
        assert_eq!(entry.name, name);
        assert_eq!(entry.extension, extension);
        assert_eq!(entry.path, path);
        assert_eq!(entry.size, 42);
        assert!(!entry.is_directory);
    }

    #[test]
    fn test_from_blob_timestamps() {
        let info = BlobInfo::new("a.txt", 1, datetime!(2024-05-02 08:30 +02:00)).with_created(datetime!(2024-05-01 0:00 UTC));
        let entry = FileManagerEntry::from_blob(&info);
        assert_eq!(entry.created_utc, datetime!(2024-05-01 0:00 UTC));
        assert_eq!(entry.created_utc.offset(), UtcOffset::UTC);
        assert_eq!(entry.modified_utc, datetime!(2024-05-02 06:30 UTC));
        // Same instant, whatever the local offset turns out to be.
        assert_eq!(entry.modified, entry.modified_utc);
        assert_eq!(entry.modified.offset(), local_offset());
    }

    #[test]
    fn test_created_falls_back_to_modified() {
        let entry = FileManagerEntry::from_blob(&BlobInfo::new("a.txt", 1, datetime!(2024-05-02 8:30 UTC)));
        assert_eq!(entry.created_utc, entry.modified_utc);
    }

    #[rstest]
    #[case("docs/sub/", "sub", "docs/sub")]
    #[case("top/", "top", "top")]
    fn test_from_prefix(#[case] prefix: &str, #[case] name: &str, #[case] path: &str) {
        let entry = FileManagerEntry::from_prefix(prefix, true);
        assert_eq!(entry.name, name);
        assert_eq!(entry.path, path);
        assert!(entry.is_directory);
        assert!(entry.has_directories);
        assert_eq!(entry.extension, "");
        assert_eq!(entry.size, 0);
    }

    #[test]
    fn test_folder_from_marker() {
        let marker = BlobInfo::new("docs/folder.stubxx", 0, datetime!(2024-05-01 0:00 UTC));
        let entry = FileManagerEntry::folder("docs", Some(&marker), false);
        assert_eq!(entry.name, "docs");
        assert_eq!(entry.modified_utc, datetime!(2024-05-01 0:00 UTC));
        let synthesized = FileManagerEntry::synthesized_folder("/new/folder/");
        assert_eq!(synthesized.path, "new/folder");
        assert_eq!(synthesized.name, "folder");
        assert!(!synthesized.has_directories);
    }

    #[test]
    fn test_json_shape() {
        let entry = FileManagerEntry::from_blob(&BlobInfo::new("docs/readme.txt", 5, datetime!(2024-05-01 0:00 UTC)));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["name"], "readme");
        assert_eq!(json["isDirectory"], false);
        assert_eq!(json["hasDirectories"], false);
        assert_eq!(json["modifiedUtc"], "2024-05-01T00:00:00Z");
        assert!(json.get("created_utc").is_none());
        let back: FileManagerEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
