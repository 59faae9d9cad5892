//! Logical path handling.
//!
//! Every backend is a flat keyspace of `/`-delimited blob names. These helpers
//! are the single place where names get normalized, so the rest of the
//! workspace can rely on the following invariants:
//!
//! - a normalized path never starts or ends with `/` and never contains empty,
//!   `.` or `..` segments,
//! - the empty string is the storage root,
//! - a folder prefix is a normalized path followed by exactly one `/` (or the
//!   empty string for the root).

use crate::error::{ErrorKind, Result};

/// Name of the zero-byte placeholder blob that makes an otherwise empty folder
/// visible in a listing.
pub const FOLDER_MARKER: &str = "folder.stubxx";

/// Normalizes a logical path, returning the empty string for the root.
///
/// Leading, trailing and repeated slashes are dropped and `.` segments are
/// removed. `..` is resolved but may never climb above the root. Null bytes
/// are rejected.
///
/// # Examples
///
/// ```
/// use blobfan_storage::path::normalize;
/// assert_eq!(normalize("/docs//readme.txt").unwrap(), "docs/readme.txt");
/// assert_eq!(normalize("/").unwrap(), "");
/// assert_eq!(normalize("a/../b/./c/").unwrap(), "b/c");
/// assert!(normalize("../etc/passwd").is_err());
/// ```
pub fn normalize(path: &str) -> Result<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                if segments.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.to_string()));
                }
            },
            s if s.contains('\0') => exn::bail!(ErrorKind::InvalidPath(path.to_string())),
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

/// Normalizes a blob name. Unlike [`normalize`], the root is rejected since a
/// blob always needs a non-empty key.
pub fn validate(path: &str) -> Result<String> {
    let normalized = normalize(path)?;
    if normalized.is_empty() {
        exn::bail!(ErrorKind::InvalidPath(path.to_string()));
    }
    Ok(normalized)
}

/// Normalized folder path with a single trailing slash, suitable as a listing
/// prefix. The root maps to the empty string.
pub fn folder_prefix(path: &str) -> Result<String> {
    let normalized = normalize(path)?;
    Ok(match normalized.is_empty() {
        true => normalized,
        false => format!("{normalized}/"),
    })
}

/// Name of the folder marker blob for `folder`.
pub fn marker_path(folder: &str) -> Result<String> {
    Ok(format!("{}/{FOLDER_MARKER}", validate(folder)?))
}

pub fn is_marker(path: &str) -> bool {
    file_name(path) == FOLDER_MARKER
}

/// Whether `name` is `base` itself or lives somewhere below it. Both arguments
/// are expected to be normalized; everything is within the root.
pub fn is_within(name: &str, base: &str) -> bool {
    base.is_empty() || name == base || name.strip_prefix(base).is_some_and(|rest| rest.starts_with('/'))
}

/// Swaps the leading `from` component(s) of `name` for `to`.
///
/// Returns `None` when `name` is not [within](is_within) `from`.
///
/// ```
/// use blobfan_storage::path::rebase;
/// assert_eq!(rebase("docs/a/readme.txt", "docs", "archive").as_deref(), Some("archive/a/readme.txt"));
/// assert_eq!(rebase("docs2/readme.txt", "docs", "archive"), None);
/// ```
pub fn rebase(name: &str, from: &str, to: &str) -> Option<String> {
    if name == from {
        return Some(to.to_string());
    }
    let rest = match from.is_empty() {
        true => name,
        false => name.strip_prefix(from)?.strip_prefix('/')?,
    };
    Some(match to.is_empty() {
        true => rest.to_string(),
        false => format!("{to}/{rest}"),
    })
}

/// Last segment of a path (ignoring a trailing slash).
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Everything before the last segment; the empty string for top-level names.
pub fn parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// Extension of the last segment including its leading dot (`".txt"`).
///
/// Dotfiles such as `.gitignore` have no extension.
pub fn extension(path: &str) -> Option<&str> {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(&name[idx..]),
    }
}

/// Last segment without its [`extension`].
pub fn file_stem(path: &str) -> &str {
    let name = file_name(path);
    match extension(name) {
        Some(ext) => &name[..name.len() - ext.len()],
        None => name,
    }
}

/// Case-insensitive extension filter. Filters may be given with or without
/// their leading dot; an empty filter list matches everything.
pub fn matches_extension<S: AsRef<str>>(path: &str, filters: &[S]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let Some(ext) = extension(path) else {
        return false;
    };
    let ext = &ext[1..];
    filters.iter().any(|filter| filter.as_ref().trim_start_matches('.').eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("docs/readme.txt", "docs/readme.txt")]
    #[case("/docs/readme.txt", "docs/readme.txt")]
    #[case("///docs//readme.txt", "docs/readme.txt")]
    #[case("docs/", "docs")]
    #[case("a/./b/./c", "a/b/c")]
    #[case("a/b/..", "a")]
    #[case("", "")]
    #[case("/", "")]
    #[case("./", "")]
    fn test_normalize(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize(input).unwrap(), expected);
    }

    #[rstest]
    #[case("../etc/passwd")]
    #[case("a/../../b")]
    #[case("..")]
    #[case("a\0b")]
    fn test_normalize_rejects(#[case] input: &str) {
        let err = normalize(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(p) if p == input));
    }

    #[test]
    fn test_validate_rejects_root() {
        assert!(validate("").is_err());
        assert!(validate("/").is_err());
        assert!(validate("a/..").is_err());
        assert_eq!(validate("/a").unwrap(), "a");
    }

    #[rstest]
    #[case("", "")]
    #[case("/", "")]
    #[case("docs", "docs/")]
    #[case("/docs/", "docs/")]
    #[case("docs//", "docs/")]
    fn test_folder_prefix(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(folder_prefix(input).unwrap(), expected);
    }

    #[test]
    fn test_markers() {
        assert_eq!(marker_path("/docs/").unwrap(), "docs/folder.stubxx");
        assert!(marker_path("/").is_err());
        assert!(is_marker("docs/folder.stubxx"));
        assert!(is_marker("folder.stubxx"));
        assert!(!is_marker("docs/folder.stubxx.txt"));
        assert!(!is_marker("docs/readme.txt"));
    }

    #[rstest]
    #[case("docs/readme.txt", "docs", true)]
    #[case("docs", "docs", true)]
    #[case("docs2/readme.txt", "docs", false)]
    #[case("doc", "docs", false)]
    #[case("anything", "", true)]
    fn test_is_within(#[case] name: &str, #[case] base: &str, #[case] expected: bool) {
        assert_eq!(is_within(name, base), expected);
    }

    #[rstest]
    #[case("docs/readme.txt", "docs", "archive", Some("archive/readme.txt"))]
    #[case("docs/readme.txt", "docs/readme.txt", "notes.txt", Some("notes.txt"))]
    #[case("docs/a/b.txt", "docs/a", "c", Some("c/b.txt"))]
    #[case("docs/readme.txt", "docs", "", Some("readme.txt"))]
    #[case("readme.txt", "", "docs", Some("docs/readme.txt"))]
    #[case("docsx/readme.txt", "docs", "archive", None)]
    fn test_rebase(#[case] name: &str, #[case] from: &str, #[case] to: &str, #[case] expected: Option<&str>) {
        assert_eq!(rebase(name, from, to).as_deref(), expected);
    }

    #[test]
    fn test_name_parts() {
        assert_eq!(file_name("docs/readme.txt"), "readme.txt");
        assert_eq!(file_name("docs/sub/"), "sub");
        assert_eq!(file_name("top"), "top");
        assert_eq!(parent("docs/sub/readme.txt"), "docs/sub");
        assert_eq!(parent("readme.txt"), "");
        assert_eq!(extension("docs/readme.txt"), Some(".txt"));
        assert_eq!(extension("docs/archive.tar.gz"), Some(".gz"));
        assert_eq!(extension("docs/.gitignore"), None);
        assert_eq!(extension("docs/Makefile"), None);
        assert_eq!(file_stem("docs/readme.txt"), "readme");
        assert_eq!(file_stem("docs/.gitignore"), ".gitignore");
    }

    #[test]
    fn test_matches_extension() {
        assert!(matches_extension("a/photo.JPG", &["jpg", "png"]));
        assert!(matches_extension("a/photo.png", &[".png"]));
        assert!(!matches_extension("a/notes.txt", &["jpg"]));
        assert!(!matches_extension("a/Makefile", &["jpg"]));
        assert!(matches_extension::<&str>("a/anything", &[]));
    }
}
