use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A credential that never shows up in logs.
///
/// `Debug` and `Display` are redacted; use [`expose()`](Self::expose) when
/// handing the value to a client.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);
impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}
impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// One configured storage account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Unique name, used for logging, error reports and picking the primary.
    pub name: String,
    #[serde(flatten)]
    pub kind: BackendKind,
}
impl BackendDescriptor {
    pub fn local(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: BackendKind::Local { root: root.into() },
        }
    }

    /// Short name of the backend kind, matching the `kind` config key.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            BackendKind::Local { .. } => "local",
            BackendKind::S3 { .. } => "s3",
        }
    }
}

/// Driver-specific settings, selected by the `kind` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendKind {
    /// Directory tree on the local filesystem; the container is a
    /// sub-directory of `root`.
    Local { root: PathBuf },
    /// S3-compatible object storage; the container is the bucket.
    S3 {
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
        key_id: String,
        key_secret: Secret,
        /// Key prefix inside the bucket.
        #[serde(default)]
        prefix: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "Secret(***)");
        assert_eq!(secret.to_string(), "***");
        assert_eq!(secret.expose(), "hunter2");
        let descriptor = BackendDescriptor {
            name: "b2".to_string(),
            kind: BackendKind::S3 {
                region: "us-west-004".to_string(),
                endpoint: None,
                key_id: "id".to_string(),
                key_secret: secret,
                prefix: None,
            },
        };
        assert!(!format!("{descriptor:?}").contains("hunter2"));
        assert_eq!(descriptor.kind_name(), "s3");
    }
}
