//! Configuration for blobfan.
//!
//! Values are layered with [`figment`], later sources overriding earlier ones:
//!
//! 1. built-in defaults (no backends, so nothing is configured),
//! 2. `config.toml` in the platform configuration directory, if present,
//! 3. an explicitly requested file (TOML, YAML or JSON, chosen by extension),
//! 4. `BLOBFAN_*` environment variables (`__` separates nested keys).
//!
//! ```toml
//! container = "site"
//! primary = "local"
//!
//! [[backends]]
//! name = "local"
//! kind = "local"
//! root = "/srv/blobfan"
//!
//! [[backends]]
//! name = "b2"
//! kind = "s3"
//! region = "us-west-004"
//! endpoint = "https://s3.us-west-004.backblazeb2.com"
//! key_id = "..."
//! key_secret = "..."
//! ```

mod descriptor;
pub mod error;

pub use crate::descriptor::{BackendDescriptor, BackendKind, Secret};
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "BLOBFAN_";

/// Storage configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Container (bucket or sub-directory) every backend operates in.
    #[serde(default)]
    pub container: Option<String>,
    /// Name of the backend serving reads; defaults to the first backend.
    #[serde(default)]
    pub primary: Option<String>,
    #[serde(default)]
    pub backends: Vec<BackendDescriptor>,
}

impl Config {
    /// Load and validate the layered configuration.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(Self::default_path(), explicit)?)
    }

    /// Platform default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "blobfan").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Build the provider stack without extracting it.
    pub fn figment(default: Option<PathBuf>, explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(default) = default {
            // A missing default file simply contributes nothing.
            figment = figment.merge(Toml::file(default));
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                exn::bail!(ErrorKind::MissingFile(path.display().to_string()));
            }
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract a configuration from any provider stack and validate it.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(backends = config.backends.len(), primary = ?config.primary_descriptor().map(|b| &b.name), "Loaded configuration");
        Ok(config)
    }

    /// Check invariants that serde can't express.
    ///
    /// An empty backend list is valid; it just means nothing is configured.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for backend in &self.backends {
            if backend.name.trim().is_empty() {
                exn::bail!(ErrorKind::Invalid("backend name cannot be empty".to_string()));
            }
            if !names.insert(backend.name.as_str()) {
                exn::bail!(ErrorKind::DuplicateBackend(backend.name.clone()));
            }
            if let BackendKind::Local { root } = &backend.kind
                && !root.is_absolute()
            {
                exn::bail!(ErrorKind::Invalid(format!(
                    "backend `{}`: root `{}` must be absolute",
                    backend.name,
                    root.display()
                )));
            }
        }
        if let Some(primary) = &self.primary
            && !names.contains(primary.as_str())
        {
            exn::bail!(ErrorKind::UnknownPrimary(primary.clone()));
        }
        if !self.backends.is_empty() && self.container().is_none() {
            exn::bail!(ErrorKind::MissingContainer);
        }
        Ok(())
    }

    /// The configured container, if it is set and non-blank.
    pub fn container(&self) -> Option<&str> {
        self.container.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    /// The backend designated for reads: the one named by `primary`, or the
    /// first configured backend.
    pub fn primary_descriptor(&self) -> Option<&BackendDescriptor> {
        match &self.primary {
            Some(name) => self.backends.iter().find(|backend| &backend.name == name),
            None => self.backends.first(),
        }
    }

    /// Backends other than the primary, in configured order.
    pub fn replica_descriptors(&self) -> impl Iterator<Item = &BackendDescriptor> {
        let primary = self.primary_descriptor().map(|backend| backend.name.as_str());
        self.backends.iter().filter(move |backend| Some(backend.name.as_str()) != primary)
    }

    /// Whether there is anything to talk to: at least one backend, a usable
    /// primary and a container.
    pub fn is_configured(&self) -> bool {
        self.primary_descriptor().is_some() && self.container().is_some()
    }
}
