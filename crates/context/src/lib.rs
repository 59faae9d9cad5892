//! Multi-backend blob storage coordination.
//!
//! A [`StorageContext`] owns a configuration snapshot and, for every call,
//! resolves one driver per configured backend. Reads are served by the
//! primary backend; writes are fanned out to all of them.
//!
//! ```no_run
//! use blobfan_config::Config;
//! use blobfan_context::StorageContext;
//! use blobfan_storage::UploadMetadata;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let context = StorageContext::new(Config::load(None)?);
//! let upload = UploadMetadata::single("docs/readme.txt", 5);
//! context.append_blob(b"hello", &upload).await?;
//! context.rename_path("docs", "archive").await?;
//! assert!(context.blob_exists("archive/readme.txt").await?);
//! # Ok(())
//! # }
//! ```

mod context;
pub mod driver_set;
pub mod entry;
pub mod error;
pub mod fanout;

pub use crate::context::StorageContext;
pub use crate::driver_set::{CloudDriverFactory, DriverFactory, DriverSet};
pub use crate::entry::FileManagerEntry;
pub use crate::fanout::{BatchReport, Outcome};
