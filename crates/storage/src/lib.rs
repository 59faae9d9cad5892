pub mod backend;
pub mod error;
mod models;
pub mod path;

pub use crate::backend::{BlobDriver, BoxAsyncRead};
pub use crate::models::{BlobInfo, ListItem, UploadMetadata};
use std::sync::Arc;

pub type DriverHandle = Arc<dyn BlobDriver>;
