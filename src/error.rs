//! CLI Error Types

use derive_more::{Display, Error};

/// A CLI error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for CLI commands.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("storage operation failed")]
    Storage,
    #[display("could not read local file `{_0}`")]
    Read(#[error(not(source))] String),
    #[display("could not write output")]
    Output,
    #[display("could not start the async runtime")]
    Runtime,
}
