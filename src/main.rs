//! Operator CLI for blobfan.
//!
//! Every command goes through a [`StorageContext`], so writes land on every
//! configured backend and reads come from the primary.

mod commands;
mod error;

use crate::error::{ErrorKind, Result};
use blobfan_config::Config;
use blobfan_context::StorageContext;
use clap::{ArgAction, Parser, Subcommand};
use exn::ResultExt;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

/// 4 MiB, small enough to keep S3 read-modify-write appends reasonable.
const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

#[derive(Debug, Parser)]
#[command(name = "blobfan", version, about = "Replicated blob storage across several backends")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON), layered over the default one.
    #[arg(short, long, env = "BLOBFAN_CONFIG_FILE", global = true)]
    config: Option<PathBuf>,
    /// Container to operate in, overriding the configured one.
    #[arg(long, global = true)]
    container: Option<String>,
    /// More logging (-v info, -vv debug, -vvv trace). `RUST_LOG` wins.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the resolved configuration.
    Status,
    /// List the contents of a folder.
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
    /// Show the entry for a file or folder.
    Stat { path: String },
    /// Write a blob to stdout.
    Cat { path: String },
    /// Upload a local file, in chunks, to every backend.
    Put {
        local: PathBuf,
        remote: String,
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, value_parser = clap::value_parser!(u64).range(1..))]
        chunk_size: u64,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Create a folder.
    Mkdir { path: String },
    /// Delete a file from every backend.
    Rm { path: String },
    /// Delete a folder and everything below it from every backend.
    Rmdir { path: String },
    /// Copy a file or folder.
    Cp { source: String, destination: String },
    /// Move a file or folder.
    Mv { source: String, destination: String },
    /// Bytes stored, summed over every backend.
    Du,
    /// Serve the container as a static website (primary backend only).
    Website,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    // Read while the process is still single-threaded.
    blobfan_context::entry::local_offset();
    match runtime().and_then(|runtime| runtime.block_on(run(cli))) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            ExitCode::FAILURE
        },
    }
}

fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread().enable_all().build().or_raise(|| ErrorKind::Runtime)
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let mut context = StorageContext::new(config.clone());
    if let Some(container) = cli.container {
        context.set_container_name(container);
    }
    match cli.command {
        Command::Status => commands::status(&config, &context),
        Command::Ls { path } => commands::ls(&context, &path).await,
        Command::Stat { path } => commands::stat(&context, &path).await,
        Command::Cat { path } => commands::cat(&context, &path).await,
        Command::Put { local, remote, chunk_size, content_type } => {
            commands::put(&context, &local, &remote, chunk_size, content_type).await
        },
        Command::Mkdir { path } => commands::mkdir(&context, &path).await,
        Command::Rm { path } => commands::rm(&context, &path).await,
        Command::Rmdir { path } => context.delete_folder(&path).await.or_raise(|| ErrorKind::Storage),
        Command::Cp { source, destination } => {
            context.copy_path(&source, &destination).await.or_raise(|| ErrorKind::Storage)
        },
        Command::Mv { source, destination } => {
            context.rename_path(&source, &destination).await.or_raise(|| ErrorKind::Storage)
        },
        Command::Du => commands::du(&context).await,
        Command::Website => context.enable_static_website_hosting().await.or_raise(|| ErrorKind::Storage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_parsing() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case(&["blobfan", "ls"], "")]
    #[case(&["blobfan", "-vv", "ls", "docs"], "docs")]
    #[case(&["blobfan", "ls", "docs", "--container", "other"], "docs")]
    fn test_ls_arguments(#[case] args: &[&str], #[case] expected: &str) {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Ls { path } => assert_eq!(path, expected),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_put_defaults() {
        let cli = Cli::try_parse_from(["blobfan", "put", "./a.bin", "docs/a.bin"]).unwrap();
        match cli.command {
            Command::Put { chunk_size, content_type, .. } => {
                assert_eq!(chunk_size, DEFAULT_CHUNK_SIZE);
                assert!(content_type.is_none());
            },
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["blobfan", "put", "a", "b", "--chunk-size", "0"]).is_err());
    }
}
