//! Engine errors
//!
//! Most failure modes in the engine are handled locally (rejected paths,
//! unknown result lines, runner exit codes). What remains surfaces here.

use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the explorer engine
#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Invalid file pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("Invalid case pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Workspace root is not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Result type for engine operations
pub type ExplorerResult<T> = Result<T, ExplorerError>;
