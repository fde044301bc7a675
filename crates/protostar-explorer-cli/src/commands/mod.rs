pub mod list;
pub mod run;
pub mod watch;

use crate::console::{ConsoleOptions, ConsoleOutput};
use anyhow::{Context, Result};
use protostar_explorer::{
    ConfigLoader, ExplorerConfig, ExplorerSession, LocalWorkspace, WorkspaceProvider,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Project folder from the command line, or the current directory
pub fn project_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().context("Failed to read current directory"),
    }
}

/// Configuration found from `dir` upwards, with environment overrides
pub fn load_config(dir: &Path) -> Result<ExplorerConfig> {
    let loaded = ConfigLoader::new()
        .load_from_directory(dir)
        .with_context(|| format!("Failed to load configuration for {}", dir.display()))?;
    match &loaded.source {
        Some(source) => debug!(config = %source.display(), "loaded configuration"),
        None => debug!("no configuration file, using defaults"),
    }
    Ok(loaded.config)
}

/// Session over a single project folder, already started
pub fn open_session(
    dir: &Path,
    config: &ExplorerConfig,
    options: ConsoleOptions,
) -> Result<(ExplorerSession, String)> {
    let workspace = LocalWorkspace::new([dir])
        .with_context(|| format!("Cannot open project at {}", dir.display()))?;
    let root = workspace
        .folders()
        .first()
        .map(|folder| folder.name.clone())
        .context("Project has no workspace folder")?;

    let output = Arc::new(ConsoleOutput::new(options));
    let mut session = ExplorerSession::new(Arc::new(workspace), output, config)?;
    session.start().context("Failed to discover test files")?;
    Ok((session, root))
}
