//! Explorer configuration (protostar-explorer.toml)
//!
//! Configuration is merged in the following order (later overrides earlier):
//! 1. Built-in defaults
//! 2. `protostar-explorer.toml`, found by walking up from the start directory
//! 3. Environment variables (`PROTOSTAR_EXPLORER_*`)
//! 4. CLI flags (handled by the caller)
//!
//! ```toml
//! [runner]
//! program = "protostar"
//! base_args = ["-p", "ci", "test"]
//! numbering = "per-chunk"
//!
//! [discovery]
//! extension = "cairo"
//! case_keyword = "func"
//! denied_segments = [".git", "lib"]
//! ```

use crate::filter::DEFAULT_DENIED_SEGMENTS;
use crate::scanner::DEFAULT_CASE_KEYWORD;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Name of the project configuration file
pub const CONFIG_FILE_NAME: &str = "protostar-explorer.toml";

pub const ENV_PROGRAM: &str = "PROTOSTAR_EXPLORER_PROGRAM";
pub const ENV_EXTENSION: &str = "PROTOSTAR_EXPLORER_EXTENSION";
pub const ENV_NUMBERING: &str = "PROTOSTAR_EXPLORER_NUMBERING";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// How result lines are numbered in the run log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressNumbering {
    /// `n/total` restart with every output chunk
    #[default]
    PerChunk,
    /// `n/total` accumulate over one node's whole execution
    Cumulative,
}

impl FromStr for ProgressNumbering {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per-chunk" | "per_chunk" | "chunk" => Ok(Self::PerChunk),
            "cumulative" => Ok(Self::Cumulative),
            other => Err(ConfigError::InvalidValue {
                field: "runner.numbering".to_string(),
                reason: format!("unknown numbering '{}'", other),
            }),
        }
    }
}

impl fmt::Display for ProgressNumbering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerChunk => write!(f, "per-chunk"),
            Self::Cumulative => write!(f, "cumulative"),
        }
    }
}

/// Test runner invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Runner executable
    pub program: String,
    /// Arguments placed before the node id
    pub base_args: Vec<String>,
    pub numbering: ProgressNumbering,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "protostar".to_string(),
            base_args: vec!["-p".to_string(), "ci".to_string(), "test".to_string()],
            numbering: ProgressNumbering::default(),
        }
    }
}

/// Which files and functions count as tests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Source file extension, without the dot
    pub extension: String,
    /// Keyword that starts a function declaration
    pub case_keyword: String,
    /// Top-level directories never scanned
    pub denied_segments: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            extension: "cairo".to_string(),
            case_keyword: DEFAULT_CASE_KEYWORD.to_string(),
            denied_segments: DEFAULT_DENIED_SEGMENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Full explorer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ExplorerConfig {
    pub runner: RunnerConfig,
    pub discovery: DiscoveryConfig,
}

impl ExplorerConfig {
    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.runner.program.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "runner.program".to_string(),
                reason: "program cannot be empty".to_string(),
            });
        }

        let extension = &self.discovery.extension;
        if extension.is_empty() || extension.starts_with('.') || extension.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "discovery.extension".to_string(),
                reason: format!("invalid extension '{}'", extension),
            });
        }

        if self.discovery.case_keyword.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "discovery.case_keyword".to_string(),
                reason: "keyword cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration together with where it was found
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: ExplorerConfig,
    /// File the configuration was read from, if any
    pub source: Option<PathBuf>,
}

/// Configuration loader
///
/// Walks up from a start directory to find `protostar-explorer.toml`, then
/// applies environment overrides.
#[derive(Debug, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load configuration starting from the given directory
    pub fn load_from_directory(&self, start_dir: &Path) -> ConfigResult<LoadedConfig> {
        let (source, config) = self.find_config(start_dir)?;
        let config = self.apply_env_overrides(config)?;
        config.validate()?;
        Ok(LoadedConfig { config, source })
    }

    /// Load configuration from a specific file
    pub fn load_from_file(&self, config_path: &Path) -> ConfigResult<LoadedConfig> {
        let config = ExplorerConfig::load_from_file(config_path)?;
        let config = self.apply_env_overrides(config)?;
        config.validate()?;
        Ok(LoadedConfig {
            config,
            source: Some(config_path.to_path_buf()),
        })
    }

    fn find_config(&self, start_dir: &Path) -> ConfigResult<(Option<PathBuf>, ExplorerConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.exists() {
                let config = ExplorerConfig::load_from_file(&config_path)?;
                return Ok((Some(config_path), config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ExplorerConfig::default())),
            }
        }
    }

    /// Apply `PROTOSTAR_EXPLORER_*` overrides
    fn apply_env_overrides(&self, mut config: ExplorerConfig) -> ConfigResult<ExplorerConfig> {
        if let Ok(program) = env::var(ENV_PROGRAM) {
            config.runner.program = program;
        }

        if let Ok(extension) = env::var(ENV_EXTENSION) {
            config.discovery.extension = extension;
        }

        if let Ok(numbering) = env::var(ENV_NUMBERING) {
            config.runner.numbering = numbering.parse()?;
        }

        Ok(config)
    }
}
