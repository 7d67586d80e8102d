//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bibmd_convert::{DEFAULT_PDF_COMMAND, DEFAULT_SUFFIX, default_workers};
use serde::Deserialize;

/// Global configuration for bibmd
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub workers: WorkersConfig,
    pub extract: ExtractConfig,
    pub watch: WatchConfig,
    /// File this was loaded from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output root is `{bib-stem}-{suffix}` in the current directory
    pub suffix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_SUFFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub default: usize,
    pub max: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        let cpus = default_workers();
        Self {
            default: cpus,
            max: cpus.max(16),
        }
    }
}

impl WorkersConfig {
    /// Requested count (or the default), clamped to `1..=max`.
    pub fn resolve(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default)
            .clamp(1, self.max.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// argv template; `{input}` and `{output_dir}` are substituted
    pub pdf_command: Vec<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            pdf_command: DEFAULT_PDF_COMMAND.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 1000 }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./bibmd.toml (current directory)
    /// 2. ~/.config/bibmd/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("bibmd.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "bibmd") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        if config.extract.pdf_command.is_empty() {
            anyhow::bail!("{}: extract.pdf_command must not be empty", path.display());
        }
        config.source = Some(path.to_path_buf());

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}
