//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration only: where the root folder lives, how to log, and
//! static tuning for the recommendation backends. Runtime choices that users
//! change from the UI (such as the recommendation engine type) live in the
//! `settings` table instead, see [`crate::db::settings`].
//!
//! Root folder resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `WKMP_ROOT_FOLDER` environment variable
//! 3. `WKMP_ROOT` environment variable
//! 4. TOML config file `root_folder`
//! 5. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "wkmp.db";

/// Cache sub-folder inside the root folder
pub const CACHE_DIR_NAME: &str = "cache";

/// Bootstrap configuration loaded from a TOML file
///
/// Every field is optional; a missing file or missing keys never prevent
/// startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database and caches
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Recommendation backend tuning
    #[serde(default)]
    pub recommendation: RecommendationToml,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `[recommendation]` section of the TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationToml {
    /// Override for the model cache folder (defaults to `<root>/cache`)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Feature name -> weight used by the features backend.
    /// Empty means the built-in training set.
    #[serde(default)]
    pub feature_weights: BTreeMap<String, f64>,
}

/// OS-dependent compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: get_default_root_folder(),
            log_level: default_log_level(),
        }
    }
}

/// Resolves the root folder for one module
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
        }
    }

    /// Highest-priority override, typically `--root-folder`
    pub fn with_cli_arg(mut self, cli_arg: Option<PathBuf>) -> Self {
        self.cli_arg = cli_arg;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            debug!(module = %self.module_name, "Root folder from command line: {}", path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var("WKMP_ROOT_FOLDER") {
            return PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("WKMP_ROOT") {
            return PathBuf::from(path);
        }

        if let Some(root_folder) = self.load_toml().and_then(|config| config.root_folder) {
            return root_folder;
        }

        CompiledDefaults::for_current_platform().root_folder
    }

    /// Load this module's TOML config, falling back to defaults
    pub fn load_config(&self) -> TomlConfig {
        self.load_toml().unwrap_or_default()
    }

    fn load_toml(&self) -> Option<TomlConfig> {
        let path = config_file_path(&self.module_name)?;
        match load_toml_config(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Ignoring config file {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Creates the root folder and derives well-known paths from it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root_folder.join(CACHE_DIR_NAME)
    }
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid TOML in {}: {}", path.display(), e)))
}

/// Write a TOML config file, creating parent folders as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to encode TOML: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Locate `<module>.toml` for the platform, if one exists
fn config_file_path(module_name: &str) -> Option<PathBuf> {
    let file_name = format!("{}.toml", module_name);

    let user_config = dirs::config_dir().map(|d| d.join("wkmp").join(&file_name));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/wkmp").join(&file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/wkmp (or /var/lib/wkmp for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("wkmp"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/wkmp"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("wkmp"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/wkmp"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("wkmp"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\wkmp"))
    } else {
        PathBuf::from("./wkmp_data")
    }
}
