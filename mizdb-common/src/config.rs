//! Configuration loading and database path resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable overriding the database location
pub const DATABASE_ENV_VAR: &str = "MIZDB_DATABASE";

/// Contents of `config.toml`; every key is optional
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Path of the archive database
    pub database: Option<PathBuf>,
    /// User id recorded in the change log for maintenance actions
    pub actor_id: Option<i64>,
    /// Default tracing filter (e.g. "info", "mizdb_maint=debug")
    pub log_level: Option<String>,
}

impl TomlConfig {
    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
    }
}

/// Resolved settings for one maintenance run
#[derive(Debug, Clone, PartialEq)]
pub struct MaintConfig {
    pub database: PathBuf,
    pub actor_id: i64,
    pub log_level: String,
}

impl MaintConfig {
    /// Resolve settings from the command line, environment and config file
    ///
    /// A missing or unreadable config file is not fatal: the compiled
    /// defaults apply and a warning is logged.
    pub fn resolve(cli_database: Option<&Path>, cli_config: Option<&Path>) -> Self {
        let config_path = cli_config.map(Path::to_path_buf).or_else(find_config_file);

        let toml_config = match config_path {
            Some(path) => TomlConfig::load(&path).unwrap_or_else(|e| {
                warn!("Ignoring config file {}: {}", path.display(), e);
                TomlConfig::default()
            }),
            None => TomlConfig::default(),
        };

        Self::from_sources(cli_database, &toml_config)
    }

    /// Combine explicit sources; see [`resolve_database_path`] for priorities
    pub fn from_sources(cli_database: Option<&Path>, toml_config: &TomlConfig) -> Self {
        Self {
            database: resolve_database_path(cli_database, toml_config),
            actor_id: toml_config.actor_id.unwrap_or(0),
            log_level: toml_config
                .log_level
                .clone()
                .unwrap_or_else(|| "info".to_string()),
        }
    }
}

/// Database path resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_database_path(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(DATABASE_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &toml_config.database {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_database_path()
}

/// Locate the config file for the platform, if one exists
pub fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("mizdb").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/mizdb/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default database path
pub fn default_database_path() -> PathBuf {
    let data_dir = if cfg!(target_os = "linux") {
        // ~/.local/share/mizdb (or /var/lib/mizdb for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("mizdb"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/mizdb"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("mizdb"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/mizdb"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("mizdb"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\mizdb"))
    } else {
        PathBuf::from("./mizdb_data")
    };

    data_dir.join("mizdb.db")
}
