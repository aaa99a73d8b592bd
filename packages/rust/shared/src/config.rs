//! Application configuration for loadchain.
//!
//! User config lives at `~/.loadchain/loadchain.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LoadchainError, Result};
use crate::types::status;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "loadchain.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".loadchain";

// ---------------------------------------------------------------------------
// Config structs (matching loadchain.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Error policy settings.
    #[serde(default)]
    pub errors: ErrorsConfig,

    /// Request scope settings.
    #[serde(default)]
    pub server: ServerConfig,
}

/// `[errors]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorsConfig {
    /// Status code written by the default error policy.
    #[serde(default = "default_status")]
    pub status: u16,

    /// Client-facing message written by the default error policy.
    #[serde(default = "default_message")]
    pub message: String,

    /// Write the full load report to the client instead of `message`.
    #[serde(default)]
    pub expose_report: bool,
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            status: default_status(),
            message: default_message(),
            expose_report: false,
        }
    }
}

fn default_status() -> u16 {
    status::INTERNAL_SERVER_ERROR
}
fn default_message() -> String {
    "Internal Server Error".into()
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Tag every request scope with a fresh request id.
    #[serde(default = "default_true")]
    pub tag_requests: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { tag_requests: true }
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Scope config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime settings used to build the base scope.
#[derive(Debug, Clone)]
pub struct ScopeConfig {
    pub error_status: u16,
    pub error_message: String,
    pub expose_report: bool,
    pub tag_requests: bool,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ScopeConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            error_status: config.errors.status,
            error_message: config.errors.message.clone(),
            expose_report: config.errors.expose_report,
            tag_requests: config.server.tag_requests,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.loadchain/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LoadchainError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.loadchain/loadchain.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LoadchainError::io(path, e))?;
    parse_config(&content)
        .map_err(|e| LoadchainError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
    let config: AppConfig =
        toml::from_str(content).map_err(|e| LoadchainError::config(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Reject settings the engine cannot honour.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if !status::is_error(config.errors.status) {
        return Err(LoadchainError::config(format!(
            "errors.status must be a 4xx or 5xx code, got {}",
            config.errors.status
        )));
    }
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LoadchainError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LoadchainError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LoadchainError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
