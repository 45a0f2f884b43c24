use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::info;

use crate::error::ImportError;

/// Global configuration instance
static CONFIG: OnceCell<RwLock<ImportConfig>> = OnceCell::new();

/// Serializes tests that touch the global configuration
#[cfg(test)]
pub(crate) static GLOBAL_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Import pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub filters: FilterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding channels, threads and imported messages
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Page size hint passed to the provider
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Global limit on channels syncing at the same time
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Stop a run after this many pages (the next run resumes from the cursor)
    #[serde(default)]
    pub max_pages_per_run: Option<u32>,

    /// Running locks older than this are considered abandoned
    #[serde(default = "default_stale_run_minutes")]
    pub stale_run_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Attempts per page before the run fails
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_true")]
    pub jitter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Messages carrying an attachment with one of these extensions are not imported
    #[serde(default = "default_blocked_extensions")]
    pub blocked_attachment_extensions: Vec<String>,
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("message-import")
        .join("import.db")
}

fn default_page_size() -> usize {
    100
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_stale_run_minutes() -> i64 {
    60
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_blocked_extensions() -> Vec<String> {
    vec![".ics".to_string()]
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_concurrent_runs: default_max_concurrent_runs(),
            max_pages_per_run: None,
            stale_run_minutes: default_stale_run_minutes(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: default_max_attempts(),
            jitter: true,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            blocked_attachment_extensions: default_blocked_extensions(),
        }
    }
}

impl ImportConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self, ImportError> {
        let config: ImportConfig = toml::from_str(content)
            .map_err(|e| ImportError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load(path: &Path) -> Result<Self, ImportError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ImportError::Config(format!("Failed to read config: {}", e)))?;
        Self::from_toml(&content)
    }

    fn validate(&self) -> Result<(), ImportError> {
        if self.sync.max_concurrent_runs == 0 {
            return Err(ImportError::Config(
                "sync.max_concurrent_runs must be at least 1".into(),
            ));
        }
        if self.sync.page_size == 0 {
            return Err(ImportError::Config("sync.page_size must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ImportError::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("message-import").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(
            home_dir
                .join(".config")
                .join("message-import")
                .join("config.toml"),
        );
    }

    paths
}

/// Initialize configuration from default paths, falling back to defaults
pub fn init_config() -> Result<(), ImportError> {
    for path in default_config_paths() {
        if path.exists() {
            info!("Found config at: {:?}", path);
            return init_config_from_path(&path);
        }
    }

    info!("No config file found, using defaults");
    set_config(ImportConfig::default())
}

/// Initialize configuration from a specific path
pub fn init_config_from_path(path: &Path) -> Result<(), ImportError> {
    info!("Loading configuration from: {:?}", path);
    set_config(ImportConfig::load(path)?)
}

fn set_config(config: ImportConfig) -> Result<(), ImportError> {
    match CONFIG.get() {
        Some(lock) => {
            let mut guard = lock
                .write()
                .map_err(|e| ImportError::Config(format!("Failed to lock config: {}", e)))?;
            *guard = config;
        }
        None => {
            CONFIG.set(RwLock::new(config)).ok();
        }
    }
    Ok(())
}

/// Current configuration, or defaults when none was loaded
pub fn get_config() -> ImportConfig {
    CONFIG
        .get()
        .and_then(|lock| lock.read().ok().map(|c| c.clone()))
        .unwrap_or_default()
}
