//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/rivulet/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/rivulet/` (~/.config/rivulet/)
//! - State/Logs: `$XDG_STATE_HOME/rivulet/` (~/.local/state/rivulet/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Event buffer tuning
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Chat API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Generation defaults
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tuning for the per-message pending event buffer.
///
/// Events addressed to a not-yet-created message wait here. The cap bounds
/// memory (drop-oldest past it, a known lossy edge); the timeouts bound how
/// long an orphaned queue lives. Document events use a shorter window than
/// content: they only race `response_start` narrowly and are rare.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// Max queued events per message id (drop-oldest past this)
    #[serde(default = "default_buffer_cap")]
    pub queue_cap: usize,

    /// Cleanup window for buffered content/tool/citation events (ms)
    #[serde(default = "default_content_timeout_ms")]
    pub content_timeout_ms: u64,

    /// Cleanup window for buffered document events (ms)
    #[serde(default = "default_document_timeout_ms")]
    pub document_timeout_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            queue_cap: default_buffer_cap(),
            content_timeout_ms: default_content_timeout_ms(),
            document_timeout_ms: default_document_timeout_ms(),
        }
    }
}

impl BufferConfig {
    /// Cleanup window for a given wire event type
    pub fn timeout_for(&self, event_type: &str) -> Duration {
        if event_type == "document" {
            Duration::from_millis(self.document_timeout_ms)
        } else {
            Duration::from_millis(self.content_timeout_ms)
        }
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.queue_cap == 0 {
            return Err(Error::Config(
                "buffer.queue_cap must be at least 1".to_string(),
            ));
        }
        if self.content_timeout_ms == 0 || self.document_timeout_ms == 0 {
            return Err(Error::Config(
                "buffer timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_buffer_cap() -> usize {
    12
}

fn default_content_timeout_ms() -> u64 {
    200
}

fn default_document_timeout_ms() -> u64 {
    120
}

/// Chat CRUD / metadata API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the chat service (e.g., `https://workbench.example.com/api/v1`)
    pub base_url: Option<String>,

    /// Bearer token for authenticated requests
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: default_api_timeout(),
        }
    }
}

impl ApiConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_none() {
            return Err(Error::Config("api.base_url is required".to_string()));
        }
        Ok(())
    }
}

fn default_api_timeout() -> u64 {
    30
}

/// Defaults applied when starting a generation
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    /// Task handler used when the caller does not name one
    #[serde(default = "default_task")]
    pub default_task: String,

    /// Persona forwarded with generate commands (optional)
    pub persona: Option<String>,

    /// Task handler whose content output is gated behind research phases
    #[serde(default = "default_research_task")]
    pub research_task: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_task: default_task(),
            persona: None,
            research_task: default_research_task(),
        }
    }
}

fn default_task() -> String {
    "chat".to_string()
}

fn default_research_task() -> String {
    "rag_oss".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.buffer.validate()?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/rivulet/config.toml` (~/.config/rivulet/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("rivulet").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/rivulet/` (~/.local/state/rivulet/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("rivulet")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/rivulet/rivulet.log` (~/.local/state/rivulet/rivulet.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("rivulet.log")
    }
}
