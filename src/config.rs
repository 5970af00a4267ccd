//! Configuration for mikoterm.
//!
//! Settings are read from `~/.mikoterm/config.toml`. Every field is optional;
//! missing fields take their defaults.
//!
//! ```toml
//! # Child command line (defaults to $SHELL, /bin/sh, or cmd.exe on Windows)
//! shell = "/bin/bash"
//!
//! cols = 80
//! rows = 25
//!
//! # Bytes per read from the child's output pipe
//! read_chunk_size = 1024
//! # Output chunks buffered between the reader thread and the grid
//! channel_capacity = 256
//! # How long shutdown waits for the reader thread
//! shutdown_timeout_ms = 1000
//!
//! # Sent for Enter
//! newline = "\n"
//! # Echo typed keys into the grid (children on pipes do not echo)
//! local_echo = true
//!
//! log_level = "info"
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::pump::PumpOptions;
use crate::core::term::{DEFAULT_COLS, DEFAULT_ROWS};

const CONFIG_DIR: &str = ".mikoterm";
const CONFIG_FILE: &str = "config.toml";
const LOG_FILE: &str = "mikoterm.log";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine home directory")]
    NoHomeDir,

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Child command line
    pub shell: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub read_chunk_size: usize,
    pub channel_capacity: usize,
    pub shutdown_timeout_ms: u64,
    /// Bytes sent for the Enter key
    pub newline: String,
    pub local_echo: bool,
    /// Tracing filter directive, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            read_chunk_size: PumpOptions::DEFAULT_READ_CHUNK_SIZE,
            channel_capacity: 256,
            shutdown_timeout_ms: 1000,
            newline: default_newline().to_string(),
            local_echo: true,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `~/.mikoterm/config.toml`, falling back to defaults.
    ///
    /// A broken file is reported through `tracing`, so callers that set up
    /// logging from the config should use [`try_load`](Self::try_load) instead.
    pub fn load() -> Self {
        Self::try_load().unwrap_or_else(|e| {
            warn!("Ignoring config file: {}", e);
            Self::default()
        })
    }

    /// Like [`load`](Self::load), but hands a broken file back as an error.
    /// No home directory or no file still yields the defaults.
    pub fn try_load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_or_default(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load `path` if it exists, otherwise return the defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save configuration to `~/.mikoterm/config.toml`
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir().ok_or(ConfigError::NoHomeDir)?;
        fs::create_dir_all(&dir).map_err(|source| ConfigError::Write {
            path: dir.clone(),
            source,
        })?;
        self.save_to(&dir.join(CONFIG_FILE))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `~/.mikoterm`
    pub fn config_dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(CONFIG_DIR))
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    pub fn log_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join(LOG_FILE))
    }

    /// Command line for the child: config value, then `$SHELL`, then the platform shell
    pub fn shell_command(&self) -> String {
        self.shell
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| default_shell().to_string())
    }

    pub fn pump_options(&self) -> PumpOptions {
        PumpOptions {
            read_chunk_size: self.read_chunk_size.max(1),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
        }
    }
}

fn default_shell() -> &'static str {
    if cfg!(windows) {
        "cmd.exe"
    } else {
        "/bin/sh"
    }
}

fn default_newline() -> &'static str {
    if cfg!(windows) {
        "\r\n"
    } else {
        "\n"
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!((config.cols, config.rows), (80, 25));
        assert_eq!(config.read_chunk_size, 1024);
        assert!(config.local_echo);
        assert_eq!(config.pump_options().shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = Config::from_toml_str("shell = \"bash -l\"\nrows = 40\n").unwrap();
        assert_eq!(config.shell.as_deref(), Some("bash -l"));
        assert_eq!(config.rows, 40);
        assert_eq!(config.cols, 80);
        assert_eq!(config.shell_command(), "bash -l");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        assert!(matches!(
            Config::from_toml_str("rows = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_or_default() {
        let dir = std::env::temp_dir().join(format!("mikoterm-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let missing = dir.join("missing.toml");
        assert_eq!(Config::load_or_default(&missing).unwrap(), Config::default());

        let broken = dir.join("broken.toml");
        fs::write(&broken, "rows = \"many\"").unwrap();
        assert!(matches!(
            Config::load_or_default(&broken),
            Err(ConfigError::Parse(_))
        ));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = Config::default();
        config.newline = "\r\n".to_string();
        config.channel_capacity = 8;
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() {
        let config = Config::from_toml_str("read_chunk_size = 0").unwrap();
        assert_eq!(config.pump_options().read_chunk_size, 1);
    }

    #[test]
    fn test_blank_shell_falls_back() {
        let config = Config::from_toml_str("shell = \"  \"").unwrap();
        assert!(!config.shell_command().trim().is_empty());
    }
}
