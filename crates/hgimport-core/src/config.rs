//! Configuration for the import queue and its tools.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $HGIMPORT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/hgimport/config.toml
//!   3. ~/.config/hgimport/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub queue: QueueConfig,
    pub bench: BenchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of import worker threads. Must be positive.
    pub worker_threads: usize,
    /// Worker threads are named `{prefix}-{index}`.
    pub thread_name_prefix: String,
    /// Coalesce requests for an object that is already queued or in flight.
    pub dedupe: bool,
}

/// Settings for the `hgimport-bench` load generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub producers: usize,
    pub requests_per_producer: usize,
    /// Size of the id space requests are drawn from. Smaller = more dedupe.
    pub distinct_ids: u64,
    /// Artificial latency added to every synthetic fetch.
    pub fetch_latency_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_threads: 8,
            thread_name_prefix: "hgqueue".to_string(),
            dedupe: true,
        }
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            producers: 4,
            requests_per_producer: 1000,
            distinct_ids: 256,
            fetch_latency_ms: 1,
        }
    }
}

impl QueueConfig {
    pub fn with_workers(worker_threads: usize) -> Self {
        Self {
            worker_threads,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.worker_threads == 0 {
            return Err("queue.worker_threads must be at least 1".to_string());
        }
        if self.thread_name_prefix.contains('\0') {
            return Err("queue.thread_name_prefix must not contain NUL".to_string());
        }
        Ok(())
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("hgimport")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ImportConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ImportConfig::default()
        };
        config.apply_env_overrides();
        config.queue.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Parse config from TOML text. No env overrides are applied.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ImportConfig = toml::from_str(text)
            .map_err(|e| ConfigError::ParseFailed(PathBuf::from("<inline>"), e))?;
        config.queue.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HGIMPORT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ImportConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply HGIMPORT_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HGIMPORT_QUEUE__WORKER_THREADS") {
            if let Ok(n) = v.parse() {
                self.queue.worker_threads = n;
            }
        }
        if let Ok(v) = std::env::var("HGIMPORT_QUEUE__THREAD_NAME_PREFIX") {
            self.queue.thread_name_prefix = v;
        }
        if let Ok(v) = std::env::var("HGIMPORT_QUEUE__DEDUPE") {
            self.queue.dedupe = v == "true" || v == "1";
        }
    }
}
