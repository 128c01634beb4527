use anyhow::{Context, Result};
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

use crate::session::MAX_CANDIDATES;

const TELEGRAM_UPLOAD_LIMIT_MB: u64 = 50;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    telegram_token: Option<String>,
    pub logging: LoggingConfig,
    pub download: DownloadConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DownloadConfig {
    pub dir: Option<PathBuf>,
    pub timeout_secs: u64,
    pub max_upload_mb: u64,
    pub ytdlp_path: String,
    /// Inserted before the generated arguments, e.g. `--cookies` or `--proxy`.
    pub ytdlp_args: Vec<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            dir: None,
            timeout_secs: 300,
            max_upload_mb: TELEGRAM_UPLOAD_LIMIT_MB,
            ytdlp_path: "yt-dlp".to_string(),
            ytdlp_args: Vec::new(),
        }
    }
}

impl DownloadConfig {
    pub fn dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("tubegrab"))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1_000_000)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    max_results: usize,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: MAX_CANDIDATES,
            timeout_secs: 30,
        }
    }
}

impl SearchConfig {
    pub fn max_results(&self) -> usize {
        self.max_results.clamp(1, MAX_CANDIDATES)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file {}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn get_logging_format(&self) -> &str {
        &self.logging.format
    }

    /// Token from the config file, else `TELOXIDE_TOKEN`.
    pub fn telegram_token(&self) -> Option<String> {
        self.telegram_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var("TELOXIDE_TOKEN").ok())
    }
}
