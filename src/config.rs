//! Runtime configuration
//!
//! Loaded from a JSON file (every field has a serde-level default, so a
//! partial or missing file works) with an environment override for the API
//! key. The file is written back out with defaults on first start.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the on-disk state (rules, bans, journals)
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Directory of `*.json` rule files
    #[serde(default = "default_rules_dir")]
    pub rules_dir: PathBuf,
    /// Ban persistence file
    #[serde(default = "default_bans_file")]
    pub bans_file: PathBuf,
    /// Whitelisted addresses (JSON array of strings)
    #[serde(default = "default_whitelist_file")]
    pub whitelist_file: PathBuf,
    /// HTML template served on `/banned_page`
    #[serde(default = "default_banned_page_file")]
    pub banned_page_file: PathBuf,
    /// Server bind host
    #[serde(default = "default_host")]
    pub host: String,
    /// Server bind port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret for admin endpoints (`X-API-Key`)
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Worker-pool bound for concurrent module evaluation
    #[serde(default = "default_module_threads")]
    pub module_threads: usize,
    /// Default ban duration in minutes (fractional values allowed)
    #[serde(default = "default_delay_ban_minutes")]
    pub delay_ban_minutes: f64,
    /// Response-phase brute-force window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Response-phase brute-force threshold within the window
    #[serde(default = "default_window_max_requests")]
    pub window_max_requests: usize,
    /// Decision LRU capacity
    #[serde(default = "default_cache_maxsize")]
    pub cache_maxsize: usize,
    /// Toggle for the response-phase brute-force module
    #[serde(default = "default_true")]
    pub anti_http_generic_bf: bool,
    /// Toggle for response-phase filtering as a whole
    #[serde(default = "default_true")]
    pub enable_response_filter: bool,
    /// Advertised to the interceptor via `/config`
    #[serde(default = "default_true")]
    pub enable_request_body_check: bool,
    /// Advertised to the interceptor via `/config`
    #[serde(default)]
    pub enable_response_body_check: bool,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_rules_dir() -> PathBuf {
    PathBuf::from("./data/rules")
}
fn default_bans_file() -> PathBuf {
    PathBuf::from("./data/bans/bans.json")
}
fn default_whitelist_file() -> PathBuf {
    PathBuf::from("./data/bans/whitelist.json")
}
fn default_banned_page_file() -> PathBuf {
    PathBuf::from("./data/banned.html")
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_api_key() -> String {
    "changeme".to_string()
}
fn default_module_threads() -> usize {
    10
}
fn default_delay_ban_minutes() -> f64 {
    15.0
}
fn default_window_seconds() -> u64 {
    10
}
fn default_window_max_requests() -> usize {
    5
}
fn default_cache_maxsize() -> usize {
    32
}
fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            rules_dir: default_rules_dir(),
            bans_file: default_bans_file(),
            whitelist_file: default_whitelist_file(),
            banned_page_file: default_banned_page_file(),
            host: default_host(),
            port: default_port(),
            api_key: default_api_key(),
            module_threads: default_module_threads(),
            delay_ban_minutes: default_delay_ban_minutes(),
            window_seconds: default_window_seconds(),
            window_max_requests: default_window_max_requests(),
            cache_maxsize: default_cache_maxsize(),
            anti_http_generic_bf: true,
            enable_response_filter: true,
            enable_request_body_check: true,
            enable_response_body_check: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// A missing file yields the defaults; a malformed file is an error.
    /// `RWAF_API_KEY` overrides the file's `api_key` when set.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
            serde_json::from_str(&raw)
                .map_err(|e| ConfigError::Parse(path.display().to_string(), e))?
        } else {
            info!(path = %path.display(), "No config file found, using defaults");
            Config::default()
        };

        if let Ok(key) = env::var("RWAF_API_KEY") {
            if !key.is_empty() {
                config.api_key = key;
                info!("API key loaded from environment variable");
            }
        }

        info!(
            host = %config.host,
            port = %config.port,
            module_threads = config.module_threads,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("Failed to parse config file {0}: {1}")]
    Parse(String, #[source] serde_json::Error),
}
