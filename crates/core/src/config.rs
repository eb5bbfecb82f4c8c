use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Remote debugging port of an already running Chrome/Chromium.
    #[serde(default = "default_debug_port")]
    pub debug_port: u16,
    /// Explicit page-target WebSocket URL. Skips target discovery when set.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
}

fn default_debug_port() -> u16 {
    9222
}

fn default_ready_timeout_secs() -> u64 {
    15
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_navigation_timeout_ms() -> u64 {
    10_000
}

impl BrowserConfig {
    /// Debug endpoint base URL, e.g. `http://127.0.0.1:9222`.
    pub fn debug_endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.debug_port)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            debug_port: default_debug_port(),
            ws_url: None,
            ready_timeout_secs: default_ready_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
        }
    }
}

/// Filter flags applied when a snapshot request leaves them unspecified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDefaults {
    #[serde(default)]
    pub interactive: bool,
    #[serde(default = "default_compact")]
    pub compact: bool,
    #[serde(default)]
    pub cursor: bool,
    #[serde(default = "default_max_depth")]
    pub max_depth: Option<usize>,
    /// Accessible names longer than this are cut in the rendered tree.
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
}

fn default_compact() -> bool {
    true
}

fn default_max_depth() -> Option<usize> {
    Some(15)
}

fn default_max_name_len() -> usize {
    80
}

impl Default for SnapshotDefaults {
    fn default() -> Self {
        Self {
            interactive: false,
            compact: default_compact(),
            cursor: false,
            max_depth: default_max_depth(),
            max_name_len: default_max_name_len(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub snapshot: SnapshotDefaults,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading config");
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }
}
