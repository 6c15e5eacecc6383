//! Configuration types and loading for chatmirror.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::error::Result;
use crate::paths::StoreLayout;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the session database, the message store, media
    /// downloads, the lock file and the send socket.
    pub store_dir: PathBuf,

    /// Sync orchestrator configuration.
    pub sync: SyncConfig,

    /// Media download configuration.
    pub media: MediaConfig,

    /// On-demand history backfill defaults.
    pub backfill: BackfillConfig,

    /// Send gateway configuration.
    pub gateway: GatewayConfig,

    /// Search configuration.
    pub search: SearchConfig,

    /// Device identity overrides presented to the remote service.
    pub device: DeviceConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_NAME);

        Self {
            store_dir: data_dir,
            sync: SyncConfig::default(),
            media: MediaConfig::default(),
            backfill: BackfillConfig::default(),
            gateway: GatewayConfig::default(),
            search: SearchConfig::default(),
            device: DeviceConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::default_config_path())
    }

    /// Load configuration from a specific file, layering
    /// `CHATMIRROR__SECTION__KEY` environment overrides on top.
    /// A missing file yields defaults plus environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let prefix = crate::env_prefix();
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(&prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(format!("Failed to load config: {e}")))?;

        let mut config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_NAME)
            .join("config.toml")
    }

    /// Save configuration to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Ensure config exists at the given path, creating defaults if missing.
    pub fn ensure_at(path: &Path) -> Result<Self> {
        if !path.exists() {
            let mut config = Self::default();
            config.expand_paths();
            config.save_to_path(path)?;
        }
        Self::load_from_path(path)
    }

    /// Expand a path, replacing ~ with home directory.
    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::full(path)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| path.to_string());
        PathBuf::from(expanded)
    }

    fn expand_paths(&mut self) {
        self.store_dir = Self::expand_path(&self.store_dir.to_string_lossy());
    }

    fn validate(&self) -> Result<()> {
        if self.store_dir.as_os_str().is_empty() {
            return Err(Error::Config("store_dir must not be empty".to_string()));
        }
        if self.media.workers == 0 {
            return Err(Error::Config("media.workers must be at least 1".to_string()));
        }
        if self.media.queue_capacity == 0 {
            return Err(Error::Config(
                "media.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.sync.reconnect_min_ms > self.sync.reconnect_max_ms {
            return Err(Error::Config(
                "sync.reconnect_min_ms must not exceed sync.reconnect_max_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Well-known file locations under the store directory.
    pub fn layout(&self) -> StoreLayout {
        StoreLayout::new(&self.store_dir)
    }
}

/// Sync orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds without inbound events before bootstrap/once modes exit.
    pub idle_exit_secs: u64,

    /// Queue media downloads for stored messages.
    pub download_media: bool,

    /// Import the full contact list after connecting.
    pub refresh_contacts: bool,

    /// Import joined groups after connecting.
    pub refresh_groups: bool,

    /// Initial reconnect delay in milliseconds.
    pub reconnect_min_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds.
    pub reconnect_max_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            idle_exit_secs: 30,
            download_media: false,
            refresh_contacts: false,
            refresh_groups: false,
            reconnect_min_ms: 2_000,
            reconnect_max_ms: 30_000,
        }
    }
}

impl SyncConfig {
    pub fn idle_exit(&self) -> Duration {
        Duration::from_secs(self.idle_exit_secs)
    }

    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

/// Media download configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Number of concurrent download workers.
    pub workers: usize,

    /// Capacity of the pending download queue.
    pub queue_capacity: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 512,
        }
    }
}

/// On-demand history backfill defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// Messages requested per round.
    pub count: u32,

    /// Maximum number of request rounds.
    pub requests: u32,

    /// Seconds to wait for each correlated response.
    pub wait_secs: u64,

    /// Idle-exit window for the surrounding sync session.
    pub idle_exit_secs: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            count: 50,
            requests: 1,
            wait_secs: 60,
            idle_exit_secs: 5,
        }
    }
}

/// Send gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Serve the send socket while a sync session is running.
    pub enabled: bool,

    /// Deadline for text sends, in seconds.
    pub text_timeout_secs: u64,

    /// Deadline for file sends, in seconds.
    pub file_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            text_timeout_secs: 30,
            file_timeout_secs: 120,
        }
    }
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Provision the FTS5 index. When false, search uses substring matching.
    pub full_text: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { full_text: true }
    }
}

/// Device identity overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Label shown in the linked-devices list.
    pub label: Option<String>,

    /// Platform type name (e.g. "CHROME", "DESKTOP").
    pub platform: Option<String>,
}

impl DeviceConfig {
    /// Normalized platform name. Unknown or empty values fall back to CHROME.
    pub fn platform_name(&self) -> String {
        const KNOWN: &[&str] = &[
            "CHROME", "FIREFOX", "IE", "OPERA", "SAFARI", "EDGE", "DESKTOP", "IPAD",
            "ANDROID_TABLET", "OHANA", "ALOHA", "CATALINA", "TCL_TV", "UWP",
        ];
        let raw = self
            .platform
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_uppercase();
        if KNOWN.contains(&raw.as_str()) {
            raw
        } else {
            "CHROME".to_string()
        }
    }

    /// Trimmed device label, if one is set.
    pub fn label(&self) -> Option<&str> {
        self.label
            .as_deref()
            .map(str::trim)
            .filter(|label| !label.is_empty())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
