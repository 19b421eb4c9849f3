//! Configuration for Shopfloor, read from `.shopfloor/shopfloor.toml`.
//!
//! Layered file → environment → CLI. Every section is optional; missing
//! keys fall back to the defaults below.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3142
//! db_path = ".shopfloor/shopfloor.db"
//! dev_mode = false
//!
//! [client]
//! base_url = "http://127.0.0.1:3142"
//! request_timeout_secs = 10
//!
//! [sync]
//! max_concurrent = 3
//!
//! [live]
//! events_path = "/api/events"
//! reconnect_delay_ms = 2000
//! max_reconnect_attempts = 2
//! poll_interval_ms = 2000
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR: &str = ".shopfloor";
pub const CONFIG_FILE: &str = "shopfloor.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Permissive CORS for UIs served from another origin
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3142
}

fn default_db_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("shopfloor.db")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Upper bound for every REST call; a timeout is reported as a network error
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    format!("http://{}:{}", default_host(), default_port())
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ClientSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSection {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    3
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSection {
    #[serde(default = "default_events_path")]
    pub events_path: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Consecutive push failures before switching to polling for good
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_events_path() -> String {
    "/api/events".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_max_reconnect_attempts() -> u32 {
    2
}

fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for LiveSection {
    fn default() -> Self {
        Self {
            events_path: default_events_path(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// The parsed `shopfloor.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShopfloorToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub live: LiveSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ShopfloorToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse shopfloor.toml")
    }

    /// Load from `<config_dir>/shopfloor.toml`, or defaults if it does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize shopfloor.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `SHOPFLOOR_*` environment overrides through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();
        if let Some(url) = lookup("SHOPFLOOR_URL") {
            self.client.base_url = url;
        }
        if let Some(port) = lookup("SHOPFLOOR_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warnings.push(format!("Ignoring invalid SHOPFLOOR_PORT '{}'", port)),
            }
        }
        if let Some(db) = lookup("SHOPFLOOR_DB") {
            self.server.db_path = PathBuf::from(db);
        }
        if let Some(level) = lookup("SHOPFLOOR_LOG") {
            self.logging.level = level;
        }
        warnings
    }

    /// Return human-readable warnings for suspicious values.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.client.request_timeout_secs == 0 {
            warnings.push("client.request_timeout_secs is 0; every request will time out".into());
        }
        if !self.client.base_url.starts_with("http://") && !self.client.base_url.starts_with("https://")
        {
            warnings.push(format!(
                "client.base_url '{}' is not an http(s) URL",
                self.client.base_url
            ));
        }
        if self.sync.max_concurrent == 0 {
            warnings.push("sync.max_concurrent is 0; using 1".into());
        }
        if !self.live.events_path.starts_with('/') {
            warnings.push(format!(
                "live.events_path '{}' should start with '/'",
                self.live.events_path
            ));
        }
        if self.live.max_reconnect_attempts == 0 {
            warnings.push("live.max_reconnect_attempts is 0; push will fall back to polling on the first error".into());
        }
        if self.live.poll_interval_ms < 100 {
            warnings.push(format!(
                "live.poll_interval_ms is {}; polling faster than 100ms floods the server",
                self.live.poll_interval_ms
            ));
        }
        if self.logging.level.trim().is_empty() {
            warnings.push("logging.level is empty".into());
        }
        warnings
    }
}

/// Runtime configuration: the parsed file plus where it came from.
#[derive(Debug, Clone)]
pub struct ShopfloorConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: ShopfloorToml,
    /// Non-fatal problems found while layering env overrides
    pub env_warnings: Vec<String>,
}

impl ShopfloorConfig {
    /// Load from a project directory: file, then environment.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = ShopfloorToml::load_or_default(&config_dir)?;
        let env_warnings = toml.apply_env_with(|key| std::env::var(key).ok());
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            config_dir,
            toml,
            env_warnings,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Database path resolved against the project directory.
    pub fn db_path(&self) -> PathBuf {
        if self.toml.server.db_path.is_absolute() {
            self.toml.server.db_path.clone()
        } else {
            self.project_dir.join(&self.toml.server.db_path)
        }
    }
}
