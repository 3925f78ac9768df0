use crate::messages::{WireConfig, DEFAULT_MAX_PART_SIZE};
use crate::network::{PoolConfig, ServerAddress, ServerSelection};
use crate::ops::ExecutorConfig;
use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration, usually read from `config.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Grid servers as `host:port`
    pub servers: Vec<String>,
    /// Server-failover attempts per operation
    pub max_attempts: u32,
    pub per_attempt_timeout_ms: u64,
    /// How long to wait for a free connection slot
    pub acquire_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// How long a reused connection may take to deliver a reply that arrived late
    pub stale_reply_timeout_ms: u64,
    pub max_connections_per_server: usize,
    /// Idle connections older than this are closed; 0 disables pruning
    pub idle_timeout_ms: u64,
    pub max_part_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            max_attempts: 3,
            per_attempt_timeout_ms: 10_000,
            acquire_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            stale_reply_timeout_ms: 1_000,
            max_connections_per_server: 8,
            idle_timeout_ms: 300_000,
            max_part_size: DEFAULT_MAX_PART_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn default_config_dir() -> Result<PathBuf> {
        ProjectDirs::from("dev", "gridlink", "gridlink")
            .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
    }

    pub fn default_config_file() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
        let config: ClientConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the default config file, falling back to defaults when it is absent
    pub fn load_or_default() -> Result<Self> {
        let config_file = Self::default_config_file()?;
        if config_file.exists() {
            Self::load(&config_file)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path, content).context("Failed to write configuration file")?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.max_connections_per_server == 0 {
            bail!("max_connections_per_server must be at least 1");
        }
        if self.per_attempt_timeout_ms == 0 {
            bail!("per_attempt_timeout_ms must be greater than zero");
        }
        if self.acquire_timeout_ms == 0 {
            bail!("acquire_timeout_ms must be greater than zero");
        }
        if self.connect_timeout_ms == 0 {
            bail!("connect_timeout_ms must be greater than zero");
        }
        if self.stale_reply_timeout_ms == 0 {
            bail!("stale_reply_timeout_ms must be greater than zero");
        }
        if self.max_part_size == 0 {
            bail!("max_part_size must be greater than zero");
        }
        self.server_addresses()?;
        Ok(())
    }

    pub fn server_addresses(&self) -> Result<Vec<ServerAddress>> {
        self.servers
            .iter()
            .map(|server| {
                ServerAddress::parse(server).with_context(|| format!("Invalid server address '{}'", server))
            })
            .collect()
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections_per_server: self.max_connections_per_server,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            stale_reply_timeout: Duration::from_millis(self.stale_reply_timeout_ms),
            selection: ServerSelection::LeastLoaded,
            wire_config: WireConfig::with_max_part_size(self.max_part_size),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_attempts: self.max_attempts,
            per_attempt_timeout: Duration::from_millis(self.per_attempt_timeout_ms),
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}
