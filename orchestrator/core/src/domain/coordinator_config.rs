// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Coordinator Configuration Types
//
// Defines the configuration schema for a tokentime coordinator, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Contract defaults (tokens wanted, coop size)
// - Lifecycle timing for the background sweeper
// - Ledger cross-check worker cap
// - Snapshot storage backend
// - Event bus and logging settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "tokentime/v1";
pub const KIND: &str = "CoordinatorConfig";

/// Top-level Kubernetes-style coordinator configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfigManifest {
    /// API version (must be "tokentime/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "CoordinatorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: CoordinatorConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable coordinator name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfigSpec {
    #[serde(default)]
    pub defaults: ContractDefaults,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub cross_check: CrossCheckConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub event_bus: EventBusConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractDefaults {
    /// Tokens a participant wants when they do not say otherwise
    #[serde(default = "default_tokens_wanted")]
    pub tokens_wanted: u32,

    /// Coop size assumed by tooling that does not know the real one
    #[serde(default = "default_coop_size")]
    pub coop_size: usize,
}

impl Default for ContractDefaults {
    fn default() -> Self {
        Self {
            tokens_wanted: default_tokens_wanted(),
            coop_size: default_coop_size(),
        }
    }
}

/// Timing used by the lifecycle sweeper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// How long a Waiting contract accepts late joiners before completing
    #[serde(default = "default_late_join_timeout", with = "humantime_serde")]
    pub late_join_timeout: Duration,

    /// Minimum contract age before automatic archival
    #[serde(default = "default_archive_after", with = "humantime_serde")]
    pub archive_after: Duration,

    /// Minimum quiet period before automatic archival
    #[serde(default = "default_idle_after", with = "humantime_serde")]
    pub idle_after: Duration,

    /// How long an archived, persisted contract stays in the registry
    #[serde(default = "default_purge_grace", with = "humantime_serde")]
    pub purge_grace: Duration,

    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            late_join_timeout: default_late_join_timeout(),
            archive_after: default_archive_after(),
            idle_after: default_idle_after(),
            purge_grace: default_purge_grace(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossCheckConfig {
    /// Upper bound on concurrent fetches against the external token source
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for CrossCheckConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Snapshot directory (required for the file backend)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_event_bus_capacity")]
    pub capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_bus_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
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

// Default value functions
fn default_tokens_wanted() -> u32 {
    crate::domain::contract::DEFAULT_TOKENS_WANTED
}

fn default_coop_size() -> usize {
    10
}

fn default_late_join_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_archive_after() -> Duration {
    Duration::from_secs(3 * 24 * 60 * 60)
}

fn default_idle_after() -> Duration {
    Duration::from_secs(12 * 60 * 60)
}

fn default_purge_grace() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_workers() -> usize {
    8
}

fn default_event_bus_capacity() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CoordinatorConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "tokentime".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: CoordinatorConfigSpec::default(),
        }
    }
}

impl CoordinatorConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. TOKENTIME_CONFIG_PATH environment variable
    /// 2. ./tokentime-config.yaml (working directory)
    /// 3. ~/.tokentime/config.yaml (user home)
    /// 4. /etc/tokentime/config.yaml (system, Unix) or C:\ProgramData\Tokentime\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("TOKENTIME_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./tokentime-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".tokentime").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/tokentime/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Tokentime\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TOKENTIME_STORAGE_PATH") {
            tracing::info!("Environment override: TOKENTIME_STORAGE_PATH={}", val);
            self.spec.storage.backend = StorageBackend::File;
            self.spec.storage.path = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("TOKENTIME_LATE_JOIN_TIMEOUT") {
            match humantime::parse_duration(&val) {
                Ok(timeout) => {
                    tracing::info!("Environment override: TOKENTIME_LATE_JOIN_TIMEOUT={}", val);
                    self.spec.lifecycle.late_join_timeout = timeout;
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid value for TOKENTIME_LATE_JOIN_TIMEOUT: '{}' ({}). Ignoring.",
                        val,
                        e
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("TOKENTIME_CROSS_CHECK_WORKERS") {
            match val.parse::<usize>() {
                Ok(workers) => {
                    tracing::info!("Environment override: TOKENTIME_CROSS_CHECK_WORKERS={}", workers);
                    self.spec.cross_check.max_workers = workers;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for TOKENTIME_CROSS_CHECK_WORKERS: '{}'. Expected a positive integer. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.defaults.tokens_wanted == 0 {
            anyhow::bail!("spec.defaults.tokens_wanted must be at least 1");
        }

        if self.spec.defaults.coop_size == 0 {
            anyhow::bail!("spec.defaults.coop_size must be at least 1");
        }

        if self.spec.cross_check.max_workers == 0 {
            anyhow::bail!("spec.cross_check.max_workers must be at least 1");
        }

        if self.spec.event_bus.capacity == 0 {
            anyhow::bail!("spec.event_bus.capacity must be at least 1");
        }

        if self.spec.lifecycle.sweep_interval.is_zero() {
            anyhow::bail!("spec.lifecycle.sweep_interval cannot be zero");
        }

        if self.spec.storage.backend == StorageBackend::File && self.spec.storage.path.is_none() {
            anyhow::bail!("spec.storage.path is required for the file backend");
        }

        Ok(())
    }
}
