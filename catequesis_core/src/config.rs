//! Configuration file support for the catechesis engine.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/catequesis/config.toml`.
//! Every value has a documented default, so a missing file or a partial
//! file is always valid.

use crate::store::RetryPolicy;
use crate::{CatalogConfig, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub enrollment: EnrollmentConfig,

    #[serde(default)]
    pub reports: ReportsConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Group capacity and age policy defaults
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrollmentConfig {
    #[serde(default = "default_capacity")]
    pub default_capacity: u32,

    #[serde(default = "default_min_age")]
    pub min_age: u32,

    #[serde(default = "default_max_age")]
    pub max_age: u32,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            default_capacity: default_capacity(),
            min_age: default_min_age(),
            max_age: default_max_age(),
        }
    }
}

/// Report bounds and cache policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportsConfig {
    #[serde(default = "default_max_export_rows")]
    pub max_export_rows: usize,

    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            max_export_rows: default_max_export_rows(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

/// Retry policy at the persistence boundary
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("catequesis")
}

fn default_capacity() -> u32 {
    30
}

fn default_min_age() -> u32 {
    6
}

fn default_max_age() -> u32 {
    18
}

fn default_max_export_rows() -> usize {
    10_000
}

fn default_cache_ttl_seconds() -> u64 {
    3600
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    50
}

impl DataConfig {
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join("catalog.toml")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("registry.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("catequesis").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Reject values no policy can work with
    pub fn validate(&self) -> Result<()> {
        if self.enrollment.default_capacity == 0 {
            return Err(Error::Config("enrollment.default_capacity must be positive".into()));
        }
        if self.enrollment.min_age > self.enrollment.max_age {
            return Err(Error::Config(format!(
                "enrollment.min_age {} > enrollment.max_age {}",
                self.enrollment.min_age, self.enrollment.max_age
            )));
        }
        if self.reports.max_export_rows == 0 {
            return Err(Error::Config("reports.max_export_rows must be positive".into()));
        }
        if self.persistence.max_attempts == 0 {
            return Err(Error::Config("persistence.max_attempts must be positive".into()));
        }
        Ok(())
    }

    /// Defaults handed to the catalog store at initialization
    pub fn catalog_config(&self) -> CatalogConfig {
        CatalogConfig {
            default_capacity: self.enrollment.default_capacity,
            min_age: self.enrollment.min_age,
            max_age: self.enrollment.max_age,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.persistence.max_attempts,
            backoff: Duration::from_millis(self.persistence.backoff_ms),
        }
    }
}
