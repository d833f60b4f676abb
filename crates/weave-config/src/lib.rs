//! Weave Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.weave/config.toml`
//! - Local config: `.weave/config.toml` (next to the knowledge base)
//! - Programmatic overrides via `ConfigOverrides`
//!
//! Configuration is merged in order: global → local → overrides.

mod error;
mod loader;
mod logging;

pub use error::{ConfigError, FileOp};
pub use loader::ConfigLoader;
pub use logging::init_logging;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration for Weave.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WeaveConfig {
    /// Storage configuration
    pub storage: StorageConfig,

    /// Query/ranking cache configuration
    pub cache: CacheConfig,

    /// Equilibrium optimizer tunables
    pub optimizer: OptimizerSettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Storage configuration for the graph database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for Weave data (default: `.weave`)
    pub data_dir: PathBuf,

    /// SQLite database file name inside `data_dir`
    pub database_file: String,

    /// How long a writer waits on a locked database before giving up
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".weave"),
            database_file: "graph.db".to_string(),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Cache eviction policy selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the least recently accessed entry
    #[default]
    Lru,
    /// Evict the entry with the lowest access count
    Lfu,
    /// Evict the oldest entry by creation time
    Fifo,
    /// Evict the entry closest to expiry, falling back to LRU
    Ttl,
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lru => write!(f, "lru"),
            Self::Lfu => write!(f, "lfu"),
            Self::Fifo => write!(f, "fifo"),
            Self::Ttl => write!(f, "ttl"),
        }
    }
}

impl std::str::FromStr for EvictionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            "fifo" => Ok(Self::Fifo),
            "ttl" | "ttl-aware" | "ttl_aware" => Ok(Self::Ttl),
            _ => Err(ConfigError::invalid_value(
                "cache.policy",
                format!("unknown eviction policy '{}'. Valid values: lru, lfu, fifo, ttl", s),
            )),
        }
    }
}

/// Cache configuration shared by the query and ranking caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Eviction policy
    pub policy: EvictionPolicy,

    /// Maximum number of entries per cache
    pub max_entries: usize,

    /// Maximum estimated size per cache, in bytes
    pub max_size_bytes: usize,

    /// Default time-to-live in seconds (0 = entries never expire)
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: EvictionPolicy::default(),
            max_entries: 1_000,
            max_size_bytes: 64 * 1024 * 1024,
            default_ttl_secs: 300,
        }
    }
}

/// Equilibrium optimizer tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizerSettings {
    /// Share of the previous importance kept at each step
    pub learning_rate: f64,

    /// Upper bound on iterations per run
    pub max_iterations: usize,

    /// Retention threshold; nodes below it are prune candidates
    pub min_importance: f64,

    /// L1 change below which a run counts as converged
    pub convergence_threshold: f64,

    /// Probability of following an edge during propagation
    pub damping_factor: f64,

    /// Weight of normalized degree in node utility
    pub connectivity_weight: f64,

    /// Weight of content value in node utility
    pub content_weight: f64,

    /// Strength of the penalty for content redundant with neighbours
    pub redundancy_penalty: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            max_iterations: 100,
            min_importance: 0.01,
            convergence_threshold: 0.0001,
            damping_factor: 0.85,
            connectivity_weight: 0.3,
            content_weight: 0.7,
            redundancy_penalty: 0.3,
        }
    }
}

impl OptimizerSettings {
    /// Check every tunable is inside its meaningful range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit_interval = [
            ("optimizer.learning_rate", self.learning_rate),
            ("optimizer.min_importance", self.min_importance),
            ("optimizer.damping_factor", self.damping_factor),
            ("optimizer.redundancy_penalty", self.redundancy_penalty),
        ];
        for (key, value) in unit_interval {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid_value(
                    key,
                    format!("must be within [0, 1], got {}", value),
                ));
            }
        }
        // The previous iterate cannot be kept in full or nothing ever moves.
        if self.learning_rate >= 1.0 {
            return Err(ConfigError::invalid_value(
                "optimizer.learning_rate",
                "must be below 1",
            ));
        }
        for (key, value) in [
            ("optimizer.connectivity_weight", self.connectivity_weight),
            ("optimizer.content_weight", self.content_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid_value(
                    key,
                    format!("must be a non-negative number, got {}", value),
                ));
            }
        }
        if !(self.convergence_threshold.is_finite() && self.convergence_threshold > 0.0) {
            return Err(ConfigError::invalid_value(
                "optimizer.convergence_threshold",
                "must be a positive number",
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error, `weave_core=debug`)
    pub level: String,

    /// Log format (text, json)
    pub format: LogFormat,

    /// Log file path (optional, stderr otherwise)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON structured logging
    Json,
}

/// Overrides applied on top of file-based config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override Weave data directory
    pub data_dir: Option<PathBuf>,

    /// Override cache eviction policy
    pub cache_policy: Option<EvictionPolicy>,

    /// Override cache entry limit
    pub cache_max_entries: Option<usize>,

    /// Override optimizer iteration bound
    pub max_iterations: Option<usize>,

    /// Override log level
    pub log_level: Option<String>,
}

impl WeaveConfig {
    /// Apply overrides to this configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref dir) = overrides.data_dir {
            self.storage.data_dir = dir.clone();
        }

        if let Some(policy) = overrides.cache_policy {
            self.cache.policy = policy;
        }

        if let Some(max_entries) = overrides.cache_max_entries {
            self.cache.max_entries = max_entries;
        }

        if let Some(max_iterations) = overrides.max_iterations {
            self.optimizer.max_iterations = max_iterations;
        }

        if let Some(ref level) = overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.database_file.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "storage.database_file",
                "must not be empty",
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::invalid_value(
                "cache.max_entries",
                "must be at least 1",
            ));
        }
        if self.cache.max_size_bytes == 0 {
            return Err(ConfigError::invalid_value(
                "cache.max_size_bytes",
                "must be at least 1",
            ));
        }
        self.optimizer.validate()
    }

    /// Get the effective data directory for a knowledge base root.
    pub fn data_dir(&self, root: &Path) -> PathBuf {
        if self.storage.data_dir.is_absolute() {
            self.storage.data_dir.clone()
        } else {
            root.join(&self.storage.data_dir)
        }
    }

    /// Get the database file path for a knowledge base root.
    pub fn database_path(&self, root: &Path) -> PathBuf {
        self.data_dir(root).join(&self.storage.database_file)
    }
}
