//! vecswap.toml configuration parser.
//!
//! Every section is optional; missing sections and fields fall back to
//! the defaults below. `validate()` rejects values the control loops
//! cannot work with.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::IndexKind;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub server: ServerConfig,
    pub index: IndexConfig,
    pub metrics: MetricsConfig,
    pub trigger: TriggerConfig,
    pub swap: SwapConfig,
    pub build: BuildConfig,
    pub bootstrap: Option<BootstrapConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8470,
            data_dir: PathBuf::from("/var/lib/vecswap"),
        }
    }
}

/// Deployment-wide facts about the index being served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Vector dimensionality, fixed per deployment.
    pub dimensions: u32,
    /// Memory available to live index versions, in bytes.
    pub memory_budget_bytes: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimensions: 384,
            memory_budget_bytes: 8 * 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Length of one aggregation window.
    pub window_secs: u64,
    /// Closed windows kept per version in the state store.
    pub history_limit: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            history_limit: 60,
        }
    }
}

/// Migration trigger thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationTriggerConfig {
    pub vector_count_threshold: u64,
    pub p95_latency_threshold_ms: f64,
    pub memory_threshold_percent: f64,
    /// Share of end-to-end request time spent in the index search.
    pub search_latency_threshold_percent: f64,
    pub early_warning_vector_count: u64,
    /// p95 above this warns even when it is below 80% of the threshold.
    pub early_warning_latency_ms: f64,
    pub cooldown_secs: u64,
}

impl Default for MigrationTriggerConfig {
    fn default() -> Self {
        Self {
            vector_count_threshold: 500_000,
            p95_latency_threshold_ms: 200.0,
            memory_threshold_percent: 50.0,
            search_latency_threshold_percent: 20.0,
            early_warning_vector_count: 400_000,
            early_warning_latency_ms: 100.0,
            cooldown_secs: 3600,
        }
    }
}

impl MigrationTriggerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vector_count_threshold == 0 {
            return Err(invalid("trigger.vector_count_threshold must be positive"));
        }
        if !(self.p95_latency_threshold_ms > 0.0) {
            return Err(invalid("trigger.p95_latency_threshold_ms must be positive"));
        }
        if !(self.memory_threshold_percent > 0.0 && self.memory_threshold_percent <= 100.0) {
            return Err(invalid("trigger.memory_threshold_percent must be in (0, 100]"));
        }
        if !(self.search_latency_threshold_percent > 0.0
            && self.search_latency_threshold_percent <= 100.0)
        {
            return Err(invalid("trigger.search_latency_threshold_percent must be in (0, 100]"));
        }
        if self.early_warning_vector_count > self.vector_count_threshold {
            return Err(invalid(
                "trigger.early_warning_vector_count must not exceed vector_count_threshold",
            ));
        }
        if !(self.early_warning_latency_ms > 0.0
            && self.early_warning_latency_ms <= self.p95_latency_threshold_ms)
        {
            return Err(invalid(
                "trigger.early_warning_latency_ms must be positive and not exceed p95_latency_threshold_ms",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Seconds between evaluations.
    pub interval_secs: u64,
    /// Begin a swap automatically when a migration is recommended.
    pub auto_swap: bool,
    #[serde(flatten)]
    pub thresholds: MigrationTriggerConfig,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            auto_swap: false,
            thresholds: MigrationTriggerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    /// Seconds between controller ticks.
    pub tick_secs: u64,
    /// Traffic share added to the target per step (1-100).
    pub step_percent: u8,
    /// Minimum seconds between two advances.
    pub step_interval_secs: u64,
    /// Allowed p95 regression as a fraction of the baseline (0.10 = +10%).
    pub default_rollback_threshold: f64,
    /// Samples the target must serve after a shift before the step is judged.
    pub min_step_samples: u64,
    /// Seconds a migration may wait for a source baseline before rolling back.
    pub baseline_timeout_secs: u64,
    /// Queries issued by the isolated benchmark during validation.
    pub benchmark_queries: u32,
    /// Seconds a retired version is kept before removal.
    pub retire_grace_secs: u64,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            tick_secs: 5,
            step_percent: 10,
            step_interval_secs: 60,
            default_rollback_threshold: 0.10,
            min_step_samples: 50,
            baseline_timeout_secs: 900,
            benchmark_queries: 100,
            retire_grace_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
        }
    }
}

/// External build-job system and index probe endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// `host:port` of the build-job service. Builds are only recorded when unset.
    pub job_address: Option<String>,
    /// `host:port` of the index service used for isolated benchmarks.
    pub probe_address: Option<String>,
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
    pub circuit: CircuitConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            job_address: None,
            probe_address: None,
            request_timeout_ms: 5_000,
            retry: RetryConfig::default(),
            circuit: CircuitConfig::default(),
        }
    }
}

/// Initial active version registered on an empty registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub version_id: String,
    pub index_kind: IndexKind,
    pub vector_count: u64,
    #[serde(default)]
    pub memory_bytes: u64,
}

impl ManagerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ManagerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index.dimensions == 0 {
            return Err(invalid("index.dimensions must be positive"));
        }
        if self.index.memory_budget_bytes == 0 {
            return Err(invalid("index.memory_budget_bytes must be positive"));
        }
        if self.metrics.window_secs == 0 {
            return Err(invalid("metrics.window_secs must be positive"));
        }
        if self.trigger.interval_secs == 0 {
            return Err(invalid("trigger.interval_secs must be positive"));
        }
        self.trigger.thresholds.validate()?;
        if self.swap.tick_secs == 0 {
            return Err(invalid("swap.tick_secs must be positive"));
        }
        if self.swap.step_percent == 0 || self.swap.step_percent > 100 {
            return Err(invalid("swap.step_percent must be in 1..=100"));
        }
        if !(self.swap.default_rollback_threshold > 0.0) {
            return Err(invalid("swap.default_rollback_threshold must be positive"));
        }
        if self.build.retry.max_attempts == 0 {
            return Err(invalid("build.retry.max_attempts must be at least 1"));
        }
        if self.build.circuit.failure_threshold == 0 {
            return Err(invalid("build.circuit.failure_threshold must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}
