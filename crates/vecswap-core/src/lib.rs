pub mod config;
pub mod types;

pub use config::{
    BootstrapConfig, BuildConfig, CircuitConfig, ConfigError, IndexConfig, ManagerConfig,
    MetricsConfig, MigrationTriggerConfig, RetryConfig, ServerConfig, SwapConfig, TriggerConfig,
};
pub use types::*;
