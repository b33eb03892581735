//! Configuration for keel-daemon

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconciler configuration
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Resource store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Container runtime configuration
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            reconciler: ReconcilerConfig::default(),
            store: StoreConfig::default(),
            runtime: RuntimeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7300".parse().unwrap(),
            enable_cors: true,
        }
    }
}

/// Reconciler configuration. Durations are flattened to integer fields so
/// they round-trip through files and `KEEL_`-prefixed environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Full resync interval in seconds
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Maximum instance starts per workload per pass
    #[serde(default = "default_parallel_start_limit")]
    pub parallel_start_limit: usize,

    /// Start attempts per generation before Degraded
    #[serde(default = "default_max_start_attempts")]
    pub max_start_attempts: u32,

    /// Retry backoff
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Grace period for instance stop in seconds
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            resync_interval_secs: default_resync_interval(),
            parallel_start_limit: default_parallel_start_limit(),
            max_start_attempts: default_max_start_attempts(),
            backoff: BackoffConfig::default(),
            stop_grace_secs: default_stop_grace(),
        }
    }
}

impl ReconcilerConfig {
    /// Convert to the supervisor's configuration.
    pub fn to_supervisor_config(&self) -> keel_reconciler::ReconcilerConfig {
        keel_reconciler::ReconcilerConfig {
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            parallel_start_limit: self.parallel_start_limit,
            max_start_attempts: self.max_start_attempts,
            backoff: keel_reconciler::BackoffConfig {
                initial_delay: Duration::from_millis(self.backoff.initial_ms),
                max_delay: Duration::from_millis(self.backoff.max_ms),
                multiplier: self.backoff.multiplier,
            },
            stop_grace: Duration::from_secs(self.stop_grace_secs),
        }
    }
}

/// Retry backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the second start attempt in milliseconds
    #[serde(default = "default_backoff_initial")]
    pub initial_ms: u64,

    /// Cap on the computed delay in milliseconds
    #[serde(default = "default_backoff_max")]
    pub max_ms: u64,

    /// Exponential growth factor
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial(),
            max_ms: default_backoff_max(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

/// Resource store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Seconds between garbage collection sweeps of unpinned generations
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            gc_interval_secs: default_gc_interval(),
        }
    }
}

/// Container runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Milliseconds a started instance stays Starting before Ready
    #[serde(default = "default_startup_delay")]
    pub startup_delay_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: default_startup_delay(),
        }
    }
}

impl RuntimeConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_resync_interval() -> u64 {
    30
}

fn default_parallel_start_limit() -> usize {
    2
}

fn default_max_start_attempts() -> u32 {
    5
}

fn default_stop_grace() -> u64 {
    10
}

fn default_backoff_initial() -> u64 {
    200
}

fn default_backoff_max() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_gc_interval() -> u64 {
    60
}

fn default_startup_delay() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Add environment variables with KEEL_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("KEEL")
                .separator("_")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.listen_addr.port(), 7300);
        assert!(config.server.enable_cors);
        assert_eq!(config.store.gc_interval_secs, 60);
        assert_eq!(config.runtime.startup_delay_ms, 500);
    }

    #[test]
    fn test_reconciler_defaults_match_supervisor_defaults() {
        let converted = ReconcilerConfig::default().to_supervisor_config();
        let native = keel_reconciler::ReconcilerConfig::default();
        assert_eq!(converted.resync_interval, native.resync_interval);
        assert_eq!(converted.parallel_start_limit, native.parallel_start_limit);
        assert_eq!(converted.max_start_attempts, native.max_start_attempts);
        assert_eq!(converted.stop_grace, native.stop_grace);
        assert_eq!(
            converted.backoff.initial_delay,
            native.backoff.initial_delay
        );
        assert_eq!(converted.backoff.max_delay, native.backoff.max_delay);
    }

    #[test]
    fn test_logging_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json);
    }

    #[test]
    fn test_env_overrides_defaults() {
        std::env::set_var("KEEL_LOGGING_LEVEL", "debug");
        let config = DaemonConfig::load(None).unwrap();
        std::env::remove_var("KEEL_LOGGING_LEVEL");
        assert_eq!(config.logging.level, "debug");
    }
}
