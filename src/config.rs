use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SimguardConfig {
    pub timeouts: TimeoutConfig,
    pub shutdown: ShutdownConfig,
    pub correlation: CorrelationConfig,
    pub resilience: ResilienceConfig,
}

/// Per-operation deadlines, in milliseconds.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_boot_timeout_ms")]
    pub boot_ms: u64,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_ms: u64,

    #[serde(default = "default_install_timeout_ms")]
    pub install_ms: u64,

    #[serde(default = "default_launch_timeout_ms")]
    pub launch_ms: u64,

    #[serde(default = "default_spawn_timeout_ms")]
    pub spawn_ms: u64,

    #[serde(default = "default_media_timeout_ms")]
    pub media_ms: u64,
}

impl TimeoutConfig {
    pub fn boot(&self) -> Duration {
        Duration::from_millis(self.boot_ms)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_millis(self.shutdown_ms)
    }

    pub fn install(&self) -> Duration {
        Duration::from_millis(self.install_ms)
    }

    pub fn launch(&self) -> Duration {
        Duration::from_millis(self.launch_ms)
    }

    pub fn spawn(&self) -> Duration {
        Duration::from_millis(self.spawn_ms)
    }

    pub fn media(&self) -> Duration {
        Duration::from_millis(self.media_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ShutdownConfig {
    /// Total shutdown attempts before giving up, wedge recoveries included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Deadline for the forced supervisor termination during wedge recovery.
    #[serde(default = "default_kill_timeout_ms")]
    pub kill_timeout_ms: u64,
}

impl ShutdownConfig {
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorrelationConfig {
    /// Process lookups before surfacing an inconsistent-state error.
    #[serde(default = "default_correlation_retries")]
    pub max_retries: u32,

    /// Fixed delay between lookups.
    #[serde(default = "default_correlation_backoff_ms")]
    pub backoff_ms: u64,
}

impl CorrelationConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ResilienceConfig {
    /// When disabled, guarded calls run without a deadline.
    #[serde(default = "default_timeout_resilience")]
    pub timeout_resilience_enabled: bool,
}

impl SimguardConfig {
    /// Load configuration from default sources (file + environment variables).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("simguard.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("timeouts.boot_ms", default_boot_timeout_ms() as i64)?
            .set_default("timeouts.shutdown_ms", default_shutdown_timeout_ms() as i64)?
            .set_default("timeouts.install_ms", default_install_timeout_ms() as i64)?
            .set_default("timeouts.launch_ms", default_launch_timeout_ms() as i64)?
            .set_default("timeouts.spawn_ms", default_spawn_timeout_ms() as i64)?
            .set_default("timeouts.media_ms", default_media_timeout_ms() as i64)?
            .set_default("shutdown.max_attempts", default_max_attempts() as i64)?
            .set_default("shutdown.kill_timeout_ms", default_kill_timeout_ms() as i64)?
            .set_default(
                "correlation.max_retries",
                default_correlation_retries() as i64,
            )?
            .set_default(
                "correlation.backoff_ms",
                default_correlation_backoff_ms() as i64,
            )?
            .set_default(
                "resilience.timeout_resilience_enabled",
                default_timeout_resilience(),
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with SIMGUARD_ prefix
            .add_source(Environment::with_prefix("SIMGUARD").separator("_"))
            .build()?;

        let config: SimguardConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values. Invalid configuration is the only
    /// failure that may abort startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("timeouts.boot_ms", self.timeouts.boot_ms),
            ("timeouts.shutdown_ms", self.timeouts.shutdown_ms),
            ("timeouts.install_ms", self.timeouts.install_ms),
            ("timeouts.launch_ms", self.timeouts.launch_ms),
            ("timeouts.spawn_ms", self.timeouts.spawn_ms),
            ("timeouts.media_ms", self.timeouts.media_ms),
            ("shutdown.kill_timeout_ms", self.shutdown.kill_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Message(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.shutdown.max_attempts == 0 {
            return Err(ConfigError::Message(
                "shutdown.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.correlation.max_retries == 0 {
            return Err(ConfigError::Message(
                "correlation.max_retries must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for SimguardConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig {
                boot_ms: default_boot_timeout_ms(),
                shutdown_ms: default_shutdown_timeout_ms(),
                install_ms: default_install_timeout_ms(),
                launch_ms: default_launch_timeout_ms(),
                spawn_ms: default_spawn_timeout_ms(),
                media_ms: default_media_timeout_ms(),
            },
            shutdown: ShutdownConfig {
                max_attempts: default_max_attempts(),
                kill_timeout_ms: default_kill_timeout_ms(),
            },
            correlation: CorrelationConfig {
                max_retries: default_correlation_retries(),
                backoff_ms: default_correlation_backoff_ms(),
            },
            resilience: ResilienceConfig {
                timeout_resilience_enabled: default_timeout_resilience(),
            },
        }
    }
}

// Default value functions
fn default_boot_timeout_ms() -> u64 {
    30_000
}
fn default_shutdown_timeout_ms() -> u64 {
    30_000
}
fn default_install_timeout_ms() -> u64 {
    60_000
}
fn default_launch_timeout_ms() -> u64 {
    30_000
}
fn default_spawn_timeout_ms() -> u64 {
    30_000
}
fn default_media_timeout_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    3
}
fn default_kill_timeout_ms() -> u64 {
    5_000
}

fn default_correlation_retries() -> u32 {
    5
}
fn default_correlation_backoff_ms() -> u64 {
    100
}

fn default_timeout_resilience() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SimguardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.shutdown.max_attempts, 3);
        assert_eq!(config.correlation.max_retries, 5);
        assert_eq!(config.correlation.backoff(), Duration::from_millis(100));
        assert!(config.resilience.timeout_resilience_enabled);
    }

    #[test]
    fn test_config_validation_rejects_zero_values() {
        let mut config = SimguardConfig::default();
        config.timeouts.shutdown_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SimguardConfig::default();
        config.shutdown.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = SimguardConfig::default();
        config.correlation.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = SimguardConfig::load_from_file("does-not-exist.toml").unwrap();
        assert_eq!(config.timeouts.shutdown(), Duration::from_millis(30_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_accessors() {
        let config = SimguardConfig::default();
        assert_eq!(config.timeouts.install(), Duration::from_millis(60_000));
        assert_eq!(config.shutdown.kill_timeout(), Duration::from_millis(5_000));
    }
}
