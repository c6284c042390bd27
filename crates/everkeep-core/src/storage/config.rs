//! TOML-based engine configuration.
//!
//! Tunables for the monitoring engine:
//! - Sweep cadence and per-user time limits for the liveness scanner
//! - Bounded retry count for optimistic profile writes
//! - Delivery retry/backoff policy and fan-out parallelism
//!
//! Configuration is stored at `~/.config/everkeep/config.toml`.

use serde::{Deserialize, Serialize};

use super::data_dir;

/// Liveness scanner configuration.
///
/// `interval_secs` must stay at or below the shortest supported cadence
/// (one day) or a missed period could be skipped entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Whole-sweep deadline; profiles not reached are picked up next cycle.
    #[serde(default = "default_sweep_deadline_secs")]
    pub deadline_secs: u64,
    /// Per-user advance timeout; an advance that overruns is abandoned
    /// and retried on the next sweep.
    #[serde(default = "default_per_user_timeout_ms")]
    pub per_user_timeout_ms: u64,
}

/// Notification delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Attempts per nominee before the attempt is marked exhausted.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Random jitter added to each backoff delay.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Upper bound on concurrent sends per dispatch.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/everkeep/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Read-modify-write retries before a profile write reports a conflict.
    #[serde(default = "default_write_retry_limit")]
    pub write_retry_limit: u32,
}

// Default functions
fn default_sweep_interval_secs() -> u64 {
    3600
}
fn default_sweep_deadline_secs() -> u64 {
    300
}
fn default_per_user_timeout_ms() -> u64 {
    2000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_cap_ms() -> u64 {
    60_000
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_max_parallel() -> usize {
    4
}
fn default_write_retry_limit() -> u32 {
    5
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
            deadline_secs: default_sweep_deadline_secs(),
            per_user_timeout_ms: default_per_user_timeout_ms(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            jitter_ms: default_jitter_ms(),
            max_parallel: default_max_parallel(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep: SweepConfig::default(),
            delivery: DeliveryConfig::default(),
            write_retry_limit: default_write_retry_limit(),
        }
    }
}

impl EngineConfig {
    fn path() -> Result<std::path::PathBuf, Box<dyn std::error::Error>> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load the configuration, writing the defaults on first run.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let cfg: EngineConfig = toml::from_str(&content)?;
                Ok(cfg)
            }
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(Self::path()?, content)?;
        Ok(())
    }

    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.sweep.interval_secs, 3600);
        assert_eq!(parsed.delivery.max_attempts, 5);
        assert_eq!(parsed.write_retry_limit, 5);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed: EngineConfig = toml::from_str("[sweep]\ninterval_secs = 60\n").unwrap();
        assert_eq!(parsed.sweep.interval_secs, 60);
        assert_eq!(parsed.sweep.deadline_secs, 300);
        assert_eq!(parsed.delivery.max_parallel, 4);
    }
}
