//! Fleet configuration parameters
//!
//! Tunables for polling, discovery and sensor lifecycle. Values can be
//! overridden from storage at boot; [`FleetConfig::validate`] rejects
//! anything outside the ranges the workers are designed for.

use core::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{StorageError, StoragePort};
use crate::error::ConfigError;

const STORAGE_NAMESPACE: &str = "fleet";
const STORAGE_KEY: &str = "tunables";

/// Core fleet configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    // --- Polling ---
    /// Interval between polling-loop batches (milliseconds)
    pub polling_interval_ms: u32,
    /// Consecutive read failures before a sensor is logged as degraded
    pub max_consecutive_errors: u32,

    // --- Discovery ---
    /// Default bound on a discovery scan (milliseconds)
    pub discovery_timeout_ms: u32,
    /// Pause between protocol scan polls within one discovery (milliseconds)
    pub discovery_poll_interval_ms: u32,

    // --- Sensors ---
    /// Settling time after a local sensor's lifecycle start (milliseconds)
    pub sensor_warmup_ms: u32,

    // --- Workers ---
    /// Stack size for the polling and discovery workers (KiB)
    pub worker_stack_kb: u32,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            // Polling
            polling_interval_ms: 5000,
            max_consecutive_errors: 3,

            // Discovery
            discovery_timeout_ms: 30_000,
            discovery_poll_interval_ms: 250,

            // Sensors
            sensor_warmup_ms: 1000,

            // Workers
            worker_stack_kb: 8,
        }
    }
}

impl FleetConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.polling_interval_ms))
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.discovery_timeout_ms))
    }

    pub fn discovery_poll_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.discovery_poll_interval_ms))
    }

    /// Range-check every tunable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(10..=3_600_000).contains(&self.polling_interval_ms) {
            return Err(ConfigError::OutOfRange("polling_interval_ms must be 10–3600000"));
        }
        if self.max_consecutive_errors == 0 {
            return Err(ConfigError::OutOfRange("max_consecutive_errors must be >= 1"));
        }
        if !(100..=600_000).contains(&self.discovery_timeout_ms) {
            return Err(ConfigError::OutOfRange("discovery_timeout_ms must be 100–600000"));
        }
        if !(10..=10_000).contains(&self.discovery_poll_interval_ms) {
            return Err(ConfigError::OutOfRange("discovery_poll_interval_ms must be 10–10000"));
        }
        if self.discovery_poll_interval_ms > self.discovery_timeout_ms {
            return Err(ConfigError::OutOfRange(
                "discovery_poll_interval_ms must not exceed discovery_timeout_ms",
            ));
        }
        if self.sensor_warmup_ms > 10_000 {
            return Err(ConfigError::OutOfRange("sensor_warmup_ms must be 0–10000"));
        }
        if !(4..=64).contains(&self.worker_stack_kb) {
            return Err(ConfigError::OutOfRange("worker_stack_kb must be 4–64"));
        }
        Ok(())
    }

    /// Stored tunables, or defaults when nothing valid is stored.
    pub fn load(store: &dyn StoragePort) -> Self {
        let mut buf = [0u8; 64];
        let n = match store.read(STORAGE_NAMESPACE, STORAGE_KEY, &mut buf) {
            Ok(n) => n,
            Err(StorageError::NotFound) => {
                info!("Config: no stored tunables, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!("Config: tunables unreadable ({}), using defaults", e);
                return Self::default();
            }
        };
        match postcard::from_bytes::<Self>(&buf[..n]) {
            Ok(cfg) if cfg.validate().is_ok() => {
                info!("Config: loaded tunables ({} bytes)", n);
                cfg
            }
            _ => {
                warn!("Config: stored tunables invalid, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, store: &mut dyn StoragePort) -> Result<(), ConfigError> {
        self.validate()?;
        let bytes = postcard::to_allocvec(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        store.write(STORAGE_NAMESPACE, STORAGE_KEY, &bytes)?;
        info!("Config: tunables saved");
        Ok(())
    }
}
