//! Configuration management module
//!
//! Loads and validates environment-based configuration. The threshold
//! table has its own file-based loader in `profiles`.

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::history::DEFAULT_CAPACITY;

/// Configuration errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid value for environment variable {0}")]
    ParseError(&'static str),

    #[error("Out of range value for {0}: {1}")]
    OutOfRange(&'static str, String),
}

/// Server configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Timing and policy knobs of a per-user monitor
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSettings {
    /// Silence after which the feed counts as stale
    pub staleness_timeout_ms: u64,
    /// Period of the display refresh / persistence tick
    pub refresh_interval_ms: u64,
    /// Per-tick multiplier applied to displayed values while stale
    pub decay_factor: f64,
    pub countdown_secs: u32,
    /// Number of mismatching samples averaged before prompting
    pub evidence_window: usize,
    pub history_capacity: usize,
    /// Keep warning-free samples in the history, not only alerts
    pub record_normal: bool,
}

impl MonitorSettings {
    pub fn staleness_timeout(&self) -> Duration {
        Duration::from_millis(self.staleness_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            staleness_timeout_ms: 3000,
            refresh_interval_ms: 1000,
            decay_factor: 0.5,
            countdown_secs: 10,
            evidence_window: 5,
            history_capacity: DEFAULT_CAPACITY,
            record_normal: true,
        }
    }
}

/// History persistence settings
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Directory for per-user JSON documents; in-memory when unset
    pub data_dir: Option<String>,
}

/// Simulated wearable settings
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorSettings {
    pub enabled: bool,
    pub user_id: String,
    /// Interval in milliseconds between simulated messages
    pub interval_ms: u64,
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub monitor: MonitorSettings,
    pub storage: StorageSettings,
    pub simulator: SimulatorSettings,
    /// Optional threshold override file
    pub thresholds_file: Option<String>,
}

fn var_or<T: FromStr>(name: &'static str, default: T) -> Result<T, SettingsError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| SettingsError::ParseError(name)),
        Err(_) => Ok(default),
    }
}

impl Settings {
    /// Load settings from environment variables
    pub fn from_env() -> Result<Self, SettingsError> {
        let defaults = MonitorSettings::default();

        let monitor = MonitorSettings {
            staleness_timeout_ms: var_or("STALENESS_TIMEOUT_MS", defaults.staleness_timeout_ms)?,
            refresh_interval_ms: var_or("REFRESH_INTERVAL_MS", defaults.refresh_interval_ms)?,
            decay_factor: var_or("STALE_DECAY_FACTOR", defaults.decay_factor)?,
            countdown_secs: var_or("CONFIRMATION_COUNTDOWN_SECS", defaults.countdown_secs)?,
            evidence_window: var_or("EVIDENCE_WINDOW", defaults.evidence_window)?,
            history_capacity: var_or("HISTORY_CAPACITY", defaults.history_capacity)?,
            record_normal: var_or("HISTORY_RECORD_NORMAL", defaults.record_normal)?,
        };

        if !(0.0..1.0).contains(&monitor.decay_factor) {
            return Err(SettingsError::OutOfRange(
                "STALE_DECAY_FACTOR",
                monitor.decay_factor.to_string(),
            ));
        }
        if monitor.countdown_secs == 0 {
            return Err(SettingsError::OutOfRange("CONFIRMATION_COUNTDOWN_SECS", "0".into()));
        }
        if monitor.evidence_window == 0 {
            return Err(SettingsError::OutOfRange("EVIDENCE_WINDOW", "0".into()));
        }
        if monitor.history_capacity == 0 {
            return Err(SettingsError::OutOfRange("HISTORY_CAPACITY", "0".into()));
        }

        Ok(Self {
            server: ServerSettings {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
                port: var_or("SERVER_PORT", 8080)?,
            },
            monitor,
            storage: StorageSettings {
                data_dir: env::var("HISTORY_DATA_DIR").ok().filter(|d| !d.is_empty()),
            },
            simulator: SimulatorSettings {
                enabled: var_or("SIMULATOR_ENABLED", false)?,
                user_id: env::var("SIMULATOR_USER_ID").unwrap_or_else(|_| "demo-patient".into()),
                interval_ms: var_or("SIMULATOR_INTERVAL_MS", 1000)?,
            },
            thresholds_file: env::var("THRESHOLDS_FILE").ok().filter(|f| !f.is_empty()),
        })
    }
}
