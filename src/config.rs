//! Gateway configuration.
//!
//! Loaded once from a JSON file at startup, then overridden from the
//! environment. The resulting [`Config`] is passed by reference to everything
//! that needs it and is never mutated afterwards; startup offset calibration
//! produces a new value via [`Config::with_offsets`].

use crate::error::{GatewayError, Result};
use crate::telemetry::{Phase, TelemetryRecord, ENERGY_COUNTERS};
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use std::{env, fs};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Baseline values subtracted from the eight cumulative energy counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offsets(BTreeMap<String, f64>);

impl Default for Offsets {
    fn default() -> Self {
        Self::from_pairs(ENERGY_COUNTERS.iter().map(|counter| (*counter, 0.0)))
    }
}

impl Offsets {
    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, f64)>) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Uses the counters of a raw reading as the new zero point
    pub fn from_record(record: &TelemetryRecord) -> Result<Self> {
        let mut offsets = BTreeMap::new();
        for counter in ENERGY_COUNTERS {
            offsets.insert(counter.to_string(), record.value(counter)?);
        }
        Ok(Self(offsets))
    }

    pub fn get(&self, counter: &str) -> Option<f64> {
        self.0.get(counter).copied()
    }

    pub fn negated(&self) -> Self {
        Self(self.0.iter().map(|(k, v)| (k.clone(), -v)).collect())
    }

    /// Offsets are all-or-nothing: exactly the eight counter keys.
    pub fn validate(&self) -> Result<()> {
        if let Some(missing) = ENERGY_COUNTERS.iter().find(|c| !self.0.contains_key(**c)) {
            return Err(GatewayError::config(format!(
                "offset `{missing}` is not configured"
            )));
        }
        if let Some(unknown) = self.0.keys().find(|k| !ENERGY_COUNTERS.contains(&k.as_str())) {
            return Err(GatewayError::config(format!(
                "unknown offset `{unknown}`, expected exactly {}",
                ENERGY_COUNTERS.join(", ")
            )));
        }
        if let Some((counter, _)) = self.0.iter().find(|(_, v)| !v.is_finite()) {
            return Err(GatewayError::config(format!(
                "offset `{counter}` is not a finite number"
            )));
        }
        Ok(())
    }
}

/// Static identification data written into the SunSpec Common model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub manufacturer: String,
    pub model: String,
    pub options: String,
    pub version: String,
    pub serial_number: String,
    pub device_address: u16,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            manufacturer: "Fronius".to_string(),
            model: "Smart Meter 63A".to_string(),
            options: String::new(),
            version: String::new(),
            serial_number: "00000002".to_string(),
            device_address: 240,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `Shelly.GetStatus` RPC endpoint
    pub shelly_url: String,

    #[serde(alias = "shelly_offsets")]
    pub offsets: Offsets,

    /// Phases without a connected inverter, e.g. `["b"]`
    pub nullify_channel: Vec<String>,

    /// Address the Modbus/TCP server listens on
    pub modbus_bind: String,

    pub poll_interval_ms: u64,

    /// Sleep after a failed cycle, longer than the poll interval
    pub error_backoff_ms: u64,

    pub request_timeout_ms: u64,

    /// Capture offsets from the first reading instead of using `offsets`
    pub calibrate_offsets: bool,

    pub identity: IdentityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shelly_url: "http://shelly/rpc/Shelly.GetStatus".to_string(),
            offsets: Offsets::default(),
            nullify_channel: Vec::new(),
            modbus_bind: "0.0.0.0:502".to_string(),
            poll_interval_ms: 1000,
            error_backoff_ms: 5000,
            request_timeout_ms: 2000,
            calibrate_offsets: false,
            identity: IdentityConfig::default(),
        }
    }
}

impl Config {
    /// Loads `path`, falling back to defaults if it does not exist, then
    /// applies environment overrides and validates the result.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let contents = fs::read_to_string(path)?;
            Self::from_json(&contents)?
        } else {
            warn!("No {} found, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Resolves the config path from `CONFIG_FILE` and loads it
    pub fn from_env() -> Result<Self> {
        let path = env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load(path)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("SHELLY_URL") {
            if !url.is_empty() {
                self.shelly_url = url;
            }
        }
        if let Ok(bind) = env::var("MODBUS_BIND") {
            if !bind.is_empty() {
                self.modbus_bind = bind;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.offsets.validate()?;
        self.nullified_phases()?;
        if self.shelly_url.is_empty() {
            return Err(GatewayError::config("shelly_url must not be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(GatewayError::config("poll_interval_ms must be positive"));
        }
        if self.error_backoff_ms <= self.poll_interval_ms {
            return Err(GatewayError::config(
                "error_backoff_ms must be longer than poll_interval_ms",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(GatewayError::config("request_timeout_ms must be positive"));
        }
        Ok(())
    }

    pub fn nullified_phases(&self) -> Result<Vec<Phase>> {
        crate::normalizer::parse_channels(&self.nullify_channel)
    }

    /// Returns a copy of this configuration using `offsets`
    pub fn with_offsets(&self, offsets: Offsets) -> Self {
        Self {
            offsets,
            ..self.clone()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
