//! Experiment configuration using Figment.
//!
//! The configuration is loaded once at process start and is read-only for the
//! rest of the run. Sources, later ones overriding earlier ones:
//!
//! 1. the experiment file (`.json` or `.toml`, chosen by extension)
//! 2. environment variables prefixed with `DURATEST_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore. The device sections are
//! addressed as `POWER_SUPPLY`, `PUMP` and `TEMPERATURE`:
//!
//! ```text
//! DURATEST_DURATION=7200
//! DURATEST_POWER_SUPPLY__MAXIMUM_VOLTAGE=14.5
//! DURATEST_SERIAL__BAUD_RATE=19200
//! ```
//!
//! # Example
//!
//! ```json
//! {
//!     "sampling-rate": 1.0,
//!     "duration": 3600,
//!     "save-path": "runs/cell-07/data.csv",
//!     "Power-Supply-options": {
//!         "com-port": "/dev/ttyUSB0",
//!         "current-setpoint": 2.0,
//!         "minimum-voltage": 5.0,
//!         "maximum-voltage": 15.0,
//!         "max-dV": 0.5
//!     },
//!     "Pump-Controller-options": { "com-port": "/dev/ttyUSB1" },
//!     "Temperature-Controller-options": {
//!         "com-port": "/dev/ttyUSB2",
//!         "temperature-setpoint": 25.0,
//!         "maximum-temperature": 50.0
//!     }
//! }
//! ```

use figment::{
    providers::{Env, Format, Json, Toml},
    value::{Uncased, UncasedStr},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    Load(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Top-level experiment configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ExperimentConfig {
    /// Seconds between the start of consecutive sampling rounds.
    #[serde(rename = "sampling-rate")]
    pub sampling_interval_seconds: f64,
    /// Total sampling time in seconds.
    #[serde(rename = "duration")]
    pub total_duration_seconds: f64,
    /// CSV file that receives one line per accepted round.
    #[serde(rename = "save-path")]
    pub output_path: PathBuf,
    #[serde(rename = "Power-Supply-options")]
    pub power_supply: PowerSupplyOptions,
    #[serde(rename = "Pump-Controller-options")]
    pub pump: PumpOptions,
    #[serde(rename = "Temperature-Controller-options")]
    pub temperature: TemperatureOptions,
    /// Serial line settings shared by all three instruments.
    #[serde(default)]
    pub serial: ChannelSettings,
}

/// Power supply setpoints and the voltage window the run must stay inside.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct PowerSupplyOptions {
    #[serde(rename = "com-port")]
    pub port: String,
    pub current_setpoint: f64,
    #[serde(rename = "minimum-voltage")]
    pub min_voltage: f64,
    #[serde(rename = "maximum-voltage")]
    pub max_voltage: f64,
    #[serde(rename = "max-dV")]
    pub max_voltage_delta: f64,
    /// Time the supply needs to come back after `*RST` during verification.
    #[serde(default = "default_reset_settle_seconds")]
    pub reset_settle_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PumpOptions {
    #[serde(rename = "com-port")]
    pub port: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct TemperatureOptions {
    #[serde(rename = "com-port")]
    pub port: String,
    pub temperature_setpoint: f64,
    #[serde(rename = "maximum-temperature")]
    pub max_temperature: f64,
}

/// Serial framing for the command/response channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ChannelSettings {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_read_budget_bytes")]
    pub read_budget_bytes: usize,
    #[serde(default = "default_terminator")]
    pub terminator: String,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            read_budget_bytes: default_read_budget_bytes(),
            terminator: default_terminator(),
        }
    }
}

impl ChannelSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn default_reset_settle_seconds() -> f64 {
    5.0
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_read_budget_bytes() -> usize {
    100
}

fn default_terminator() -> String {
    "\r".to_string()
}

/// Map a dot-split environment key onto the file's key names.
fn env_key(key: &UncasedStr) -> Uncased<'_> {
    let key = key.as_str().to_ascii_lowercase().replace('_', "-");
    let mapped = match key.split_once('.') {
        Some((section, field)) => {
            let section = match section {
                "power-supply" => "Power-Supply-options",
                "pump" => "Pump-Controller-options",
                "temperature" => "Temperature-Controller-options",
                other => other,
            };
            let field = if field == "max-dv" { "max-dV" } else { field };
            format!("{}.{}", section, field)
        }
        None => key.clone(),
    };
    Uncased::from(mapped)
}

impl ExperimentConfig {
    /// Load and validate the experiment file at `path`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Figment::new().merge(Toml::file(path)),
            _ => Figment::new().merge(Json::file(path)),
        };

        let config: Self = figment
            .merge(
                Env::prefixed("DURATEST_")
                    .split("__")
                    .map(env_key)
                    .lowercase(false),
            )
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Sampling interval as a [`Duration`]. Only meaningful after validation.
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sampling_interval_seconds)
    }

    /// Check ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let numbers = [
            ("sampling-rate", self.sampling_interval_seconds),
            ("duration", self.total_duration_seconds),
            ("current-setpoint", self.power_supply.current_setpoint),
            ("minimum-voltage", self.power_supply.min_voltage),
            ("maximum-voltage", self.power_supply.max_voltage),
            ("max-dV", self.power_supply.max_voltage_delta),
            ("reset-settle-seconds", self.power_supply.reset_settle_seconds),
            ("temperature-setpoint", self.temperature.temperature_setpoint),
            ("maximum-temperature", self.temperature.max_temperature),
        ];
        if let Some((name, value)) = numbers.iter().find(|(_, value)| !value.is_finite()) {
            return Err(ConfigError::Validation(format!(
                "{} must be a finite number, got {}",
                name, value
            )));
        }

        if self.sampling_interval_seconds <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "sampling-rate must be greater than zero, got {}",
                self.sampling_interval_seconds
            )));
        }

        if self.total_duration_seconds < 0.0 {
            return Err(ConfigError::Validation(format!(
                "duration must not be negative, got {}",
                self.total_duration_seconds
            )));
        }

        if self.power_supply.min_voltage > self.power_supply.max_voltage {
            return Err(ConfigError::Validation(format!(
                "minimum-voltage ({}) exceeds maximum-voltage ({})",
                self.power_supply.min_voltage, self.power_supply.max_voltage
            )));
        }

        if self.power_supply.max_voltage_delta < 0.0 {
            return Err(ConfigError::Validation(format!(
                "max-dV must not be negative, got {}",
                self.power_supply.max_voltage_delta
            )));
        }

        if self.power_supply.reset_settle_seconds < 0.0 {
            return Err(ConfigError::Validation(
                "reset-settle-seconds must not be negative".to_string(),
            ));
        }

        for (name, seconds) in [
            ("sampling-rate", self.sampling_interval_seconds),
            ("reset-settle-seconds", self.power_supply.reset_settle_seconds),
        ] {
            if Duration::try_from_secs_f64(seconds).is_err() {
                return Err(ConfigError::Validation(format!(
                    "{} is too large to wait for, got {}",
                    name, seconds
                )));
            }
        }

        for (device, port) in [
            ("Power-Supply-options", &self.power_supply.port),
            ("Pump-Controller-options", &self.pump.port),
            ("Temperature-Controller-options", &self.temperature.port),
        ] {
            if port.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{}.com-port must not be empty",
                    device
                )));
            }
        }

        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "save-path must not be empty".to_string(),
            ));
        }

        if self.serial.baud_rate == 0
            || self.serial.read_timeout_ms == 0
            || self.serial.read_budget_bytes == 0
        {
            return Err(ConfigError::Validation(
                "serial baud-rate, read-timeout-ms and read-budget-bytes must be non-zero"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
