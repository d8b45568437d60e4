//! Instruments of the durability rig.
//!
//! Every instrument sits behind its own [`DeviceChannel`] and is driven through
//! the [`Instrument`] capability trait. The set of instruments is closed: a
//! [`PowerSupply`], a [`Pump`] and a [`TemperatureController`].
//!
//! The capability contract follows the instruments' acknowledgement style:
//! verify, configure and reset succeed when the device answers at all, while
//! samples must answer with a finite number.

pub mod channel;
pub mod power_supply;
pub mod pump;
pub mod temperature_controller;

pub use channel::DeviceChannel;
pub use power_supply::PowerSupply;
pub use pump::Pump;
pub use temperature_controller::TemperatureController;

use crate::error::ChannelError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Identity query understood by all three instruments.
pub const IDENTIFY: &str = "*IDN?";

/// Which instrument of the rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    PowerSupply,
    Pump,
    TemperatureController,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::PowerSupply => "power-supply",
            DeviceKind::Pump => "pump",
            DeviceKind::TemperatureController => "temperature-controller",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physical quantity an instrument can be sampled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quantity {
    Current,
    Voltage,
    Temperature,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Quantity::Current => "current",
            Quantity::Voltage => "voltage",
            Quantity::Temperature => "temperature",
        })
    }
}

/// Steps of bringing one instrument online.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BringUpStep {
    Connect,
    Verify,
    VoltageLimits,
    CurrentSetpoint,
    PowerOn,
    TemperatureSetpoint,
}

impl fmt::Display for BringUpStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BringUpStep::Connect => "connect",
            BringUpStep::Verify => "verify",
            BringUpStep::VoltageLimits => "voltage-limits",
            BringUpStep::CurrentSetpoint => "current-setpoint",
            BringUpStep::PowerOn => "power-on",
            BringUpStep::TemperatureSetpoint => "temperature-setpoint",
        })
    }
}

/// Capability interface shared by every instrument of the rig.
#[async_trait]
pub trait Instrument: Send + Sync {
    /// The channel this instrument talks through.
    fn channel(&self) -> &DeviceChannel;

    fn kind(&self) -> DeviceKind {
        self.channel().device()
    }

    /// Confirm the instrument on the other end is alive and answering.
    async fn verify_connection(&self) -> bool;

    /// Apply the configured setpoints. On failure names the step that was not
    /// acknowledged.
    async fn configure(&self) -> Result<(), BringUpStep>;

    /// Read one value of `quantity`.
    async fn sample(&self, quantity: Quantity) -> Result<f64, ChannelError>;

    /// Return the instrument to a de-energized state.
    async fn reset(&self) -> bool;

    /// Close the underlying channel. Later commands fail with `NotConnected`.
    async fn close(&self) {
        self.channel().close().await;
    }
}

/// Interpret a response as a numeric reading.
pub fn parse_reading(response: &str) -> Result<f64, ChannelError> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(ChannelError::NoResponse);
    }

    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ChannelError::MalformedReading(trimmed.to_string())),
    }
}
