//! Programmable DC power supply.
//!
//! The supply drives current through the cell under test. It is the last
//! instrument brought up and its output must be switched off on every exit.

use super::{BringUpStep, DeviceChannel, Instrument, Quantity, IDENTIFY};
use crate::config::PowerSupplyOptions;
use crate::error::ChannelError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, info, warn};

pub const RESET: &str = "*RST";
pub const OUTPUT_ON: &str = "outp on";
pub const MEASURE_CURRENT: &str = "meas:curr?";
pub const MEASURE_VOLTAGE: &str = "meas:volt?";

pub struct PowerSupply {
    channel: DeviceChannel,
    options: PowerSupplyOptions,
}

impl PowerSupply {
    pub fn new(channel: DeviceChannel, options: PowerSupplyOptions) -> Self {
        Self { channel, options }
    }

    /// Program the over/under voltage protection window.
    pub async fn set_voltage_limits(&self, min_voltage: f64, max_voltage: f64) -> bool {
        self.channel
            .acknowledges(&format!("volt:lim {},{}", min_voltage, max_voltage))
            .await
    }

    /// Set the output current in amperes.
    pub async fn set_current(&self, current: f64) -> bool {
        self.channel.acknowledges(&format!("curr {}", current)).await
    }

    pub async fn current(&self) -> Result<f64, ChannelError> {
        self.channel.query_number(MEASURE_CURRENT).await
    }

    pub async fn voltage(&self) -> Result<f64, ChannelError> {
        self.channel.query_number(MEASURE_VOLTAGE).await
    }
}

#[async_trait]
impl Instrument for PowerSupply {
    fn channel(&self) -> &DeviceChannel {
        &self.channel
    }

    /// Reset the supply, give it time to reboot, then ask for its identity.
    /// The output is enabled only once the supply has identified itself.
    async fn verify_connection(&self) -> bool {
        if !self.channel.is_connected().await {
            error!(device = %self.kind(), "serial connection is not open");
            return false;
        }

        // The reset reply is irrelevant; the supply reboots either way.
        let _ = self.channel.send_command(RESET).await;
        tokio::time::sleep(Duration::from_secs_f64(self.options.reset_settle_seconds)).await;

        let name = match self.channel.send_command(IDENTIFY).await {
            Ok(name) if !name.is_empty() => name,
            _ => return false,
        };
        info!(device = %self.kind(), identity = %name, "identified");

        if let Err(err) = self.channel.send_command(OUTPUT_ON).await {
            warn!(device = %self.kind(), error = %err, "output enable failed");
        }
        true
    }

    async fn configure(&self) -> Result<(), BringUpStep> {
        if !self
            .set_voltage_limits(self.options.min_voltage, self.options.max_voltage)
            .await
        {
            error!(device = %self.kind(), "voltage limits were not acknowledged");
            return Err(BringUpStep::VoltageLimits);
        }

        if !self.set_current(self.options.current_setpoint).await {
            error!(device = %self.kind(), "current setpoint was not acknowledged");
            return Err(BringUpStep::CurrentSetpoint);
        }

        Ok(())
    }

    async fn sample(&self, quantity: Quantity) -> Result<f64, ChannelError> {
        match quantity {
            Quantity::Current => self.current().await,
            Quantity::Voltage => self.voltage().await,
            Quantity::Temperature => Err(ChannelError::UnsupportedQuantity),
        }
    }

    async fn reset(&self) -> bool {
        self.channel.acknowledges(RESET).await
    }
}
