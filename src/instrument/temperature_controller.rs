//! Temperature controller holding the cell at its setpoint. It is the
//! authoritative source of the temperature reading.

use super::{BringUpStep, DeviceChannel, Instrument, Quantity, IDENTIFY};
use crate::config::TemperatureOptions;
use crate::error::ChannelError;
use async_trait::async_trait;
use tracing::{error, info};

pub const RESET: &str = "*RST";
pub const MEASURE_TEMPERATURE: &str = "get temperature";

pub struct TemperatureController {
    channel: DeviceChannel,
    options: TemperatureOptions,
}

impl TemperatureController {
    pub fn new(channel: DeviceChannel, options: TemperatureOptions) -> Self {
        Self { channel, options }
    }

    /// Set the target temperature in degrees Celsius.
    pub async fn set_temperature(&self, temperature: f64) -> bool {
        self.channel
            .acknowledges(&format!("set {}", temperature))
            .await
    }

    pub async fn temperature(&self) -> Result<f64, ChannelError> {
        self.channel.query_number(MEASURE_TEMPERATURE).await
    }
}

#[async_trait]
impl Instrument for TemperatureController {
    fn channel(&self) -> &DeviceChannel {
        &self.channel
    }

    async fn verify_connection(&self) -> bool {
        if !self.channel.is_connected().await {
            error!(device = %self.kind(), "serial connection is not open");
            return false;
        }

        match self.channel.send_command(IDENTIFY).await {
            Ok(name) if !name.is_empty() => {
                info!(device = %self.kind(), identity = %name, "identified");
                true
            }
            _ => {
                error!(device = %self.kind(), "no reply to identity query");
                false
            }
        }
    }

    async fn configure(&self) -> Result<(), BringUpStep> {
        if self.set_temperature(self.options.temperature_setpoint).await {
            Ok(())
        } else {
            error!(device = %self.kind(), "temperature setpoint was not acknowledged");
            Err(BringUpStep::TemperatureSetpoint)
        }
    }

    async fn sample(&self, quantity: Quantity) -> Result<f64, ChannelError> {
        match quantity {
            Quantity::Temperature => self.temperature().await,
            _ => Err(ChannelError::UnsupportedQuantity),
        }
    }

    async fn reset(&self) -> bool {
        self.channel.acknowledges(RESET).await
    }
}
