//! Coolant pump controller. Has no readings of its own; it only has to be
//! running while the supply is energized.

use super::{BringUpStep, DeviceChannel, Instrument, Quantity, IDENTIFY};
use crate::error::ChannelError;
use async_trait::async_trait;
use tracing::{error, info};

pub const TURN_ON: &str = "on";
pub const TURN_OFF: &str = "off";

pub struct Pump {
    channel: DeviceChannel,
}

impl Pump {
    pub fn new(channel: DeviceChannel) -> Self {
        Self { channel }
    }

    pub async fn turn_on(&self) -> bool {
        self.channel.acknowledges(TURN_ON).await
    }

    pub async fn turn_off(&self) -> bool {
        self.channel.acknowledges(TURN_OFF).await
    }
}

#[async_trait]
impl Instrument for Pump {
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
            Ok(_) => {
                error!(device = %self.kind(), "no reply to identity query");
                false
            }
            Err(err) => {
                error!(device = %self.kind(), error = %err, "identity query failed");
                false
            }
        }
    }

    async fn configure(&self) -> Result<(), BringUpStep> {
        if self.turn_on().await {
            Ok(())
        } else {
            Err(BringUpStep::PowerOn)
        }
    }

    async fn sample(&self, _quantity: Quantity) -> Result<f64, ChannelError> {
        Err(ChannelError::UnsupportedQuantity)
    }

    async fn reset(&self) -> bool {
        self.turn_off().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use crate::config::ChannelSettings;
    use crate::instrument::DeviceKind;

    fn pump(mock: &MockTransport) -> Pump {
        Pump::new(DeviceChannel::new(
            DeviceKind::Pump,
            Box::new(mock.clone()),
            ChannelSettings::default(),
        ))
    }

    #[tokio::test]
    async fn test_bring_up_turns_pump_on() {
        let mock = MockTransport::new().acknowledging("OK");
        let pump = pump(&mock);

        assert!(pump.verify_connection().await);
        assert_eq!(pump.configure().await, Ok(()));
        assert_eq!(mock.sent(), vec![IDENTIFY, TURN_ON]);
    }

    #[tokio::test]
    async fn test_unanswered_power_on_fails_configure() {
        let mock = MockTransport::new().acknowledging("OK").silent(TURN_ON);
        assert_eq!(pump(&mock).configure().await, Err(BringUpStep::PowerOn));
    }

    #[tokio::test]
    async fn test_reset_turns_pump_off() {
        let mock = MockTransport::new().acknowledging("OK");
        assert!(pump(&mock).reset().await);
        assert_eq!(mock.sent(), vec![TURN_OFF]);
    }
}
