//! Timed sampling loop.
//!
//! Each round reads supply current, supply voltage and controller temperature
//! concurrently and waits for all three. The triple then goes through the
//! safety monitor, and only a passing triple is written and counted. Rounds
//! never overlap and are never skipped to catch up; a slow round simply makes
//! the run longer.

use super::devices::Rig;
use super::safety::{self, SafetyLimits, SafetyState};
use super::Interrupt;
use crate::config::ExperimentConfig;
use crate::data::{Reading, StorageWriter};
use crate::error::ExperimentError;
use crate::events::{EventSink, ExperimentEvent};
use crate::instrument::{Instrument, Quantity};
use std::time::Duration;
use tracing::debug;

/// How far the loop has come. Kept outside the loop so the controller can
/// still report it after a failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingProgress {
    pub rounds: u64,
    pub remaining_seconds: f64,
    pub safety: SafetyState,
}

impl SamplingProgress {
    pub fn new(total_duration_seconds: f64) -> Self {
        Self {
            rounds: 0,
            remaining_seconds: total_duration_seconds,
            safety: SafetyState::default(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.remaining_seconds <= 0.0
    }
}

pub struct SamplingLoop<'a> {
    rig: Rig<'a>,
    limits: SafetyLimits,
    interval_seconds: f64,
    interval: Duration,
    events: &'a dyn EventSink,
}

impl<'a> SamplingLoop<'a> {
    pub fn new(rig: Rig<'a>, config: &ExperimentConfig, events: &'a dyn EventSink) -> Self {
        Self {
            rig,
            limits: SafetyLimits::from_config(config),
            interval_seconds: config.sampling_interval_seconds,
            interval: config.sampling_interval(),
            events,
        }
    }

    /// Sample until the remaining duration runs out.
    ///
    /// There is no pause after the last round. An interrupt is only noticed
    /// during the pause between rounds.
    pub async fn run(
        &self,
        progress: &mut SamplingProgress,
        writer: &mut dyn StorageWriter,
        interrupt: &mut Interrupt,
    ) -> Result<(), ExperimentError> {
        while !progress.is_done() {
            let round = progress.rounds + 1;
            let reading = self.sample_round().await?;

            progress.safety = match safety::evaluate(
                &self.limits,
                &progress.safety,
                reading.current,
                reading.voltage,
                reading.temperature,
            ) {
                Ok(next) => next,
                Err(violation) => {
                    self.events.emit(ExperimentEvent::SafetyViolation {
                        round,
                        reason: violation.reason().to_string(),
                    });
                    return Err(violation.into());
                }
            };

            writer.append(&reading).await?;
            progress.rounds = round;
            progress.remaining_seconds -= self.interval_seconds;
            self.events.emit(ExperimentEvent::RoundAccepted {
                round,
                reading,
                remaining_seconds: progress.remaining_seconds.max(0.0),
            });

            if progress.is_done() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = interrupt.requested() => {
                    debug!(round, "interrupt observed between rounds");
                    return Err(ExperimentError::Interrupted);
                }
            }
        }
        Ok(())
    }

    /// One concurrent fan-out over the rig. Fails if any read fails.
    async fn sample_round(&self) -> Result<Reading, ExperimentError> {
        let (current, voltage, temperature) = tokio::join!(
            read(self.rig.power_supply, Quantity::Current),
            read(self.rig.power_supply, Quantity::Voltage),
            read(self.rig.temperature, Quantity::Temperature),
        );
        Ok(Reading::new(current?, voltage?, temperature?))
    }
}

async fn read(instrument: &dyn Instrument, quantity: Quantity) -> Result<f64, ExperimentError> {
    instrument
        .sample(quantity)
        .await
        .map_err(|source| ExperimentError::SampleFailed {
            device: instrument.kind(),
            quantity,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use crate::config::tests::sample_config;
    use crate::data::Reading;
    use crate::error::ChannelError;
    use crate::events::RecordingSink;
    use crate::experiment::devices::DeviceSet;
    use crate::instrument::{
        power_supply, temperature_controller, DeviceChannel, DeviceKind, PowerSupply, Pump,
        TemperatureController,
    };
    use async_trait::async_trait;
    use tokio::time::Instant;

    #[derive(Default)]
    struct MemoryWriter {
        rows: Vec<Reading>,
    }

    #[async_trait]
    impl StorageWriter for MemoryWriter {
        async fn write_header(&mut self) -> Result<(), ExperimentError> {
            Ok(())
        }

        async fn append(&mut self, reading: &Reading) -> Result<(), ExperimentError> {
            self.rows.push(*reading);
            Ok(())
        }
    }

    fn devices(supply: MockTransport, controller: MockTransport) -> DeviceSet {
        let config = sample_config();
        let settings = config.serial.clone();
        DeviceSet {
            pump: Some(Pump::new(DeviceChannel::new(
                DeviceKind::Pump,
                Box::new(MockTransport::new().acknowledging("OK")),
                settings.clone(),
            ))),
            temperature: Some(TemperatureController::new(
                DeviceChannel::new(
                    DeviceKind::TemperatureController,
                    Box::new(controller),
                    settings.clone(),
                ),
                config.temperature.clone(),
            )),
            power_supply: Some(PowerSupply::new(
                DeviceChannel::new(DeviceKind::PowerSupply, Box::new(supply), settings),
                config.power_supply.clone(),
            )),
        }
    }

    fn supply(voltages: &[&str]) -> MockTransport {
        MockTransport::new()
            .respond(power_supply::MEASURE_CURRENT, ["2.0"])
            .respond(power_supply::MEASURE_VOLTAGE, voltages.iter().copied())
    }

    fn controller(temperature: &str) -> MockTransport {
        MockTransport::new().respond(temperature_controller::MEASURE_TEMPERATURE, [temperature])
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_whole_rounds_without_trailing_pause() {
        let config = sample_config();
        let devices = devices(supply(&["12.0"]), controller("30.0"));
        let events = RecordingSink::new();
        let sampler = SamplingLoop::new(devices.complete().unwrap(), &config, &events);
        let mut progress = SamplingProgress::new(config.total_duration_seconds);
        let mut writer = MemoryWriter::default();

        let start = Instant::now();
        sampler
            .run(&mut progress, &mut writer, &mut Interrupt::never())
            .await
            .unwrap();

        assert_eq!(progress.rounds, 3);
        assert_eq!(writer.rows.len(), 3);
        assert_eq!(writer.rows[0].voltage, 12.0);
        assert_eq!(progress.safety.starting_voltage, Some(12.0));
        assert!(start.elapsed() < Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fractional_duration_rounds_up() {
        let mut config = sample_config();
        config.total_duration_seconds = 2.5;
        let devices = devices(supply(&["12.0"]), controller("30.0"));
        let events = RecordingSink::new();
        let sampler = SamplingLoop::new(devices.complete().unwrap(), &config, &events);
        let mut progress = SamplingProgress::new(config.total_duration_seconds);

        sampler
            .run(&mut progress, &mut MemoryWriter::default(), &mut Interrupt::never())
            .await
            .unwrap();

        assert_eq!(progress.rounds, 3);
        assert!(progress.remaining_seconds <= 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_duration_samples_nothing() {
        let mut config = sample_config();
        config.total_duration_seconds = 0.0;
        let supply_mock = supply(&["12.0"]);
        let devices = devices(supply_mock.clone(), controller("30.0"));
        let events = RecordingSink::new();
        let sampler = SamplingLoop::new(devices.complete().unwrap(), &config, &events);
        let mut progress = SamplingProgress::new(0.0);

        sampler
            .run(&mut progress, &mut MemoryWriter::default(), &mut Interrupt::never())
            .await
            .unwrap();

        assert_eq!(progress.rounds, 0);
        assert!(supply_mock.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_violation_keeps_last_accepted_state() {
        let config = sample_config();
        let devices = devices(supply(&["12.0", "13.2"]), controller("30.0"));
        let events = RecordingSink::new();
        let sampler = SamplingLoop::new(devices.complete().unwrap(), &config, &events);
        let mut progress = SamplingProgress::new(config.total_duration_seconds);
        let mut writer = MemoryWriter::default();

        let err = sampler
            .run(&mut progress, &mut writer, &mut Interrupt::never())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExperimentError::SafetyViolation(safety::SafetyViolation::VoltageDelta { .. })
        ));
        assert_eq!(progress.rounds, 1);
        assert_eq!(writer.rows.len(), 1);
        assert_eq!(progress.safety.previous_voltage, Some(12.0));
        assert!(events.events().contains(&ExperimentEvent::SafetyViolation {
            round: 2,
            reason: "voltage change exceeded tolerance".to_string(),
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_fails_round() {
        let config = sample_config();
        let devices = devices(supply(&["12.0"]), controller("n/a"));
        let events = RecordingSink::new();
        let sampler = SamplingLoop::new(devices.complete().unwrap(), &config, &events);
        let mut progress = SamplingProgress::new(config.total_duration_seconds);
        let mut writer = MemoryWriter::default();

        let err = sampler
            .run(&mut progress, &mut writer, &mut Interrupt::never())
            .await
            .unwrap_err();

        match err {
            ExperimentError::SampleFailed {
                device,
                quantity,
                source,
            } => {
                assert_eq!(device, DeviceKind::TemperatureController);
                assert_eq!(quantity, Quantity::Temperature);
                assert_eq!(source, ChannelError::MalformedReading("n/a".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(writer.rows.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_between_rounds() {
        let config = sample_config();
        let devices = devices(supply(&["12.0"]), controller("30.0"));
        let events = RecordingSink::new();
        let sampler = SamplingLoop::new(devices.complete().unwrap(), &config, &events);
        let mut progress = SamplingProgress::new(config.total_duration_seconds);
        let (handle, mut interrupt) = Interrupt::channel();
        handle.request();

        let err = sampler
            .run(&mut progress, &mut MemoryWriter::default(), &mut interrupt)
            .await
            .unwrap_err();

        assert!(matches!(err, ExperimentError::Interrupted));
        assert_eq!(progress.rounds, 1);
    }
}
