//! Shared rig builders for duratest integration tests.
//!
//! Every helper builds on [`MockConnector`], so a whole experiment runs
//! against scripted instruments. Tests are expected to use
//! `#[tokio::test(start_paused = true)]`; settle delays and sampling pauses
//! then cost no wall-clock time and elapsed times are exact.

#![allow(dead_code)] // Not every test file uses every helper

use duratest::adapters::{MockConnector, MockTransport};
use duratest::config::{
    ChannelSettings, ExperimentConfig, PowerSupplyOptions, PumpOptions, TemperatureOptions,
};
use duratest::events::RecordingSink;
use duratest::experiment::{Experiment, ExperimentContext};
use duratest::instrument::{power_supply, temperature_controller, DeviceKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// 1 s interval, 3 s duration, 5..15 V window, 0.5 V max step, 50 C ceiling.
pub fn rig_config(output_path: PathBuf) -> ExperimentConfig {
    ExperimentConfig {
        sampling_interval_seconds: 1.0,
        total_duration_seconds: 3.0,
        output_path,
        power_supply: PowerSupplyOptions {
            port: "/dev/ttyUSB0".into(),
            current_setpoint: 2.0,
            min_voltage: 5.0,
            max_voltage: 15.0,
            max_voltage_delta: 0.5,
            reset_settle_seconds: 5.0,
        },
        pump: PumpOptions {
            port: "/dev/ttyUSB1".into(),
        },
        temperature: TemperatureOptions {
            port: "/dev/ttyUSB2".into(),
            temperature_setpoint: 30.0,
            max_temperature: 50.0,
        },
        serial: ChannelSettings::default(),
    }
}

/// A supply that acknowledges everything and reports `2.0` A and the given
/// voltages in turn, the last one repeating.
pub fn supply(voltages: &[&str]) -> MockTransport {
    MockTransport::new()
        .acknowledging("OK")
        .respond(power_supply::MEASURE_CURRENT, ["2.0"])
        .respond(power_supply::MEASURE_VOLTAGE, voltages.iter().copied())
}

pub fn pump() -> MockTransport {
    MockTransport::new().acknowledging("OK")
}

pub fn controller(temperatures: &[&str]) -> MockTransport {
    MockTransport::new().acknowledging("OK").respond(
        temperature_controller::MEASURE_TEMPERATURE,
        temperatures.iter().copied(),
    )
}

/// Steady `(2.0 A, 12.0 V, 30.0 C)` on every round.
pub fn steady_connector() -> MockConnector {
    MockConnector::new()
        .with_device(DeviceKind::PowerSupply, supply(&["12.0"]))
        .with_device(DeviceKind::Pump, pump())
        .with_device(DeviceKind::TemperatureController, controller(&["30.0"]))
}

/// Everything one experiment attempt needs, with its output in a temp dir.
pub struct TestRig {
    pub dir: TempDir,
    pub config: ExperimentConfig,
    pub connector: MockConnector,
    pub events: RecordingSink,
}

impl TestRig {
    pub fn new(connector: MockConnector) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = rig_config(dir.path().join("run/data.csv"));
        Self {
            dir,
            config,
            connector,
            events: RecordingSink::new(),
        }
    }

    pub fn steady() -> Self {
        Self::new(steady_connector())
    }

    pub fn output_path(&self) -> PathBuf {
        self.config.output_path.clone()
    }

    pub fn transport(&self, device: DeviceKind) -> MockTransport {
        self.connector.transport(device).unwrap()
    }

    pub fn experiment(&self) -> Experiment {
        let context = ExperimentContext::new(
            self.config.clone(),
            Arc::new(self.connector.clone()),
            Arc::new(self.events.clone()),
        )
        .unwrap();
        Experiment::with_csv_output(context)
    }
}

/// Assert that `actual` is within 10 ms of `expected`.
pub fn assert_duration_near(actual: Duration, expected: Duration, context: &str) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= Duration::from_millis(10),
        "{}: expected {:?}, got {:?}",
        context,
        expected,
        actual
    );
}
