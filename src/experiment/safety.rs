//! Safety monitor.
//!
//! A pure, ordered chain of checks over one `(current, voltage, temperature)`
//! triple and the history kept in [`SafetyState`]. The first failing check
//! wins:
//!
//! 1. voltage moved more than `max-dV` since the previous accepted round
//! 2. voltage magnitude above the configured maximum
//! 3. voltage magnitude below the configured minimum
//! 4. temperature above the configured maximum
//!
//! Only a triple that passes every check produces a new state.

use crate::config::ExperimentConfig;
use serde::Serialize;
use thiserror::Error;

/// Bounds the run must stay inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyLimits {
    pub min_voltage: f64,
    pub max_voltage: f64,
    pub max_voltage_delta: f64,
    pub max_temperature: f64,
}

impl SafetyLimits {
    pub fn from_config(config: &ExperimentConfig) -> Self {
        Self {
            min_voltage: config.power_supply.min_voltage,
            max_voltage: config.power_supply.max_voltage,
            max_voltage_delta: config.power_supply.max_voltage_delta,
            max_temperature: config.temperature.max_temperature,
        }
    }
}

/// History carried from one accepted round to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SafetyState {
    pub previous_voltage: Option<f64>,
    pub starting_voltage: Option<f64>,
}

/// A reading that breached a configured bound.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SafetyViolation {
    #[error("voltage change exceeded tolerance ({previous} V -> {voltage} V, max dV {tolerance} V)")]
    VoltageDelta {
        previous: f64,
        voltage: f64,
        tolerance: f64,
    },

    #[error("maximum voltage limit reached ({voltage} V > {limit} V)")]
    OverVoltage { voltage: f64, limit: f64 },

    #[error("minimum voltage limit reached ({voltage} V < {limit} V)")]
    UnderVoltage { voltage: f64, limit: f64 },

    #[error("maximum temperature reached ({temperature} C > {limit} C)")]
    OverTemperature { temperature: f64, limit: f64 },
}

impl SafetyViolation {
    /// Short reason without the measured values.
    pub fn reason(&self) -> &'static str {
        match self {
            SafetyViolation::VoltageDelta { .. } => "voltage change exceeded tolerance",
            SafetyViolation::OverVoltage { .. } => "maximum voltage limit reached",
            SafetyViolation::UnderVoltage { .. } => "minimum voltage limit reached",
            SafetyViolation::OverTemperature { .. } => "maximum temperature reached",
        }
    }
}

/// Check one triple. Returns the state to carry forward when it passes.
///
/// `current` is recorded but not bounded; the supply regulates it.
pub fn evaluate(
    limits: &SafetyLimits,
    state: &SafetyState,
    _current: f64,
    voltage: f64,
    temperature: f64,
) -> Result<SafetyState, SafetyViolation> {
    if let Some(previous) = state.previous_voltage {
        if (voltage - previous).abs() > limits.max_voltage_delta.abs() {
            return Err(SafetyViolation::VoltageDelta {
                previous,
                voltage,
                tolerance: limits.max_voltage_delta,
            });
        }
    }

    if voltage.abs() > limits.max_voltage.abs() {
        return Err(SafetyViolation::OverVoltage {
            voltage,
            limit: limits.max_voltage,
        });
    }

    if voltage.abs() < limits.min_voltage.abs() {
        return Err(SafetyViolation::UnderVoltage {
            voltage,
            limit: limits.min_voltage,
        });
    }

    if temperature > limits.max_temperature {
        return Err(SafetyViolation::OverTemperature {
            temperature,
            limit: limits.max_temperature,
        });
    }

    Ok(SafetyState {
        previous_voltage: Some(voltage),
        starting_voltage: state.starting_voltage.or(Some(voltage)),
    })
}
