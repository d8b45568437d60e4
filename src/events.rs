//! Structured experiment events.
//!
//! The controller reports every phase transition as an [`ExperimentEvent`]
//! through the [`EventSink`] held by its context. Formatting is left to the
//! sink: [`TracingSink`] turns events into `tracing` records with structured
//! fields, [`RecordingSink`] keeps them for inspection.

use crate::data::Reading;
use crate::experiment::RunState;
use crate::instrument::{BringUpStep, DeviceKind};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ExperimentEvent {
    StateChanged {
        from: RunState,
        to: RunState,
    },
    BringUpStep {
        device: DeviceKind,
        step: BringUpStep,
        ok: bool,
    },
    DeviceReady {
        device: DeviceKind,
    },
    RoundAccepted {
        round: u64,
        reading: Reading,
        remaining_seconds: f64,
    },
    SafetyViolation {
        round: u64,
        reason: String,
    },
    RunFailed {
        reason: String,
    },
    ResetSkipped {
        device: DeviceKind,
    },
    ResetOutcome {
        device: DeviceKind,
        ok: bool,
    },
    TeardownComplete {
        attempted: usize,
        failed: usize,
    },
}

/// Receiver of experiment events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ExperimentEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ExperimentEvent) {
        match event {
            ExperimentEvent::StateChanged { from, to } => {
                info!(from = ?from, to = ?to, "state changed");
            }
            ExperimentEvent::BringUpStep { device, step, ok: true } => {
                info!(device = %device, step = %step, "bring-up step passed");
            }
            ExperimentEvent::BringUpStep { device, step, ok: false } => {
                error!(device = %device, step = %step, "bring-up step failed");
            }
            ExperimentEvent::DeviceReady { device } => {
                info!(device = %device, "device ready");
            }
            ExperimentEvent::RoundAccepted {
                round,
                reading,
                remaining_seconds,
            } => {
                info!(
                    round,
                    current = reading.current,
                    voltage = reading.voltage,
                    temperature = reading.temperature,
                    remaining_seconds,
                    "round accepted"
                );
            }
            ExperimentEvent::SafetyViolation { round, reason } => {
                error!(round, reason = %reason, "safety violation");
            }
            ExperimentEvent::RunFailed { reason } => {
                error!(reason = %reason, "run failed");
            }
            ExperimentEvent::ResetSkipped { device } => {
                info!(device = %device, "no handle, reset skipped");
            }
            ExperimentEvent::ResetOutcome { device, ok: true } => {
                info!(device = %device, "device reset");
            }
            ExperimentEvent::ResetOutcome { device, ok: false } => {
                warn!(device = %device, "device did not acknowledge reset");
            }
            ExperimentEvent::TeardownComplete { attempted, failed } => {
                if failed == 0 {
                    info!(attempted, "teardown complete");
                } else {
                    warn!(attempted, failed, "teardown complete with failures");
                }
            }
        }
    }
}

/// Keeps every event in memory. Clones share the same log.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ExperimentEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExperimentEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ExperimentEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
