//! Experiment orchestration.
//!
//! An [`Experiment`] owns one attempt at a durability run. It brings the rig
//! up, samples it until the configured duration has elapsed or a bound is
//! breached, and then always tears the rig down again.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──bring-up ok──▶ Ready ──▶ Sampling ──duration elapsed──▶ Finished
//!   │                     │           │
//!   └──────────── any failure, interrupt or panic ─────────────▶ Aborted
//! ```
//!
//! Teardown runs after every path out of [`Experiment::execute`], including a
//! panic inside the run. The error that ended the run is kept in the
//! [`RunReport`]; reset failures are reported next to it, never in its place.
//!
//! # Example
//!
//! ```rust,ignore
//! let context = ExperimentContext::new(config, Arc::new(SerialConnector), Arc::new(TracingSink))?;
//! let report = Experiment::with_csv_output(context).execute(Interrupt::never()).await;
//! assert_eq!(report.state, RunState::Finished);
//! ```

pub mod devices;
pub mod readiness;
pub mod safety;
pub mod sampling;
pub mod teardown;

pub use devices::{DeviceSet, Rig};
pub use safety::{SafetyLimits, SafetyState, SafetyViolation};
pub use sampling::SamplingProgress;
pub use teardown::{DeviceReset, TeardownReport};

use crate::adapters::Connector;
use crate::config::{ConfigError, ExperimentConfig};
use crate::data::{CsvWriter, StorageWriter};
use crate::error::ExperimentError;
use crate::events::{EventSink, ExperimentEvent};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Phase of an experiment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Idle,
    Ready,
    Sampling,
    Finished,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Finished | RunState::Aborted)
    }
}

/// Everything an attempt needs from the outside world.
#[derive(Clone)]
pub struct ExperimentContext {
    pub config: Arc<ExperimentConfig>,
    pub connector: Arc<dyn Connector>,
    pub events: Arc<dyn EventSink>,
}

impl ExperimentContext {
    /// Validates `config` before anything else can touch a device.
    pub fn new(
        config: ExperimentConfig,
        connector: Arc<dyn Connector>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            connector,
            events,
        })
    }
}

/// Request to stop a run early.
///
/// Only observed between device bring-ups and during the pause between
/// sampling rounds. A round or a command already in flight is never cut off.
#[derive(Clone)]
pub struct Interrupt {
    receiver: watch::Receiver<bool>,
}

/// Sending half of an [`Interrupt`].
#[derive(Clone)]
pub struct InterruptHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Interrupt {
    pub fn channel() -> (InterruptHandle, Interrupt) {
        let (sender, receiver) = watch::channel(false);
        (
            InterruptHandle {
                sender: Arc::new(sender),
            },
            Interrupt { receiver },
        )
    }

    /// An interrupt that is never requested.
    pub fn never() -> Interrupt {
        Self::channel().1
    }

    pub fn is_requested(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once an interrupt has been requested. Pends forever if the
    /// handle was dropped without requesting one.
    pub async fn requested(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl InterruptHandle {
    pub fn request(&self) {
        self.sender.send_replace(true);
    }
}

/// Outcome of one experiment attempt.
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    /// Rounds that passed the safety checks and were written.
    pub rounds: u64,
    /// Voltage of the first accepted round.
    pub starting_voltage: Option<f64>,
    pub result: Result<(), ExperimentError>,
    pub teardown: TeardownReport,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Finished && self.result.is_ok()
    }
}

/// One attempt at a durability run. Consumed by [`Experiment::execute`], so
/// instruments are never reused across attempts.
pub struct Experiment {
    context: ExperimentContext,
    writer: Box<dyn StorageWriter>,
    devices: DeviceSet,
    state: RunState,
    progress: SamplingProgress,
}

impl Experiment {
    pub fn new(context: ExperimentContext, writer: Box<dyn StorageWriter>) -> Self {
        let progress = SamplingProgress::new(context.config.total_duration_seconds);
        Self {
            context,
            writer,
            devices: DeviceSet::new(),
            state: RunState::Idle,
            progress,
        }
    }

    /// Record accepted rounds in the configured `save-path`.
    pub fn with_csv_output(context: ExperimentContext) -> Self {
        let writer = CsvWriter::new(context.config.output_path.clone());
        Self::new(context, Box::new(writer))
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run the attempt to completion and tear the rig down.
    pub async fn execute(mut self, mut interrupt: Interrupt) -> RunReport {
        info!(
            duration = self.context.config.total_duration_seconds,
            interval = self.context.config.sampling_interval_seconds,
            "experiment started"
        );

        let result = AssertUnwindSafe(self.run(&mut interrupt))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ExperimentError::Panicked(panic_message(&*panic))));

        if let Err(err) = &result {
            error!(error = %err, "experiment aborted");
            transition(&mut self.state, RunState::Aborted, &*self.context.events);
            self.context.events.emit(ExperimentEvent::RunFailed {
                reason: err.to_string(),
            });
        }

        let teardown = teardown::teardown(&mut self.devices, &*self.context.events).await;

        RunReport {
            state: self.state,
            rounds: self.progress.rounds,
            starting_voltage: self.progress.safety.starting_voltage,
            result,
            teardown,
        }
    }

    async fn run(&mut self, interrupt: &mut Interrupt) -> Result<(), ExperimentError> {
        let events = &*self.context.events;

        readiness::bring_up(&self.context, &mut self.devices, self.writer.as_mut(), interrupt)
            .await?;

        let rig = self
            .devices
            .complete()
            .ok_or(ExperimentError::IncompleteDeviceSet)?;
        transition(&mut self.state, RunState::Ready, events);

        transition(&mut self.state, RunState::Sampling, events);
        let sampler = sampling::SamplingLoop::new(rig, &self.context.config, events);
        sampler
            .run(&mut self.progress, self.writer.as_mut(), interrupt)
            .await?;

        transition(&mut self.state, RunState::Finished, events);
        info!(rounds = self.progress.rounds, "experiment finished");
        Ok(())
    }
}

impl Drop for Experiment {
    fn drop(&mut self) {
        let held = self.devices.present();
        if !held.is_empty() {
            error!(devices = ?held, "experiment dropped before teardown, devices left energized");
        }
    }
}

fn transition(state: &mut RunState, to: RunState, events: &dyn EventSink) {
    if *state == to {
        return;
    }
    events.emit(ExperimentEvent::StateChanged { from: *state, to });
    *state = to;
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockConnector;
    use crate::config::tests::sample_config;
    use crate::events::RecordingSink;

    #[test]
    fn test_context_rejects_invalid_config() {
        let mut config = sample_config();
        config.power_supply.min_voltage = 20.0;
        let result = ExperimentContext::new(
            config,
            Arc::new(MockConnector::new()),
            Arc::new(RecordingSink::new()),
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_transition_emits_once() {
        let events = RecordingSink::new();
        let mut state = RunState::Idle;
        transition(&mut state, RunState::Ready, &events);
        transition(&mut state, RunState::Ready, &events);

        assert_eq!(state, RunState::Ready);
        assert_eq!(
            events.events(),
            vec![ExperimentEvent::StateChanged {
                from: RunState::Idle,
                to: RunState::Ready
            }]
        );
    }

    #[tokio::test]
    async fn test_interrupt_resolves_after_request() {
        let (handle, mut interrupt) = Interrupt::channel();
        assert!(!interrupt.is_requested());
        handle.request();
        interrupt.requested().await;
        assert!(interrupt.is_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_interrupt_does_not_resolve() {
        let mut interrupt = Interrupt::never();
        let waited =
            tokio::time::timeout(std::time::Duration::from_secs(60), interrupt.requested()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_panic_message_downcasts() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
    }
}
