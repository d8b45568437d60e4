//! Error types for the durability test controller.
//!
//! Errors are layered the same way the rig is:
//!
//! - **`ChannelError`**: a single command/response exchange with one instrument
//!   went wrong. It is local to one device operation and is never retried.
//! - **`ExperimentError`**: terminal for the run. Every `ChannelError` that
//!   reaches the controller is wrapped into one of these, naming the device and
//!   the phase that raised it.
//! - **`TeardownError`**: a reset that did not acknowledge. These are collected
//!   into a [`TeardownReport`](crate::experiment::TeardownReport) and never
//!   replace the error that caused teardown.
//!
//! Configuration problems live in [`crate::config::ConfigError`] and are
//! reported before any device is contacted.

use crate::config::ConfigError;
use crate::experiment::safety::SafetyViolation;
use crate::instrument::{BringUpStep, DeviceKind, Quantity};
use thiserror::Error;

/// Convenience alias for results using the experiment error type.
pub type AppResult<T> = std::result::Result<T, ExperimentError>;

/// Failure of one command/response exchange on a device channel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("channel has no live connection")]
    NotConnected,

    #[error("device did not respond")]
    NoResponse,

    #[error("reading was not a number: {0:?}")]
    MalformedReading(String),

    #[error("device does not provide this reading")]
    UnsupportedQuantity,

    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::Transport(err.to_string())
    }
}

/// Terminal failure of an experiment attempt.
#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("{device} bring-up failed at step '{step}'{}", source_suffix(.source))]
    BringUpFailed {
        device: DeviceKind,
        step: BringUpStep,
        source: Option<ChannelError>,
    },

    #[error("incomplete device set")]
    IncompleteDeviceSet,

    #[error("safety violation: {0}")]
    SafetyViolation(#[from] SafetyViolation),

    #[error("{device} failed to provide {quantity}: {source}")]
    SampleFailed {
        device: DeviceKind,
        quantity: Quantity,
        source: ChannelError,
    },

    #[error("output store error: {0}")]
    Storage(String),

    #[error("experiment interrupted")]
    Interrupted,

    #[error("experiment task panicked: {0}")]
    Panicked(String),
}

fn source_suffix(source: &Option<ChannelError>) -> String {
    source
        .as_ref()
        .map_or(String::new(), |err| format!(": {err}"))
}

impl From<std::io::Error> for ExperimentError {
    fn from(err: std::io::Error) -> Self {
        ExperimentError::Storage(err.to_string())
    }
}

impl From<csv::Error> for ExperimentError {
    fn from(err: csv::Error) -> Self {
        ExperimentError::Storage(err.to_string())
    }
}

/// A device reset that was attempted during teardown and did not succeed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{device} reset failed: {reason}")]
pub struct TeardownError {
    pub device: DeviceKind,
    pub reason: String,
}
