//! Byte-level transports for instrument channels.
//!
//! This module contains implementations of the [`Transport`] trait, the raw
//! I/O underneath a [`DeviceChannel`](crate::instrument::DeviceChannel), and
//! of [`Connector`], which opens one transport per instrument.

pub mod mock;
pub mod serial_adapter;

pub use mock::{MockConnector, MockTransport};
pub use serial_adapter::{SerialConnector, SerialTransport};

use crate::config::ChannelSettings;
use crate::error::ChannelError;
use crate::instrument::DeviceKind;
use async_trait::async_trait;

/// Raw byte transport to one instrument.
#[async_trait]
pub trait Transport: Send {
    /// Write all of `bytes`.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError>;

    /// Read whatever is available into `buffer`.
    ///
    /// Returns `Ok(0)` once the instrument has stopped sending, e.g. when the
    /// port's own read timeout expired with nothing new on the line.
    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize, ChannelError>;
}

/// Opens transports for the instruments of the rig.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        device: DeviceKind,
        port: &str,
        settings: &ChannelSettings,
    ) -> Result<Box<dyn Transport>, ChannelError>;
}
