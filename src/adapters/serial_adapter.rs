//! RS-232 transport backed by the `serialport` crate.
//!
//! `serialport` is synchronous, so every write and read runs on Tokio's
//! blocking pool. The port is opened 8N1 with the configured baud rate and its
//! read timeout set to the channel's read timeout; a timed-out read is
//! reported as "nothing more to read" rather than as an error.

use super::{Connector, Transport};
use crate::config::ChannelSettings;
use crate::error::ChannelError;
use crate::instrument::DeviceKind;
use async_trait::async_trait;
use tracing::debug;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;

/// Serial transport for one instrument.
#[cfg(feature = "instrument_serial")]
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// The open port (behind Arc<Mutex> so blocking tasks can own a handle)
    port: Arc<Mutex<Box<dyn SerialPort>>>,
}

#[cfg(feature = "instrument_serial")]
impl SerialTransport {
    /// Open `port_name` with the framing in `settings`.
    pub fn open(port_name: &str, settings: &ChannelSettings) -> Result<Self, ChannelError> {
        let port = serialport::new(port_name, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(settings.read_timeout())
            .open()
            .map_err(|err| {
                ChannelError::Transport(format!(
                    "failed to open serial port '{}' at {} baud: {}",
                    port_name, settings.baud_rate, err
                ))
            })?;

        debug!(port = port_name, baud_rate = settings.baud_rate, "serial port opened");

        Ok(Self {
            port_name: port_name.to_string(),
            port: Arc::new(Mutex::new(port)),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[cfg(feature = "instrument_serial")]
#[async_trait]
impl Transport for SerialTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let port = Arc::clone(&self.port);
        let bytes = bytes.to_vec();

        tokio::task::spawn_blocking(move || -> Result<(), ChannelError> {
            use std::io::Write;

            let mut port = port.blocking_lock();
            port.write_all(&bytes)?;
            port.flush()?;
            Ok(())
        })
        .await
        .map_err(|err| ChannelError::Transport(format!("serial I/O task failed: {}", err)))?
    }

    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize, ChannelError> {
        let port = Arc::clone(&self.port);
        let len = buffer.len();

        let chunk = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ChannelError> {
            use std::io::Read;

            let mut port = port.blocking_lock();
            let mut chunk = vec![0u8; len];
            match port.read(&mut chunk) {
                Ok(n) => {
                    chunk.truncate(n);
                    Ok(chunk)
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(|err| ChannelError::Transport(format!("serial I/O task failed: {}", err)))??;

        buffer[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

/// Placeholder used when the crate is built without serial support.
#[cfg(not(feature = "instrument_serial"))]
pub struct SerialTransport;

/// Opens real serial ports for every instrument.
#[derive(Debug, Default, Clone)]
pub struct SerialConnector;

#[async_trait]
impl Connector for SerialConnector {
    async fn open(
        &self,
        device: DeviceKind,
        port: &str,
        settings: &ChannelSettings,
    ) -> Result<Box<dyn Transport>, ChannelError> {
        #[cfg(feature = "instrument_serial")]
        {
            debug!(device = %device, port, "opening serial transport");
            let transport = SerialTransport::open(port, settings)?;
            Ok(Box::new(transport))
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = (port, settings);
            debug!(device = %device, "serial support disabled");
            Err(ChannelError::Transport(
                "Serial support not enabled. Rebuild with --features instrument_serial".to_string(),
            ))
        }
    }
}
