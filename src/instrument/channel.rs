//! Serialized command/response channel to one instrument.
//!
//! The channel owns its transport behind a Tokio mutex, so at most one command
//! is in flight per instrument. Concurrent callers queue on the lock in
//! arrival order; the lock is released when the exchange returns, on every
//! path. The three instruments each have their own channel and never contend
//! with one another.
//!
//! # Cancel Safety
//! `send_command` is not cancel safe: dropping it after the write but before
//! the read leaves the reply on the line, where the next command would read
//! it as its own.

use crate::adapters::{Connector, Transport};
use crate::config::ChannelSettings;
use crate::error::ChannelError;
use crate::instrument::{parse_reading, DeviceKind};
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

pub struct DeviceChannel {
    device: DeviceKind,
    settings: ChannelSettings,
    transport: Mutex<Option<Box<dyn Transport>>>,
}

impl DeviceChannel {
    /// Wrap an already open transport.
    pub fn new(device: DeviceKind, transport: Box<dyn Transport>, settings: ChannelSettings) -> Self {
        Self {
            device,
            settings,
            transport: Mutex::new(Some(transport)),
        }
    }

    /// Open a transport for `device` on `port` and wrap it.
    pub async fn connect(
        connector: &dyn Connector,
        device: DeviceKind,
        port: &str,
        settings: &ChannelSettings,
    ) -> Result<Self, ChannelError> {
        let transport = connector.open(device, port, settings).await?;
        debug!(device = %device, port, "channel connected");
        Ok(Self::new(device, transport, settings.clone()))
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_some()
    }

    /// Drop the transport. Waits for an in-flight command to finish first.
    pub async fn close(&self) {
        if self.transport.lock().await.take().is_some() {
            debug!(device = %self.device, "channel closed");
        }
    }

    /// Send `command` and return the reply with trailing line endings removed.
    ///
    /// The reply is whatever arrived before the read budget filled up, the
    /// instrument went quiet, or the read timeout elapsed. An empty string
    /// means the instrument did not answer.
    pub async fn send_command(&self, command: &str) -> Result<String, ChannelError> {
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(ChannelError::NotConnected)?;

        let framed = format!("{}{}", command, self.settings.terminator);
        transport.write(framed.as_bytes()).await?;
        debug!(device = %self.device, command, "wrote command");

        let budget = self.settings.read_budget_bytes;
        let deadline = Instant::now() + self.settings.read_timeout();
        let mut response = Vec::with_capacity(budget);
        let mut chunk = vec![0u8; budget];

        while response.len() < budget {
            let want = budget - response.len();
            match timeout_at(deadline, transport.read(&mut chunk[..want])).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => response.extend_from_slice(&chunk[..n]),
                Ok(Err(err)) => return Err(err),
            }
        }

        let response = String::from_utf8_lossy(&response)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        debug!(device = %self.device, command, response = %response, "received response");
        Ok(response)
    }

    /// True when `command` got any reply at all.
    pub async fn acknowledges(&self, command: &str) -> bool {
        match self.send_command(command).await {
            Ok(response) if !response.is_empty() => true,
            Ok(_) => {
                warn!(device = %self.device, command, "no acknowledgement");
                false
            }
            Err(err) => {
                warn!(device = %self.device, command, error = %err, "command failed");
                false
            }
        }
    }

    /// Send `command` and parse the reply as a number.
    pub async fn query_number(&self, command: &str) -> Result<f64, ChannelError> {
        let response = self.send_command(command).await?;
        parse_reading(&response).map_err(|err| {
            warn!(device = %self.device, command, error = %err, "bad reading");
            err
        })
    }
}
