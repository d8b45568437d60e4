//! Scripted transports for tests and dry runs.
//!
//! A [`MockTransport`] answers each written command from a script. Responses
//! for a command are consumed in order and the last one repeats, so
//! `respond("meas:volt?", ["12.0", "13.2"])` yields `12.0` once and `13.2`
//! from then on. Commands without a script get the default response, which is
//! empty ("no response") unless set with [`MockTransport::acknowledging`].
//!
//! Clones share state, so a test can keep a handle to inspect the commands a
//! device received after the experiment has consumed the transport.

use super::{Connector, Transport};
use crate::config::{ChannelSettings, ExperimentConfig};
use crate::error::ChannelError;
use crate::instrument::{power_supply, temperature_controller, DeviceKind};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct MockState {
    script: HashMap<String, VecDeque<String>>,
    default_response: String,
    failing: HashSet<String>,
    sent: Vec<String>,
    pending: VecDeque<u8>,
}

/// Transport that replies from a per-command script.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    latency: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply `response` to every command that has no script of its own.
    pub fn acknowledging(self, response: &str) -> Self {
        self.lock().default_response = response.to_string();
        self
    }

    /// Script the replies to `command`; the last reply repeats.
    pub fn respond<I, S>(self, command: &str, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = responses.into_iter().map(Into::into).collect();
        self.lock().script.insert(command.to_string(), queue);
        self
    }

    /// Make `command` go unanswered.
    pub fn silent(self, command: &str) -> Self {
        self.respond(command, [""])
    }

    /// Make writing `command` fail as if the line had dropped.
    pub fn failing(self, command: &str) -> Self {
        self.lock().failing.insert(command.to_string());
        self
    }

    /// Delay the first chunk of every reply, simulating line latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every command written so far, terminator stripped.
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    /// How many times `command` was written.
    pub fn count(&self, command: &str) -> usize {
        self.lock().sent.iter().filter(|sent| *sent == command).count()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let command = String::from_utf8_lossy(bytes)
            .trim_end_matches(['\r', '\n'])
            .to_string();

        let mut guard = self.lock();
        let state = &mut *guard;
        if state.failing.contains(&command) {
            state.sent.push(command);
            return Err(ChannelError::Transport("write failed".to_string()));
        }
        let response = match state.script.get_mut(&command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => state.default_response.clone(),
        };

        state.sent.push(command);
        state.pending.clear();
        if !response.is_empty() {
            state.pending.extend(response.as_bytes());
            state.pending.extend(b"\r\n");
        }
        Ok(())
    }

    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize, ChannelError> {
        let has_pending = !self.lock().pending.is_empty();
        if has_pending {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
        }

        let mut state = self.lock();
        let n = buffer.len().min(state.pending.len());
        for (slot, byte) in buffer.iter_mut().zip(state.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// Hands out scripted transports and records which devices were opened.
#[derive(Clone, Default)]
pub struct MockConnector {
    transports: HashMap<DeviceKind, MockTransport>,
    unreachable: HashSet<DeviceKind>,
    opened: Arc<Mutex<Vec<DeviceKind>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A rig that acknowledges everything and reports steady in-range readings.
    pub fn nominal(config: &ExperimentConfig) -> Self {
        let supply = &config.power_supply;
        let voltage = (supply.min_voltage + supply.max_voltage) / 2.0;

        Self::new()
            .with_device(
                DeviceKind::PowerSupply,
                MockTransport::new()
                    .acknowledging("OK")
                    .respond(power_supply::MEASURE_CURRENT, [supply.current_setpoint.to_string()])
                    .respond(power_supply::MEASURE_VOLTAGE, [voltage.to_string()]),
            )
            .with_device(DeviceKind::Pump, MockTransport::new().acknowledging("OK"))
            .with_device(
                DeviceKind::TemperatureController,
                MockTransport::new().acknowledging("OK").respond(
                    temperature_controller::MEASURE_TEMPERATURE,
                    [config.temperature.temperature_setpoint.to_string()],
                ),
            )
    }

    pub fn with_device(mut self, device: DeviceKind, transport: MockTransport) -> Self {
        self.transports.insert(device, transport);
        self
    }

    /// Make opening `device` fail as if its port did not exist.
    pub fn unreachable(mut self, device: DeviceKind) -> Self {
        self.unreachable.insert(device);
        self
    }

    /// Devices whose transport was requested, in order.
    pub fn opened(&self) -> Vec<DeviceKind> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Shared handle to the transport scripted for `device`.
    pub fn transport(&self, device: DeviceKind) -> Option<MockTransport> {
        self.transports.get(&device).cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(
        &self,
        device: DeviceKind,
        port: &str,
        _settings: &ChannelSettings,
    ) -> Result<Box<dyn Transport>, ChannelError> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(device);

        if self.unreachable.contains(&device) {
            return Err(ChannelError::Transport(format!("no device at '{}'", port)));
        }

        match self.transports.get(&device) {
            Some(transport) => Ok(Box::new(transport.clone())),
            None => Err(ChannelError::Transport(format!(
                "no mock scripted for {}",
                device
            ))),
        }
    }
}
