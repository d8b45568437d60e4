//! Device slots owned by the experiment controller.
//!
//! A slot is empty until its instrument has been connected and has verified
//! its identity. An empty slot means "nothing to reset", never an error.

use crate::instrument::{DeviceKind, Instrument, PowerSupply, Pump, TemperatureController};

#[derive(Default)]
pub struct DeviceSet {
    pub pump: Option<Pump>,
    pub temperature: Option<TemperatureController>,
    pub power_supply: Option<PowerSupply>,
}

/// Borrowed view of a fully populated rig.
#[derive(Clone, Copy)]
pub struct Rig<'a> {
    pub pump: &'a Pump,
    pub temperature: &'a TemperatureController,
    pub power_supply: &'a PowerSupply,
}

impl DeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// All three instruments, or `None` if any slot is still empty.
    pub fn complete(&self) -> Option<Rig<'_>> {
        Some(Rig {
            pump: self.pump.as_ref()?,
            temperature: self.temperature.as_ref()?,
            power_supply: self.power_supply.as_ref()?,
        })
    }

    /// Kinds of the instruments currently held.
    pub fn present(&self) -> Vec<DeviceKind> {
        let mut present = Vec::new();
        if self.pump.is_some() {
            present.push(DeviceKind::Pump);
        }
        if self.temperature.is_some() {
            present.push(DeviceKind::TemperatureController);
        }
        if self.power_supply.is_some() {
            present.push(DeviceKind::PowerSupply);
        }
        present
    }

    pub fn is_empty(&self) -> bool {
        self.present().is_empty()
    }

    /// Empty every slot, handing out what was held.
    pub fn drain(&mut self) -> Vec<(DeviceKind, Option<Box<dyn Instrument>>)> {
        vec![
            (
                DeviceKind::PowerSupply,
                self.power_supply
                    .take()
                    .map(|device| Box::new(device) as Box<dyn Instrument>),
            ),
            (
                DeviceKind::TemperatureController,
                self.temperature
                    .take()
                    .map(|device| Box::new(device) as Box<dyn Instrument>),
            ),
            (
                DeviceKind::Pump,
                self.pump
                    .take()
                    .map(|device| Box::new(device) as Box<dyn Instrument>),
            ),
        ]
    }
}
