//! Teardown sequencer.
//!
//! Resets every instrument that was brought far enough to hold a slot, all at
//! once, then closes their channels. Empty slots are skipped. A reset that is
//! not acknowledged is recorded and does not stop the others. Teardown never
//! fails; it reports.

use super::devices::DeviceSet;
use crate::error::TeardownError;
use crate::events::{EventSink, ExperimentEvent};
use crate::instrument::DeviceKind;
use futures::future::join_all;

/// Result of resetting one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReset {
    pub device: DeviceKind,
    pub result: Result<(), TeardownError>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeardownReport {
    pub resets: Vec<DeviceReset>,
    pub skipped: Vec<DeviceKind>,
}

impl TeardownReport {
    /// Instruments a reset was issued to.
    pub fn reset_devices(&self) -> Vec<DeviceKind> {
        self.resets.iter().map(|reset| reset.device).collect()
    }

    pub fn failures(&self) -> Vec<&TeardownError> {
        self.resets
            .iter()
            .filter_map(|reset| reset.result.as_ref().err())
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures().is_empty()
    }
}

/// Reset and release everything `devices` holds. Leaves every slot empty, so
/// a second call does nothing.
pub async fn teardown(devices: &mut DeviceSet, events: &dyn EventSink) -> TeardownReport {
    let mut report = TeardownReport::default();
    let mut held = Vec::new();

    for (device, handle) in devices.drain() {
        match handle {
            Some(instrument) => held.push(instrument),
            None => {
                events.emit(ExperimentEvent::ResetSkipped { device });
                report.skipped.push(device);
            }
        }
    }

    let outcomes = join_all(held.iter().map(|instrument| async move {
        let ok = instrument.reset().await;
        instrument.close().await;
        (instrument.kind(), ok)
    }))
    .await;

    for (device, ok) in outcomes {
        events.emit(ExperimentEvent::ResetOutcome { device, ok });
        let result = if ok {
            Ok(())
        } else {
            Err(TeardownError {
                device,
                reason: "reset was not acknowledged".to_string(),
            })
        };
        report.resets.push(DeviceReset { device, result });
    }

    events.emit(ExperimentEvent::TeardownComplete {
        attempted: report.resets.len(),
        failed: report.failures().len(),
    });
    report
}
