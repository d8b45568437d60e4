//! Readiness sequencer.
//!
//! Brings the rig from "unknown" to "every instrument applying its setpoints",
//! one instrument at a time: pump, then temperature controller, then the
//! power supply, which must not drive current into a rig that is not ready
//! for it. The first failure stops the sequence. Instruments not reached yet
//! are never opened; instruments already slotted are left for teardown.

use super::devices::DeviceSet;
use super::{ExperimentContext, Interrupt};
use crate::data::StorageWriter;
use crate::error::ExperimentError;
use crate::events::{EventSink, ExperimentEvent};
use crate::instrument::{
    BringUpStep, DeviceChannel, DeviceKind, Instrument, PowerSupply, Pump, TemperatureController,
};
use tracing::info;

/// Bring all three instruments up and start the output store.
pub async fn bring_up(
    context: &ExperimentContext,
    devices: &mut DeviceSet,
    writer: &mut dyn StorageWriter,
    interrupt: &Interrupt,
) -> Result<(), ExperimentError> {
    let config = &context.config;

    bring_up_device(context, DeviceKind::Pump, &config.pump.port, &mut devices.pump, Pump::new)
        .await?;

    check_interrupt(interrupt)?;
    bring_up_device(
        context,
        DeviceKind::TemperatureController,
        &config.temperature.port,
        &mut devices.temperature,
        |channel| TemperatureController::new(channel, config.temperature.clone()),
    )
    .await?;

    check_interrupt(interrupt)?;
    bring_up_device(
        context,
        DeviceKind::PowerSupply,
        &config.power_supply.port,
        &mut devices.power_supply,
        |channel| PowerSupply::new(channel, config.power_supply.clone()),
    )
    .await?;

    writer.write_header().await?;
    info!("all devices ready");
    Ok(())
}

fn check_interrupt(interrupt: &Interrupt) -> Result<(), ExperimentError> {
    if interrupt.is_requested() {
        info!("interrupt observed during bring-up");
        return Err(ExperimentError::Interrupted);
    }
    Ok(())
}

/// Connect, verify and configure one instrument.
///
/// The instrument is put in `slot` only once it has verified, so an
/// instrument that never identified itself is closed here and never reset.
async fn bring_up_device<D, F>(
    context: &ExperimentContext,
    device: DeviceKind,
    port: &str,
    slot: &mut Option<D>,
    build: F,
) -> Result<(), ExperimentError>
where
    D: Instrument,
    F: FnOnce(DeviceChannel) -> D,
{
    let events = &*context.events;
    info!(device = %device, port, "bringing up device");

    let channel = match DeviceChannel::connect(
        context.connector.as_ref(),
        device,
        port,
        &context.config.serial,
    )
    .await
    {
        Ok(channel) => channel,
        Err(source) => {
            step_failed(events, device, BringUpStep::Connect);
            return Err(ExperimentError::BringUpFailed {
                device,
                step: BringUpStep::Connect,
                source: Some(source),
            });
        }
    };
    step_passed(events, device, BringUpStep::Connect);

    let instrument = build(channel);
    if !instrument.verify_connection().await {
        instrument.close().await;
        step_failed(events, device, BringUpStep::Verify);
        return Err(ExperimentError::BringUpFailed {
            device,
            step: BringUpStep::Verify,
            source: None,
        });
    }
    step_passed(events, device, BringUpStep::Verify);

    let instrument = slot.insert(instrument);
    if let Err(step) = instrument.configure().await {
        step_failed(events, device, step);
        return Err(ExperimentError::BringUpFailed {
            device,
            step,
            source: None,
        });
    }

    events.emit(ExperimentEvent::DeviceReady { device });
    Ok(())
}

fn step_passed(events: &dyn EventSink, device: DeviceKind, step: BringUpStep) {
    events.emit(ExperimentEvent::BringUpStep {
        device,
        step,
        ok: true,
    });
}

fn step_failed(events: &dyn EventSink, device: DeviceKind, step: BringUpStep) {
    events.emit(ExperimentEvent::BringUpStep {
        device,
        step,
        ok: false,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockConnector, MockTransport};
    use crate::config::tests::sample_config;
    use crate::data::Reading;
    use crate::events::RecordingSink;
    use crate::instrument::{power_supply, pump, IDENTIFY};
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(Default)]
    struct HeaderProbe {
        headers: usize,
    }

    #[async_trait]
    impl StorageWriter for HeaderProbe {
        async fn write_header(&mut self) -> Result<(), ExperimentError> {
            self.headers += 1;
            Ok(())
        }

        async fn append(&mut self, _reading: &Reading) -> Result<(), ExperimentError> {
            Ok(())
        }
    }

    fn context(connector: MockConnector) -> (ExperimentContext, RecordingSink) {
        let events = RecordingSink::new();
        let context =
            ExperimentContext::new(sample_config(), Arc::new(connector), Arc::new(events.clone()))
                .unwrap();
        (context, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_brings_up_in_dependency_order() {
        let connector = MockConnector::nominal(&sample_config());
        let (context, events) = context(connector.clone());
        let mut devices = DeviceSet::new();
        let mut writer = HeaderProbe::default();

        bring_up(&context, &mut devices, &mut writer, &Interrupt::never())
            .await
            .unwrap();

        assert!(devices.complete().is_some());
        assert_eq!(writer.headers, 1);
        assert_eq!(
            connector.opened(),
            vec![
                DeviceKind::Pump,
                DeviceKind::TemperatureController,
                DeviceKind::PowerSupply
            ]
        );

        let supply = connector.transport(DeviceKind::PowerSupply).unwrap();
        assert_eq!(
            supply.sent(),
            vec![
                power_supply::RESET.to_string(),
                IDENTIFY.to_string(),
                power_supply::OUTPUT_ON.to_string(),
                "volt:lim 5,15".to_string(),
                "curr 2".to_string(),
            ]
        );

        let ready: Vec<_> = events
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ExperimentEvent::DeviceReady { device } => Some(device),
                _ => None,
            })
            .collect();
        assert_eq!(ready.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_verify_leaves_slot_empty() {
        let config = sample_config();
        let connector = MockConnector::nominal(&config).with_device(
            DeviceKind::TemperatureController,
            MockTransport::new().silent(IDENTIFY),
        );
        let (context, _) = context(connector.clone());
        let mut devices = DeviceSet::new();
        let mut writer = HeaderProbe::default();

        let err = bring_up(&context, &mut devices, &mut writer, &Interrupt::never())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExperimentError::BringUpFailed {
                device: DeviceKind::TemperatureController,
                step: BringUpStep::Verify,
                source: None,
            }
        ));
        assert_eq!(devices.present(), vec![DeviceKind::Pump]);
        assert_eq!(
            connector.opened(),
            vec![DeviceKind::Pump, DeviceKind::TemperatureController]
        );
        assert_eq!(writer.headers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_configure_keeps_device_for_teardown() {
        let config = sample_config();
        let connector = MockConnector::nominal(&config).with_device(
            DeviceKind::Pump,
            MockTransport::new()
                .acknowledging("OK")
                .silent(pump::TURN_ON),
        );
        let (context, events) = context(connector);
        let mut devices = DeviceSet::new();

        let err = bring_up(
            &context,
            &mut devices,
            &mut HeaderProbe::default(),
            &Interrupt::never(),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "pump bring-up failed at step 'power-on'"
        );
        assert_eq!(devices.present(), vec![DeviceKind::Pump]);
        assert!(events.events().contains(&ExperimentEvent::BringUpStep {
            device: DeviceKind::Pump,
            step: BringUpStep::PowerOn,
            ok: false,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_port_fails_at_connect() {
        let config = sample_config();
        let connector = MockConnector::nominal(&config).unreachable(DeviceKind::PowerSupply);
        let (context, _) = context(connector);
        let mut devices = DeviceSet::new();

        let err = bring_up(
            &context,
            &mut devices,
            &mut HeaderProbe::default(),
            &Interrupt::never(),
        )
        .await
        .unwrap_err();

        match err {
            ExperimentError::BringUpFailed {
                device,
                step,
                source,
            } => {
                assert_eq!(device, DeviceKind::PowerSupply);
                assert_eq!(step, BringUpStep::Connect);
                assert!(source.is_some());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            devices.present(),
            vec![DeviceKind::Pump, DeviceKind::TemperatureController]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_stops_before_next_device() {
        let config = sample_config();
        let connector = MockConnector::nominal(&config);
        let (context, _) = context(connector.clone());
        let mut devices = DeviceSet::new();
        let (handle, interrupt) = Interrupt::channel();
        handle.request();

        let err = bring_up(
            &context,
            &mut devices,
            &mut HeaderProbe::default(),
            &interrupt,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExperimentError::Interrupted));
        assert_eq!(connector.opened(), vec![DeviceKind::Pump]);
        let controller = connector
            .transport(DeviceKind::TemperatureController)
            .unwrap();
        assert!(controller.sent().is_empty());
    }
}
