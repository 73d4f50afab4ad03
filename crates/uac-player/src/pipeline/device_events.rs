//! Applies output device connect/disconnect notifications.

use crossbeam_channel::{Receiver, select};

use super::Shared;
use crate::output::DeviceEvent;

pub(super) fn run(shared: &Shared, events: Receiver<DeviceEvent>, shutdown: Receiver<()>) {
    loop {
        let event = select! {
            recv(events) -> msg => match msg {
                Ok(event) => event,
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        };
        apply(shared, event);
    }
}

pub(super) fn apply(shared: &Shared, event: DeviceEvent) {
    match event {
        DeviceEvent::Connected(device) => {
            let name = device.name();
            if let Err(e) = device.set_volume(shared.config.volume) {
                tracing::warn!(device = %name, error = %e, "initial volume not applied");
            }
            shared.port.attach(device);
            tracing::info!(device = %name, "output device connected");
        }
        DeviceEvent::Disconnected => {
            let previous = shared.port.detach();
            shared.state.force_idle();
            tracing::warn!(
                device = previous.map(|d| d.name()).as_deref().unwrap_or("-"),
                "output device disconnected"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::output::OutputPort;
    use crate::state::PlaybackState;
    use crate::testing::{DeviceCall, EventLog, RecordingDevice, test_config};

    #[test]
    fn connect_applies_configured_volume() {
        let log = EventLog::default();
        let shared = Shared::new(test_config(), OutputPort::new());
        apply(
            &shared,
            DeviceEvent::Connected(Arc::new(RecordingDevice::new("dac", log.clone()))),
        );
        assert!(shared.port.is_connected());
        assert_eq!(log.device_calls(), vec![DeviceCall::Volume(80)]);
    }

    #[test]
    fn disconnect_detaches_and_forces_idle() {
        let shared = Shared::new(test_config(), OutputPort::new());
        shared
            .port
            .attach(Arc::new(RecordingDevice::new("dac", EventLog::default())));
        shared.state.begin_session();

        apply(&shared, DeviceEvent::Disconnected);

        assert!(!shared.port.is_connected());
        assert_eq!(shared.state.get(), PlaybackState::Idle);
    }
}
