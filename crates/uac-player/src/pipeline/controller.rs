//! Request/fade controller: fades out the current session, then hands the request on.

use std::thread;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, select};

use super::Shared;
use crate::error::PlayerError;
use crate::track::PlaybackRequest;

pub(super) fn run(
    shared: &Shared,
    requests: Receiver<PlaybackRequest>,
    control: Sender<PlaybackRequest>,
    shutdown: Receiver<()>,
) {
    loop {
        let request = select! {
            recv(requests) -> msg => match msg {
                Ok(request) => request,
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        };
        tracing::info!(path = %request.track, "play request");
        if shared.state.is_playing() {
            fade_out(shared);
        }
        if !forward(shared, &control, request) {
            break;
        }
    }
    tracing::debug!("controller exiting");
}

/// Ramp the volume down to zero, mute, and ask the decode stage to stop.
pub(super) fn fade_out(shared: &Shared) {
    let cfg = &shared.config;
    match shared.port.volume() {
        Ok(mut volume) => {
            let step = cfg.fade_step.max(1);
            tracing::debug!(from = volume, step, "fading out");
            while volume > 0 {
                volume = volume.saturating_sub(step);
                if let Err(e) = shared.port.set_volume(volume) {
                    tracing::warn!(error = %e, "fade interrupted");
                    break;
                }
                thread::sleep(cfg.fade_step_delay);
            }
        }
        Err(e) => tracing::debug!(error = %e, "fade skipped"),
    }
    if let Err(e) = shared.port.set_mute(true) {
        tracing::debug!(error = %e, "mute failed");
    }
    if shared.state.request_stop() {
        tracing::info!(session = shared.state.session_id(), "stop requested");
    }
}

/// Hand `request` to the decode stage within the forward timeout. A request that does not
/// fit is dropped. Returns `false` once the decode stage is gone.
pub(super) fn forward(
    shared: &Shared,
    control: &Sender<PlaybackRequest>,
    request: PlaybackRequest,
) -> bool {
    let timeout = shared.config.forward_timeout;
    match control.send_timeout(request, timeout) {
        Ok(()) => true,
        Err(SendTimeoutError::Timeout(request)) => {
            shared.release_pending();
            shared.stats.request_dropped();
            let err = PlayerError::QueueTimeout(timeout);
            tracing::warn!(path = %request.track, error = %err, "request dropped");
            true
        }
        Err(SendTimeoutError::Disconnected(_)) => {
            shared.release_pending();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use crossbeam_channel::bounded;

    use crate::output::OutputPort;
    use crate::state::PlaybackState;
    use crate::testing::{DeviceCall, EventLog, RecordingDevice, test_config};
    use crate::track::TrackReference;

    fn shared_with_device(log: &EventLog) -> Shared {
        let port = OutputPort::new();
        port.attach(Arc::new(RecordingDevice::new("dac", log.clone())));
        Shared::new(test_config(), port)
    }

    #[test]
    fn fade_ramps_to_zero_then_mutes_then_stops() {
        let log = EventLog::default();
        let shared = shared_with_device(&log);
        shared.port.set_volume(60).unwrap();
        shared.state.begin_session();

        fade_out(&shared);

        assert_eq!(
            log.device_calls(),
            vec![
                DeviceCall::Volume(60),
                DeviceCall::Volume(35),
                DeviceCall::Volume(10),
                DeviceCall::Volume(0),
                DeviceCall::Mute(true),
            ]
        );
        assert_eq!(shared.state.get(), PlaybackState::Stopping);
    }

    #[test]
    fn fade_without_device_still_requests_stop() {
        let shared = Shared::new(test_config(), OutputPort::new());
        shared.state.begin_session();
        fade_out(&shared);
        assert_eq!(shared.state.get(), PlaybackState::Stopping);
    }

    #[test]
    fn forward_timeout_drops_the_request_and_releases_pending() {
        let mut cfg = test_config();
        cfg.forward_timeout = Duration::from_millis(10);
        let shared = Shared::new(cfg, OutputPort::new());
        let (control, _control_rx) = bounded(1);
        let request = || PlaybackRequest::new(TrackReference::new("/media/a.mp3"));

        shared.pending.store(2, Ordering::Release);
        assert!(forward(&shared, &control, request()));
        assert!(forward(&shared, &control, request()));

        assert_eq!(shared.pending.load(Ordering::Acquire), 1);
        assert_eq!(control.len(), 1);
    }

    #[test]
    fn forward_reports_a_closed_decode_stage() {
        let shared = Shared::new(test_config(), OutputPort::new());
        let (control, control_rx) = bounded(1);
        drop(control_rx);
        shared.pending.store(1, Ordering::Release);
        assert!(!forward(
            &shared,
            &control,
            PlaybackRequest::new(TrackReference::new("/media/a.mp3"))
        ));
        assert_eq!(shared.pending.load(Ordering::Acquire), 0);
    }
}
