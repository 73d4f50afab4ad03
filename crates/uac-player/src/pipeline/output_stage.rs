//! Output stage: drains decoded frames into the output port.

use crossbeam_channel::{Receiver, Sender};

use super::{DecodedFrame, Shared};
use crate::error::PlayerError;

pub(super) fn run(shared: &Shared, frames: Receiver<DecodedFrame>, recycle: Sender<Vec<u8>>) {
    let mut last_session = 0u64;
    for frame in frames.iter() {
        if frame.session != last_session {
            tracing::debug!(session = frame.session, format = %frame.format, "first frame of session");
            last_session = frame.session;
        }
        match shared.port.write(&frame.pcm, frame.format, None) {
            Ok(()) => shared.stats.frame_written(),
            Err(PlayerError::NotConnected) => {
                shared.stats.write_failed();
                tracing::trace!(session = frame.session, "frame dropped: no device");
            }
            Err(e) => {
                shared.stats.write_failed();
                tracing::warn!(session = frame.session, error = %e, "device write failed");
            }
        }
        let _ = recycle.try_send(frame.pcm);
    }
    tracing::debug!("output stage exiting");
}
