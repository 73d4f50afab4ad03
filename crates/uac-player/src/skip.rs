//! Skip trigger: turns sensor rising edges into skip commands.

use crate::advance::AdvanceHandle;
use crate::config::SkipConfig;
use crate::error::{PlayerError, Result};
use crate::worker::WorkerHandle;

/// Raw touch or button reading. Larger means "more pressed".
pub trait TouchSensor: Send {
    fn read(&mut self) -> Result<u32>;
}

/// Rising-edge detector over raw readings.
#[derive(Debug)]
pub struct EdgeDetector {
    threshold: u32,
    previous: u32,
}

impl EdgeDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            previous: 0,
        }
    }

    /// True when the previous reading was at or below the threshold and `current` is above it.
    pub fn update(&mut self, current: u32) -> bool {
        let rising = self.previous <= self.threshold && current > self.threshold;
        self.previous = current;
        rising
    }
}

/// Poll `sensor` and send a skip on every rising edge, then wait out the debounce interval.
pub fn spawn_skip_trigger(
    mut sensor: Box<dyn TouchSensor>,
    config: SkipConfig,
    advance: AdvanceHandle,
) -> Result<WorkerHandle> {
    WorkerHandle::spawn("uac-skip", move |stop| {
        let mut edges = EdgeDetector::new(config.threshold);
        while stop.tick(config.poll_interval) {
            let value = match sensor.read() {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "touch sensor read failed");
                    continue;
                }
            };
            if !edges.update(value) {
                continue;
            }
            tracing::info!(value, "skip");
            match advance.skip() {
                Ok(()) => {}
                Err(PlayerError::Closed) => break,
                Err(e) => tracing::warn!(error = %e, "skip not delivered"),
            }
            if !stop.tick(config.debounce) {
                break;
            }
        }
        tracing::debug!("skip trigger exiting");
    })
}
