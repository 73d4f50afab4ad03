//! Tuning parameters for the pipeline and its periodic workers.
//!
//! Defaults: 500 KiB header read, 12 KiB input chunks,
//! a 4 KiB initial frame buffer and 5-entry queues.

use std::path::PathBuf;
use std::time::Duration;

/// Playback pipeline tuning shared by the decode, output and controller stages.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Capacity of the request, control and frame queues.
    pub queue_capacity: usize,
    /// Size of the first read of every file (captures tags/art ahead of audio frames).
    pub header_chunk_bytes: usize,
    /// Size of every following read.
    pub input_chunk_bytes: usize,
    /// Initial size of the decoded frame buffer.
    pub initial_output_bytes: usize,
    /// Upper bound for frame buffer growth; larger requests fail with out-of-memory.
    pub max_output_bytes: usize,
    /// Decoding of a chunk stops once no more than this many bytes remain undecoded.
    pub min_decode_bytes: usize,
    /// Volume decrement per fade step.
    pub fade_step: u8,
    /// Delay between fade steps.
    pub fade_step_delay: Duration,
    /// Bounded wait when forwarding a request from the controller to the decode stage.
    pub forward_timeout: Duration,
    /// Pause after a session is torn down, before the pipeline reports idle.
    pub settle_delay: Duration,
    /// Output volume restored at the start of every session (0..=100).
    pub volume: u8,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            header_chunk_bytes: 500 * 1024,
            input_chunk_bytes: 12 * 1024,
            initial_output_bytes: 4 * 1024,
            max_output_bytes: 1024 * 1024,
            min_decode_bytes: 512,
            fade_step: 4,
            fade_step_delay: Duration::from_millis(20),
            forward_timeout: Duration::from_secs(1),
            settle_delay: Duration::from_millis(200),
            volume: 100,
        }
    }
}

impl PlayerConfig {
    /// Carry-over capacity: twice the input chunk, so a remainder plus one read always fits.
    pub fn carry_bytes(&self) -> usize {
        self.input_chunk_bytes.saturating_mul(2)
    }
}

/// Track advance manager settings.
#[derive(Clone, Debug)]
pub struct AdvanceConfig {
    /// Directory scanned for playable files.
    pub base_dir: PathBuf,
    /// Wrap around to the first file after the last one.
    pub loop_enabled: bool,
    /// Period of the idle check that starts the next track.
    pub interval: Duration,
}

impl Default for AdvanceConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/sdcard/MP3"),
            loop_enabled: true,
            interval: Duration::from_secs(1),
        }
    }
}

/// Skip trigger (touch pad) settings.
#[derive(Clone, Debug)]
pub struct SkipConfig {
    /// Sensor polling period.
    pub poll_interval: Duration,
    /// Raw reading above which the pad counts as touched.
    pub threshold: u32,
    /// Quiet period after a trigger.
    pub debounce: Duration,
}

impl Default for SkipConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            threshold: 30_000,
            debounce: Duration::from_millis(500),
        }
    }
}

/// Diagnostics monitor settings.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}
