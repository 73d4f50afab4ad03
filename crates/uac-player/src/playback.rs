//! CPAL output stream and its real-time callback.
//!
//! The callback refills a small local buffer from the [`SampleQueue`] without blocking,
//! maps channels when the device layout differs from the source, applies volume/mute and
//! converts to the device sample format. Underruns play silence.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use cpal::traits::DeviceTrait;

use crate::error::{PlayerError, Result};
use crate::queue::SampleQueue;

const REFILL_MAX_FRAMES: usize = 1024;

/// Volume/mute applied inside the callback.
#[derive(Debug)]
pub struct OutputGain {
    volume: AtomicU8,
    muted: AtomicBool,
}

impl OutputGain {
    pub fn new(volume: u8, muted: bool) -> Self {
        Self {
            volume: AtomicU8::new(volume.min(100)),
            muted: AtomicBool::new(muted),
        }
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    pub fn set_volume(&self, volume: u8) {
        self.volume.store(volume.min(100), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Linear gain factor for the current settings.
    pub fn factor(&self) -> f32 {
        if self.is_muted() {
            0.0
        } else {
            f32::from(self.volume()) / 100.0
        }
    }
}

/// Build a CPAL output stream that plays interleaved `f32` samples from `queue`.
///
/// `on_error` is invoked from the CPAL error callback.
pub fn build_output_stream<E>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SampleQueue>,
    gain: &Arc<OutputGain>,
    on_error: E,
) -> Result<cpal::Stream>
where
    E: FnMut(cpal::StreamError) + Send + 'static,
{
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32, E>(device, config, queue, gain, on_error),
        cpal::SampleFormat::I16 => build_stream::<i16, E>(device, config, queue, gain, on_error),
        cpal::SampleFormat::I32 => build_stream::<i32, E>(device, config, queue, gain, on_error),
        cpal::SampleFormat::U16 => build_stream::<u16, E>(device, config, queue, gain, on_error),
        other => Err(PlayerError::Device(format!(
            "unsupported sample format: {other:?}"
        ))),
    }
}

fn build_stream<T, E>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SampleQueue>,
    gain: &Arc<OutputGain>,
    on_error: E,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
    E: FnMut(cpal::StreamError) + Send + 'static,
{
    let channels_out = usize::from(config.channels);
    let mut st = LocalBuffer {
        pos: 0,
        src_channels: queue.channels(),
        src: Vec::new(),
    };
    let queue_cb = queue.clone();
    let gain_cb = gain.clone();
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                let factor = gain_cb.factor();
                let frames = data.len() / channels_out;

                for frame in 0..frames {
                    if st.pos >= st.src.len() {
                        st.pos = 0;
                        match queue_cb.pop_nonblocking(REFILL_MAX_FRAMES) {
                            Some(v) => st.src = v,
                            None => {
                                st.src.clear();
                                data[frame * channels_out..].fill(silence);
                                return;
                            }
                        }
                    }
                    for ch in 0..channels_out {
                        let sample = next_sample_mapped(&mut st, channels_out, ch) * factor;
                        data[frame * channels_out + ch] =
                            <T as cpal::Sample>::from_sample::<f32>(sample);
                    }
                }
            },
            on_error,
            None,
        )
        .map_err(|e| PlayerError::Device(e.to_string()))?;

    Ok(stream)
}

/// Samples fetched from the queue and not yet played.
struct LocalBuffer {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

/// Next output sample for `dst_ch`. `pos` advances after the last destination channel.
///
/// mono → stereo duplicates, stereo → mono averages, anything else clamps to the last
/// available source channel.
fn next_sample_mapped(st: &mut LocalBuffer, dst_channels: usize, dst_ch: usize) -> f32 {
    if st.pos >= st.src.len() {
        return 0.0;
    }
    let frame_start = st.pos;
    let get = |ch: usize, st: &LocalBuffer| -> f32 {
        if ch < st.src_channels && frame_start + ch < st.src.len() {
            st.src[frame_start + ch]
        } else {
            0.0
        }
    };

    let out = match (st.src_channels, dst_channels) {
        (2, 1) => 0.5 * (get(0, st) + get(1, st)),
        (1, _) => get(0, st),
        (src, _) => get(dst_ch.min(src.saturating_sub(1)), st),
    };

    if dst_ch + 1 == dst_channels {
        st.pos += st.src_channels;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(src_channels: usize, src: Vec<f32>, dst_channels: usize) -> Vec<f32> {
        let mut st = LocalBuffer {
            pos: 0,
            src_channels,
            src,
        };
        let mut out = Vec::new();
        while st.pos < st.src.len() {
            for ch in 0..dst_channels {
                out.push(next_sample_mapped(&mut st, dst_channels, ch));
            }
        }
        out
    }

    #[test]
    fn mono_is_duplicated_to_stereo() {
        assert_eq!(render(1, vec![0.1, 0.2], 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        assert_eq!(render(2, vec![0.25, 0.75, -1.0, 1.0], 1), vec![0.5, 0.0]);
    }

    #[test]
    fn stereo_passes_through() {
        assert_eq!(render(2, vec![0.1, 0.2, 0.3, 0.4], 2), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn gain_factor_follows_volume_and_mute() {
        let gain = OutputGain::new(150, false);
        assert_eq!(gain.volume(), 100);
        assert_eq!(gain.factor(), 1.0);
        gain.set_volume(50);
        assert_eq!(gain.factor(), 0.5);
        gain.set_muted(true);
        assert_eq!(gain.factor(), 0.0);
        assert_eq!(gain.volume(), 50);
    }
}
