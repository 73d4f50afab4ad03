//! Push-mode decoder interface used by the decode stage.
//!
//! The decode stage owns the bytes; the decoder is handed a slice of undecoded input and a
//! frame buffer, and reports how much input it used and how much PCM it wrote.

use serde::Serialize;

use crate::error::Result;
use crate::output::PcmFormat;
use crate::track::AudioFormat;

/// Result of one [`FrameDecoder::process`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeStatus {
    /// `consumed` input bytes were used and `decoded` bytes of PCM were written to the
    /// output (`decoded == 0` when the consumed bytes carried no audio, e.g. a tag).
    Frame { consumed: usize, decoded: usize },
    /// The remaining input does not hold a complete frame. `consumed` bytes of leading
    /// junk were skipped and should be dropped.
    NeedInput { consumed: usize },
    /// The output buffer is too small for the next frame. Nothing was consumed; retry the
    /// same input with at least `needed` bytes of output.
    OutputTooSmall { needed: usize },
}

/// Stream parameters reported by the decoder once it has seen audio.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl From<StreamInfo> for PcmFormat {
    fn from(info: StreamInfo) -> Self {
        PcmFormat {
            sample_rate: info.sample_rate,
            channels: info.channels,
            bits: info.bits_per_sample,
        }
    }
}

/// A stateful decoder for one session.
pub trait FrameDecoder: Send {
    /// Decode at most one frame from `input` into `output`.
    fn process(&mut self, input: &[u8], output: &mut [u8]) -> Result<DecodeStatus>;

    /// Parameters of the decoded stream, once known.
    fn info(&self) -> Option<StreamInfo>;

    /// Release decoder resources. Called exactly once per session.
    fn close(&mut self) {}
}

/// Creates decoders for supported formats.
pub trait DecoderFactory: Send + Sync {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn FrameDecoder>>;
}
