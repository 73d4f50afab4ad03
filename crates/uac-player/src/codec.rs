//! Symphonia-backed push decoder.
//!
//! Symphonia's own demuxers pull from a `MediaSource`; the pipeline instead pushes chunks
//! of raw file bytes. [`SymphoniaFrameDecoder`] locates one frame at a time with
//! [`crate::framing`], wraps it in a packet and runs the Symphonia codec on it, writing
//! interleaved signed 16-bit little-endian PCM into the caller's frame buffer.

use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{
    CODEC_TYPE_AAC, CODEC_TYPE_MP3, CodecParameters, Decoder, DecoderOptions,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;

use crate::decoder::{DecodeStatus, DecoderFactory, FrameDecoder, StreamInfo};
use crate::error::{PlayerError, Result};
use crate::framing::{
    AAC_SAMPLES_PER_FRAME, Id3Probe, find_sync, parse_adts_header, parse_mpa_header,
    probe_id3v2,
};
use crate::track::AudioFormat;

const PCM_BITS: u16 = 16;
const PCM_BYTES: usize = 2;
// Bytes kept back when no sync word is found (a header may straddle the chunk end).
const SYNC_TAIL: usize = 6;

/// Opens [`SymphoniaFrameDecoder`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaDecoderFactory;

impl DecoderFactory for SymphoniaDecoderFactory {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn FrameDecoder>> {
        Ok(Box::new(SymphoniaFrameDecoder::new(format)))
    }
}

/// Frame located at the start of the input.
struct LocatedFrame {
    frame_len: usize,
    payload_start: usize,
    sample_rate: u32,
    channels: u16,
    samples_per_frame: usize,
    extra_data: Option<[u8; 2]>,
}

/// PCM decoded on a previous call that did not fit the caller's buffer.
struct PendingPcm {
    consumed: usize,
    bytes: Vec<u8>,
}

pub struct SymphoniaFrameDecoder {
    format: AudioFormat,
    decoder: Option<Box<dyn Decoder>>,
    decoder_key: Option<(u32, u16)>,
    skip_remaining: usize,
    pending: Option<PendingPcm>,
    info: Option<StreamInfo>,
    frames_decoded: u64,
}

impl SymphoniaFrameDecoder {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            decoder: None,
            decoder_key: None,
            skip_remaining: 0,
            pending: None,
            info: None,
            frames_decoded: 0,
        }
    }

    fn locate(&self, input: &[u8]) -> Option<LocatedFrame> {
        match self.format {
            AudioFormat::Mp3 => parse_mpa_header(input).map(|h| LocatedFrame {
                frame_len: h.frame_len,
                payload_start: 0,
                sample_rate: h.sample_rate,
                channels: h.channels,
                samples_per_frame: h.samples_per_frame,
                extra_data: None,
            }),
            AudioFormat::Aac => parse_adts_header(input).map(|h| LocatedFrame {
                frame_len: h.frame_len,
                payload_start: h.header_len,
                sample_rate: h.sample_rate,
                channels: h.channels,
                samples_per_frame: AAC_SAMPLES_PER_FRAME,
                extra_data: Some(h.audio_specific_config),
            }),
        }
    }

    fn is_header(&self, bytes: &[u8]) -> bool {
        match self.format {
            AudioFormat::Mp3 => parse_mpa_header(bytes).is_some(),
            AudioFormat::Aac => parse_adts_header(bytes).is_some(),
        }
    }

    fn ensure_decoder(&mut self, frame: &LocatedFrame) -> Result<()> {
        let key = (frame.sample_rate, frame.channels);
        if self.decoder.is_some() && self.decoder_key == Some(key) {
            return Ok(());
        }
        let mut params = CodecParameters::new();
        params
            .for_codec(match self.format {
                AudioFormat::Mp3 => CODEC_TYPE_MP3,
                AudioFormat::Aac => CODEC_TYPE_AAC,
            })
            .with_sample_rate(frame.sample_rate)
            .with_channels(channels_for(frame.channels));
        if let Some(asc) = frame.extra_data {
            params.with_extra_data(asc.to_vec().into_boxed_slice());
        }
        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| PlayerError::Decoder(format!("{} codec: {e}", self.format.name())))?;
        if self.decoder_key.is_some() {
            tracing::debug!(
                sample_rate = frame.sample_rate,
                channels = frame.channels,
                "stream parameters changed; decoder recreated"
            );
        }
        self.decoder = Some(decoder);
        self.decoder_key = Some(key);
        Ok(())
    }

    fn decode_frame(&mut self, input: &[u8], frame: &LocatedFrame) -> Result<Option<Vec<u8>>> {
        self.ensure_decoder(frame)?;
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(PlayerError::Decoder("decoder not initialised".into()));
        };
        let ts = self.frames_decoded * frame.samples_per_frame as u64;
        let packet = Packet::new_from_slice(
            0,
            ts,
            frame.samples_per_frame as u64,
            &input[frame.payload_start..frame.frame_len],
        );
        self.frames_decoded += 1;

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                tracing::debug!(error = msg, "corrupt frame skipped");
                return Ok(None);
            }
            Err(SymphoniaError::ResetRequired) => {
                self.decoder = None;
                return Ok(None);
            }
            Err(e) => return Err(PlayerError::Decoder(e.to_string())),
        };

        let spec = *decoded.spec();
        let mut samples = SampleBuffer::<i16>::new(decoded.frames() as u64, spec);
        samples.copy_interleaved_ref(decoded);

        let mut bytes = Vec::with_capacity(samples.samples().len() * PCM_BYTES);
        for s in samples.samples() {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        self.info = Some(StreamInfo {
            sample_rate: spec.rate,
            channels: spec.channels.count() as u16,
            bits_per_sample: PCM_BITS,
        });
        Ok(Some(bytes))
    }
}

impl FrameDecoder for SymphoniaFrameDecoder {
    fn process(&mut self, input: &[u8], output: &mut [u8]) -> Result<DecodeStatus> {
        if let Some(pending) = self.pending.take() {
            if pending.bytes.len() > output.len() {
                let needed = pending.bytes.len();
                self.pending = Some(pending);
                return Ok(DecodeStatus::OutputTooSmall { needed });
            }
            output[..pending.bytes.len()].copy_from_slice(&pending.bytes);
            return Ok(DecodeStatus::Frame {
                consumed: pending.consumed,
                decoded: pending.bytes.len(),
            });
        }

        if self.skip_remaining > 0 {
            let n = self.skip_remaining.min(input.len());
            self.skip_remaining -= n;
            return Ok(DecodeStatus::Frame {
                consumed: n,
                decoded: 0,
            });
        }

        match probe_id3v2(input) {
            Id3Probe::Tag(len) => {
                tracing::debug!(tag_bytes = len, "skipping ID3v2 tag");
                let n = len.min(input.len());
                self.skip_remaining = len - n;
                return Ok(DecodeStatus::Frame {
                    consumed: n,
                    decoded: 0,
                });
            }
            Id3Probe::Incomplete => return Ok(DecodeStatus::NeedInput { consumed: 0 }),
            Id3Probe::Absent => {}
        }

        let Some(frame) = self.locate(input) else {
            return Ok(match find_sync(input, |b| self.is_header(b)) {
                Some(pos) => DecodeStatus::Frame {
                    consumed: pos,
                    decoded: 0,
                },
                None => DecodeStatus::NeedInput {
                    consumed: input.len().saturating_sub(SYNC_TAIL),
                },
            });
        };

        if input.len() < frame.frame_len {
            return Ok(DecodeStatus::NeedInput { consumed: 0 });
        }
        let needed = frame.samples_per_frame * usize::from(frame.channels) * PCM_BYTES;
        if output.len() < needed {
            return Ok(DecodeStatus::OutputTooSmall { needed });
        }

        let Some(pcm) = self.decode_frame(input, &frame)? else {
            return Ok(DecodeStatus::Frame {
                consumed: frame.frame_len,
                decoded: 0,
            });
        };
        if pcm.len() > output.len() {
            let needed = pcm.len();
            self.pending = Some(PendingPcm {
                consumed: frame.frame_len,
                bytes: pcm,
            });
            return Ok(DecodeStatus::OutputTooSmall { needed });
        }
        output[..pcm.len()].copy_from_slice(&pcm);
        Ok(DecodeStatus::Frame {
            consumed: frame.frame_len,
            decoded: pcm.len(),
        })
    }

    fn info(&self) -> Option<StreamInfo> {
        self.info
    }

    fn close(&mut self) {
        self.decoder = None;
        self.pending = None;
    }
}

fn channels_for(count: u16) -> Channels {
    match count {
        1 => Channels::FRONT_LEFT,
        2 => Channels::FRONT_LEFT | Channels::FRONT_RIGHT,
        n => {
            let mut channels = Channels::empty();
            for bit in 0..u32::from(n) {
                channels |= Channels::from_bits_truncate(1 << bit);
            }
            channels
        }
    }
}
