//! Decode stage: one session per request, streaming the file through the decoder in
//! bounded chunks.
//!
//! Per chunk: fill (header read first, input reads after that, appended to the carry-over),
//! decode while more than the minimum threshold remains, then carry the remainder to the
//! front of the carry-over buffer. Stop requests are honoured before every frame push and
//! after every chunk.

use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use super::{DecodedFrame, Shared};
use crate::buffers::{FrameBuffers, OutputBuffer};
use crate::decoder::{DecodeStatus, DecoderFactory, FrameDecoder};
use crate::error::{PlayerError, Result};
use crate::monitor::SessionOutcome;
use crate::output::PcmFormat;
use crate::storage::Storage;
use crate::track::{AudioFormat, PlaybackRequest, TrackReference};

pub(super) struct DecodeStage {
    shared: Arc<Shared>,
    storage: Arc<dyn Storage>,
    decoders: Arc<dyn DecoderFactory>,
    frames: Sender<DecodedFrame>,
    recycle: Receiver<Vec<u8>>,
}

/// Resources and progress of the running session.
struct Session {
    id: u64,
    track: TrackReference,
    decoder: Box<dyn FrameDecoder>,
    reader: Box<dyn Read + Send>,
    buffers: FrameBuffers,
    consumed: u64,
    discarded: usize,
    frames: u64,
}

/// How far one chunk got.
struct ChunkProgress {
    consumed: usize,
    stopped: bool,
}

impl DecodeStage {
    pub(super) fn new(
        shared: Arc<Shared>,
        storage: Arc<dyn Storage>,
        decoders: Arc<dyn DecoderFactory>,
        frames: Sender<DecodedFrame>,
        recycle: Receiver<Vec<u8>>,
    ) -> Self {
        Self {
            shared,
            storage,
            decoders,
            frames,
            recycle,
        }
    }

    pub(super) fn run(self, control: Receiver<PlaybackRequest>) {
        for request in control.iter() {
            self.handle(request);
        }
        tracing::debug!("decode stage exiting");
    }

    fn handle(&self, request: PlaybackRequest) {
        let track = request.track;
        if self.shared.is_closing() {
            self.shared.stats.request_dropped();
            self.shared.release_pending();
            tracing::debug!(path = %track, "request dropped: shutting down");
            return;
        }
        let (format, decoder, reader, buffers) = match self.open(&track) {
            Ok(parts) => parts,
            Err(e) => {
                self.shared.stats.request_rejected();
                self.shared.release_pending();
                tracing::warn!(path = %track, error = %e, "request rejected");
                return;
            }
        };

        let id = self.shared.state.begin_session();
        if self.shared.is_closing() {
            self.shared.state.request_stop();
        }
        self.shared.release_pending();
        self.shared.stats.session_started();
        tracing::info!(session = id, path = %track, format = format.name(), "session started");
        self.restore_output();

        let mut session = Session {
            id,
            track,
            decoder,
            reader,
            buffers,
            consumed: 0,
            discarded: 0,
            frames: 0,
        };
        let result = self.stream(&mut session);
        self.finish(session, result);
    }

    /// Everything that can fail before a session exists. Whatever was opened is closed
    /// again on failure.
    fn open(
        &self,
        track: &TrackReference,
    ) -> Result<(
        AudioFormat,
        Box<dyn FrameDecoder>,
        Box<dyn Read + Send>,
        FrameBuffers,
    )> {
        let format = track
            .format()
            .ok_or_else(|| PlayerError::UnsupportedFormat(track.to_string()))?;
        let mut decoder = self.decoders.open(format)?;
        let reader = match self.storage.open(track.as_path()) {
            Ok(r) => r,
            Err(e) => {
                decoder.close();
                return Err(PlayerError::io(format!("open {track}"), e));
            }
        };
        let buffers = match FrameBuffers::acquire(&self.shared.config) {
            Ok(b) => b,
            Err(e) => {
                decoder.close();
                return Err(e);
            }
        };
        self.shared.stats.set_output_buffer_bytes(buffers.output.len());
        Ok((format, decoder, reader, buffers))
    }

    fn restore_output(&self) {
        let port = &self.shared.port;
        if let Err(e) = port
            .set_volume(self.shared.config.volume)
            .and_then(|_| port.set_mute(false))
        {
            tracing::debug!(error = %e, "output not restored");
        }
    }

    fn stream(&self, s: &mut Session) -> Result<SessionOutcome> {
        let cfg = &self.shared.config;
        let FrameBuffers {
            header,
            input,
            carry,
            output,
        } = &mut s.buffers;

        let mut remainder = 0usize;
        let mut first = true;
        loop {
            // Fill.
            let from_header = first;
            first = false;
            let (len, eof) = if from_header {
                let n = read_chunk(&mut s.reader, header, &s.track)?;
                (n, n < header.len())
            } else {
                let n = read_chunk(&mut s.reader, input, &s.track)?;
                carry[remainder..remainder + n].copy_from_slice(&input[..n]);
                (remainder + n, n < input.len())
            };
            let work: &[u8] = if from_header {
                &header[..len]
            } else {
                &carry[..len]
            };

            // Decode.
            let progress =
                self.decode_chunk(s.id, &mut *s.decoder, output, work, eof, &mut s.frames)?;
            s.consumed += progress.consumed as u64;
            let rest = len - progress.consumed;

            if progress.stopped {
                s.discarded = rest;
                return Ok(SessionOutcome::Stopped);
            }
            if eof {
                if rest > 0 {
                    tracing::debug!(session = s.id, bytes = rest, "trailing bytes discarded");
                    s.discarded = rest;
                }
                return Ok(SessionOutcome::Completed);
            }

            // Carry.
            if rest > cfg.input_chunk_bytes {
                return Err(PlayerError::Decoder(format!(
                    "{rest} undecoded bytes do not fit the carry-over buffer"
                )));
            }
            if from_header {
                carry[..rest].copy_from_slice(&header[progress.consumed..len]);
            } else {
                carry.copy_within(progress.consumed..len, 0);
            }
            remainder = rest;

            if !self.shared.state.is_playing() {
                s.discarded = rest;
                return Ok(SessionOutcome::Stopped);
            }
        }
    }

    fn decode_chunk(
        &self,
        id: u64,
        decoder: &mut dyn FrameDecoder,
        output: &mut OutputBuffer,
        work: &[u8],
        eof: bool,
        frames: &mut u64,
    ) -> Result<ChunkProgress> {
        let threshold = if eof { 0 } else { self.shared.config.min_decode_bytes };
        let mut pos = 0usize;

        while work.len() - pos > threshold {
            if !self.shared.state.is_playing() {
                return Ok(ChunkProgress {
                    consumed: pos,
                    stopped: true,
                });
            }
            let available = work.len() - pos;
            match decoder.process(&work[pos..], output.as_mut_slice())? {
                DecodeStatus::Frame { consumed, decoded } => {
                    if consumed > available || decoded > output.len() {
                        return Err(PlayerError::Decoder(format!(
                            "decoder reported {consumed}/{decoded} bytes for {available}/{} available",
                            output.len()
                        )));
                    }
                    if consumed == 0 {
                        if decoded > 0 {
                            return Err(PlayerError::Decoder(format!(
                                "decoder produced {decoded} bytes without consuming input"
                            )));
                        }
                        break;
                    }
                    pos += consumed;
                    if decoded > 0 {
                        let format = decoder
                            .info()
                            .map(PcmFormat::from)
                            .unwrap_or(PcmFormat::DEFAULT);
                        if !self.emit(id, format, &output.as_slice()[..decoded])? {
                            return Ok(ChunkProgress {
                                consumed: pos,
                                stopped: true,
                            });
                        }
                        *frames += 1;
                    }
                }
                DecodeStatus::NeedInput { consumed } => {
                    pos += consumed.min(available);
                    break;
                }
                DecodeStatus::OutputTooSmall { needed } => {
                    if needed <= output.len() {
                        return Err(PlayerError::Decoder(format!(
                            "decoder asked for {needed} output bytes with {} available",
                            output.len()
                        )));
                    }
                    let len = output.grow(needed)?;
                    self.shared.stats.set_output_buffer_bytes(len);
                    tracing::debug!(session = id, bytes = len, "frame buffer grown");
                }
            }
        }
        Ok(ChunkProgress {
            consumed: pos,
            stopped: false,
        })
    }

    /// Push one frame unless the session is no longer playing. Returns `false` when the
    /// frame was withheld.
    fn emit(&self, id: u64, format: PcmFormat, pcm: &[u8]) -> Result<bool> {
        if !self.shared.state.is_playing() {
            return Ok(false);
        }
        let mut buf = self.recycle.try_recv().unwrap_or_default();
        buf.clear();
        buf.try_reserve(pcm.len())
            .map_err(|_| PlayerError::OutOfMemory {
                requested: pcm.len(),
            })?;
        buf.extend_from_slice(pcm);
        self.frames
            .send(DecodedFrame {
                session: id,
                format,
                pcm: buf,
            })
            .map_err(|_| PlayerError::Closed)?;
        self.shared.stats.frame_decoded();
        Ok(true)
    }

    fn finish(&self, mut s: Session, result: Result<SessionOutcome>) {
        let cfg = &self.shared.config;
        let outcome = result.unwrap_or_else(|e| {
            tracing::warn!(session = s.id, path = %s.track, error = %e, "session aborted");
            SessionOutcome::Aborted(e.to_string())
        });

        if let Some(info) = s.decoder.info() {
            tracing::info!(
                session = s.id,
                sample_rate = info.sample_rate,
                channels = info.channels,
                bits = info.bits_per_sample,
                "stream info"
            );
        }
        s.decoder.close();
        s.buffers.release();
        self.shared.stats.set_output_buffer_bytes(0);

        if matches!(outcome, SessionOutcome::Aborted(_)) {
            if let Err(e) = self.shared.port.set_mute(true) {
                tracing::debug!(error = %e, "mute failed");
            }
        }
        self.wait_frames_drained(cfg.settle_delay);
        thread::sleep(cfg.settle_delay);

        tracing::info!(
            session = s.id,
            path = %s.track,
            consumed = s.consumed,
            discarded = s.discarded,
            frames = s.frames,
            outcome = ?outcome,
            "session finished"
        );
        self.shared.stats.session_ended(&outcome);
        self.shared.state.finish_session();
    }

    fn wait_frames_drained(&self, bound: Duration) {
        let deadline = Instant::now() + bound;
        while !self.frames.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Read until `buf` is full or the reader reports end of file.
fn read_chunk(reader: &mut dyn Read, buf: &mut [u8], track: &TrackReference) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(PlayerError::io(format!("read {track}"), e)),
        }
    }
    Ok(filled)
}
