//! CPAL-backed [`OutputDevice`].
//!
//! `cpal::Stream` is not `Send` on every host, so one dedicated thread owns the device and
//! its current stream. Writers talk to it through a command channel and then push samples
//! into the stream's [`SampleQueue`] directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use cpal::traits::StreamTrait;
use crossbeam_channel::{Receiver, Sender, bounded};

use crate::device;
use crate::error::{PlayerError, Result};
use crate::output::{DeviceEvent, OutputDevice, PcmFormat};
use crate::pipeline::PipelineHandle;
use crate::playback::{self, OutputGain};
use crate::queue::{PushOutcome, SampleQueue, capacity_for};
use crate::worker::{WorkerHandle, spawn_named};

/// Seconds of audio buffered between writers and the callback.
const QUEUE_SECONDS: f32 = 0.5;
/// Upper bound on waiting for the old stream to play out before a format switch.
const DRAIN_BEFORE_REOPEN: Duration = Duration::from_millis(750);

enum StreamCommand {
    Open {
        format: PcmFormat,
        reply: Sender<Result<Arc<SampleQueue>>>,
    },
    Shutdown,
}

struct ActiveStream {
    format: PcmFormat,
    queue: Arc<SampleQueue>,
}

pub struct CpalSink {
    name: String,
    commands: Sender<StreamCommand>,
    gain: Arc<OutputGain>,
    active: Mutex<Option<ActiveStream>>,
    lost: Arc<AtomicBool>,
}

impl CpalSink {
    /// Open the output device matching `needle` (or the default device) and start a stream
    /// in `format`. A later [`OutputDevice::write`] with a different format reopens it.
    ///
    /// `events` receives [`DeviceEvent::Disconnected`] if the device goes away.
    pub fn open(
        needle: Option<&str>,
        format: PcmFormat,
        volume: u8,
        events: Sender<DeviceEvent>,
    ) -> Result<Arc<Self>> {
        let (commands, command_rx) = bounded(4);
        let (ready_tx, ready_rx) = bounded(1);
        let gain = Arc::new(OutputGain::new(volume, false));
        let lost = Arc::new(AtomicBool::new(false));

        let worker = StreamWorker {
            needle: needle.map(str::to_string),
            gain: gain.clone(),
            lost: lost.clone(),
            events,
        };
        spawn_named("uac-stream", move || worker.run(command_rx, ready_tx))?;
        let name = ready_rx.recv().map_err(|_| PlayerError::Closed)??;

        let sink = Arc::new(Self {
            name,
            commands,
            gain,
            active: Mutex::new(None),
            lost,
        });
        sink.queue_for(format)?;
        Ok(sink)
    }

    /// Wait for buffered samples to play out. Returns `true` when the queue drained.
    pub fn drain(&self, timeout: Duration) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active
            .as_ref()
            .map(|a| a.queue.wait_drained(timeout))
            .unwrap_or(true)
    }

    fn queue_for(&self, format: PcmFormat) -> Result<Arc<SampleQueue>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = active.as_ref() {
            if current.format == format && !current.queue.is_closed() {
                return Ok(current.queue.clone());
            }
            current.queue.wait_drained(DRAIN_BEFORE_REOPEN);
        }

        let (reply, reply_rx) = bounded(1);
        self.commands
            .send(StreamCommand::Open { format, reply })
            .map_err(|_| PlayerError::Closed)?;
        let queue = reply_rx.recv().map_err(|_| PlayerError::Closed)??;
        *active = Some(ActiveStream {
            format,
            queue: queue.clone(),
        });
        Ok(queue)
    }
}

impl OutputDevice for CpalSink {
    fn write(&self, pcm: &[u8], format: PcmFormat, timeout: Option<Duration>) -> Result<()> {
        if self.lost.load(Ordering::Acquire) {
            return Err(PlayerError::Device(format!("{} is no longer available", self.name)));
        }
        if format.bits != 16 {
            return Err(PlayerError::Device(format!(
                "unsupported sample width: {} bit",
                format.bits
            )));
        }
        let queue = self.queue_for(format)?;
        let samples = pcm16_to_f32(pcm);
        let deadline = timeout.map(|t| Instant::now() + t);
        match queue.push_until(&samples, deadline) {
            PushOutcome::Complete => Ok(()),
            PushOutcome::TimedOut { pushed } => Err(PlayerError::Device(format!(
                "write timed out after {pushed} of {} samples",
                samples.len()
            ))),
            PushOutcome::Closed { .. } => {
                Err(PlayerError::Device("output stream closed".into()))
            }
        }
    }

    fn set_volume(&self, volume: u8) -> Result<()> {
        self.gain.set_volume(volume);
        Ok(())
    }

    fn volume(&self) -> Result<u8> {
        Ok(self.gain.volume())
    }

    fn set_mute(&self, muted: bool) -> Result<()> {
        self.gain.set_muted(muted);
        Ok(())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        let _ = self.commands.send(StreamCommand::Shutdown);
    }
}

struct StreamWorker {
    needle: Option<String>,
    gain: Arc<OutputGain>,
    lost: Arc<AtomicBool>,
    events: Sender<DeviceEvent>,
}

impl StreamWorker {
    fn run(self, commands: Receiver<StreamCommand>, ready: Sender<Result<String>>) {
        let host = cpal::default_host();
        let device = match device::pick_device(&host, self.needle.as_deref()) {
            Ok(d) => d,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let name = device::device_name(&device).unwrap_or_else(|| "output".to_string());
        let _ = ready.send(Ok(name));

        let mut current: Option<(cpal::Stream, Arc<SampleQueue>)> = None;
        for command in commands.iter() {
            match command {
                StreamCommand::Open { format, reply } => {
                    if let Some((stream, queue)) = current.take() {
                        queue.close();
                        drop(stream);
                    }
                    let result = self.open_stream(&device, format).map(|(stream, queue)| {
                        current = Some((stream, queue.clone()));
                        queue
                    });
                    let _ = reply.send(result);
                }
                StreamCommand::Shutdown => break,
            }
        }
        if let Some((_, queue)) = current {
            queue.close();
        }
        tracing::debug!("stream thread exiting");
    }

    fn open_stream(
        &self,
        device: &cpal::Device,
        format: PcmFormat,
    ) -> Result<(cpal::Stream, Arc<SampleQueue>)> {
        let supported = device::pick_output_config(device, format)?;
        let mut config: cpal::StreamConfig = supported.clone().into();
        if let Some(buf) = device::pick_buffer_size(&supported) {
            config.buffer_size = buf;
        }
        let channels = usize::from(format.channels);
        let queue = Arc::new(SampleQueue::new(
            channels,
            capacity_for(format.sample_rate, channels, QUEUE_SECONDS),
        ));

        let on_error = {
            let lost = self.lost.clone();
            let events = self.events.clone();
            let queue = queue.clone();
            move |err: cpal::StreamError| match err {
                cpal::StreamError::DeviceNotAvailable => {
                    if !lost.swap(true, Ordering::AcqRel) {
                        tracing::warn!("output device disappeared");
                        queue.close();
                        let _ = events.try_send(DeviceEvent::Disconnected);
                    }
                }
                other => tracing::warn!(error = %other, "stream error"),
            }
        };

        let stream = playback::build_output_stream(
            device,
            &config,
            supported.sample_format(),
            &queue,
            &self.gain,
            on_error,
        )?;
        stream
            .play()
            .map_err(|e| PlayerError::Device(e.to_string()))?;
        tracing::info!(
            source = %format,
            device_channels = config.channels,
            sample_format = ?supported.sample_format(),
            buffer = ?config.buffer_size,
            "output stream opened"
        );
        Ok((stream, queue))
    }
}

/// Keep an output device attached to `pipeline`.
///
/// Whenever the port is empty (at startup or after a disconnect) the device matching
/// `needle` is opened with [`PcmFormat::DEFAULT`] and announced as
/// [`DeviceEvent::Connected`]. Retries every `interval`.
pub fn spawn_reconnect(
    pipeline: PipelineHandle,
    needle: Option<String>,
    volume: u8,
    interval: Duration,
) -> Result<WorkerHandle> {
    WorkerHandle::spawn("uac-reconnect", move |stop| {
        let mut failures = 0u32;
        loop {
            if !pipeline.port().is_connected() {
                match CpalSink::open(
                    needle.as_deref(),
                    PcmFormat::DEFAULT,
                    volume,
                    pipeline.device_events(),
                ) {
                    Ok(sink) => {
                        failures = 0;
                        if pipeline
                            .device_events()
                            .send(DeviceEvent::Connected(sink))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        if failures == 0 {
                            tracing::warn!(error = %e, "output device unavailable; retrying");
                        } else {
                            tracing::debug!(error = %e, attempt = failures + 1, "output device unavailable");
                        }
                        failures = failures.saturating_add(1);
                    }
                }
            }
            if !stop.tick(interval) {
                break;
            }
        }
        tracing::debug!("reconnect worker exiting");
    })
}

/// Interleaved signed 16-bit little-endian PCM to `f32` in [-1.0, 1.0).
fn pcm16_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32_768.0)
        .collect()
}
