//! Playback pipeline wiring.
//!
//! ```text
//! submit ─▶ [request q] ─▶ controller ─▶ [control q] ─▶ decode stage ─▶ [frame q] ─▶ output stage
//!                           (fade/stop)                      ▲                          │
//!                                                            └──── [recycle q] ◀────────┘
//! ```
//!
//! All queues are bounded. A shared [`PlaybackState`] and a pending-request counter tell the
//! periodic workers whether the pipeline is busy.

mod controller;
mod decode_stage;
mod device_events;
mod output_stage;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, bounded};

use crate::config::PlayerConfig;
use crate::decoder::DecoderFactory;
use crate::error::{PlayerError, Result};
use crate::monitor::{PipelineSnapshot, PipelineStats};
use crate::output::{DeviceEvent, OutputPort, PcmFormat};
use crate::state::{PlaybackState, SharedState};
use crate::storage::Storage;
use crate::track::PlaybackRequest;
use crate::worker::spawn_named;

/// One decoded frame in flight between the decode and output stages.
#[derive(Debug)]
pub struct DecodedFrame {
    pub session: u64,
    pub format: PcmFormat,
    pub pcm: Vec<u8>,
}

/// State shared by every stage.
pub(crate) struct Shared {
    pub(crate) config: PlayerConfig,
    pub(crate) state: SharedState,
    pub(crate) pending: AtomicUsize,
    pub(crate) stats: PipelineStats,
    pub(crate) port: OutputPort,
    closing: AtomicBool,
}

impl Shared {
    pub(crate) fn new(config: PlayerConfig, port: OutputPort) -> Self {
        Self {
            config,
            state: SharedState::new(),
            pending: AtomicUsize::new(0),
            stats: PipelineStats::default(),
            port,
            closing: AtomicBool::new(false),
        }
    }

    /// Set once the pipeline is shutting down; no new session starts after this.
    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.state.request_stop();
    }

    /// A request left the pipeline's hands (started, rejected or dropped).
    pub(crate) fn release_pending(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Cloneable handle used to submit requests and observe the pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
    requests: Sender<PlaybackRequest>,
    frames: Receiver<DecodedFrame>,
    device_events: Sender<DeviceEvent>,
}

impl PipelineHandle {
    /// Queue a request. The controller fades out whatever is playing before the decode
    /// stage picks it up.
    pub fn submit(&self, request: PlaybackRequest) -> Result<()> {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        let timeout = self.shared.config.forward_timeout;
        match self.requests.send_timeout(request, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                self.shared.release_pending();
                self.shared.stats.request_dropped();
                Err(PlayerError::QueueTimeout(timeout))
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                self.shared.release_pending();
                Err(PlayerError::Closed)
            }
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state.get()
    }

    pub fn session_id(&self) -> u64 {
        self.shared.state.session_id()
    }

    /// Requests submitted but not yet started or rejected by the decode stage.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.state() != PlaybackState::Idle || self.pending() > 0
    }

    /// Stop the current session without starting another. Returns `false` when nothing
    /// was playing.
    pub fn stop(&self) -> bool {
        if !self.shared.state.is_playing() {
            return false;
        }
        controller::fade_out(&self.shared);
        true
    }

    pub fn port(&self) -> &OutputPort {
        &self.shared.port
    }

    /// Sender for connect/disconnect notifications.
    pub fn device_events(&self) -> Sender<DeviceEvent> {
        self.device_events.clone()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.shared.stats
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot::collect(
            &self.shared.stats,
            self.state(),
            self.session_id(),
            self.pending(),
            self.frames.len(),
            self.shared.port.device_name(),
        )
    }

    /// Block until the pipeline is idle with nothing pending. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        while self.is_busy() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

/// The running pipeline. Dropping it stops the current session and joins every stage.
pub struct Pipeline {
    handle: PipelineHandle,
    shutdown: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn spawn(
        config: PlayerConfig,
        storage: Arc<dyn Storage>,
        decoders: Arc<dyn DecoderFactory>,
        port: OutputPort,
    ) -> Result<Self> {
        let cap = config.queue_capacity.max(1);
        let (request_tx, request_rx) = bounded::<PlaybackRequest>(cap);
        let (control_tx, control_rx) = bounded::<PlaybackRequest>(cap);
        let (frame_tx, frame_rx) = bounded::<DecodedFrame>(cap);
        let (recycle_tx, recycle_rx) = bounded::<Vec<u8>>(cap + 1);
        let (event_tx, event_rx) = bounded::<DeviceEvent>(cap);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let shared = Arc::new(Shared::new(config, port));
        let handle = PipelineHandle {
            shared: shared.clone(),
            requests: request_tx,
            frames: frame_rx.clone(),
            device_events: event_tx,
        };

        let mut pipeline = Self {
            handle,
            shutdown: Some(shutdown_tx),
            workers: Vec::with_capacity(4),
        };

        let output = {
            let shared = shared.clone();
            spawn_named("uac-output", move || {
                output_stage::run(&shared, frame_rx, recycle_tx)
            })?
        };
        pipeline.workers.push(output);

        let decode = decode_stage::DecodeStage::new(shared.clone(), storage, decoders, frame_tx, recycle_rx);
        pipeline
            .workers
            .push(spawn_named("uac-decode", move || decode.run(control_rx))?);

        let controller = {
            let shared = shared.clone();
            let shutdown = shutdown_rx.clone();
            spawn_named("uac-control", move || {
                controller::run(&shared, request_rx, control_tx, shutdown)
            })?
        };
        pipeline.workers.push(controller);

        let events = spawn_named("uac-device-events", move || {
            device_events::run(&shared, event_rx, shutdown_rx)
        })?;
        pipeline.workers.push(events);

        tracing::info!(queue_capacity = cap, "pipeline started");
        Ok(pipeline)
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Stop the current session and join every stage. Same as dropping the pipeline.
    pub fn shutdown(self) {}

    fn stop_workers(&mut self) {
        if self.shutdown.take().is_none() {
            return;
        }
        self.handle.shared.close();
        for worker in self.workers.drain(..).rev() {
            if worker.join().is_err() {
                tracing::warn!("pipeline worker panicked");
            }
        }
        tracing::info!("pipeline stopped");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop_workers();
    }
}
