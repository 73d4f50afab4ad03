//! Pipeline counters and the periodic diagnostics report.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::pipeline::PipelineHandle;
use crate::state::PlaybackState;
use crate::worker::WorkerHandle;

/// How a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// End of file reached.
    Completed,
    /// Stopped by a new request, an external stop or a device disconnect.
    Stopped,
    /// Aborted by an error after the session began.
    Aborted(String),
}

/// Counters updated by the pipeline stages.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_decoded: AtomicU64,
    frames_written: AtomicU64,
    write_errors: AtomicU64,
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_stopped: AtomicU64,
    sessions_aborted: AtomicU64,
    requests_rejected: AtomicU64,
    requests_dropped: AtomicU64,
    output_buffer_bytes: AtomicUsize,
}

impl PipelineStats {
    pub(crate) fn frame_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_written(&self) {
        self.frames_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn write_failed(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_ended(&self, outcome: &SessionOutcome) {
        let counter = match outcome {
            SessionOutcome::Completed => &self.sessions_completed,
            SessionOutcome::Stopped => &self.sessions_stopped,
            SessionOutcome::Aborted(_) => &self.sessions_aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn request_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn request_dropped(&self) {
        self.requests_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_output_buffer_bytes(&self, bytes: usize) {
        self.output_buffer_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of the pipeline.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineSnapshot {
    pub state: PlaybackState,
    pub session_id: u64,
    pub pending_requests: usize,
    pub frame_queue_depth: usize,
    pub frames_decoded: u64,
    pub frames_written: u64,
    pub write_errors: u64,
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_stopped: u64,
    pub sessions_aborted: u64,
    pub requests_rejected: u64,
    pub requests_dropped: u64,
    pub output_buffer_bytes: usize,
    pub device: Option<String>,
}

impl PipelineSnapshot {
    pub(crate) fn collect(
        stats: &PipelineStats,
        state: PlaybackState,
        session_id: u64,
        pending_requests: usize,
        frame_queue_depth: usize,
        device: Option<String>,
    ) -> Self {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Self {
            state,
            session_id,
            pending_requests,
            frame_queue_depth,
            frames_decoded: load(&stats.frames_decoded),
            frames_written: load(&stats.frames_written),
            write_errors: load(&stats.write_errors),
            sessions_started: load(&stats.sessions_started),
            sessions_completed: load(&stats.sessions_completed),
            sessions_stopped: load(&stats.sessions_stopped),
            sessions_aborted: load(&stats.sessions_aborted),
            requests_rejected: load(&stats.requests_rejected),
            requests_dropped: load(&stats.requests_dropped),
            output_buffer_bytes: stats.output_buffer_bytes.load(Ordering::Relaxed),
            device,
        }
    }
}

/// Log a [`PipelineSnapshot`] every `config.interval` until stopped.
pub fn spawn_monitor(pipeline: PipelineHandle, config: MonitorConfig) -> Result<WorkerHandle> {
    WorkerHandle::spawn("uac-monitor", move |stop| {
        while stop.tick(config.interval) {
            report(&pipeline.snapshot());
        }
    })
}

fn report(s: &PipelineSnapshot) {
    tracing::info!(
        state = ?s.state,
        session = s.session_id,
        pending = s.pending_requests,
        frame_queue = s.frame_queue_depth,
        frames_written = s.frames_written,
        write_errors = s.write_errors,
        output_buffer_bytes = s.output_buffer_bytes,
        device = s.device.as_deref().unwrap_or("-"),
        "pipeline status"
    );
    match serde_json::to_string(s) {
        Ok(json) => tracing::debug!(snapshot = %json, "pipeline snapshot"),
        Err(e) => tracing::debug!(error = %e, "snapshot not serializable"),
    }
}
