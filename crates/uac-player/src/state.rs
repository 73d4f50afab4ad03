//! Cross-worker playback state.
//!
//! The decode stage begins and finishes sessions. The controller (or an external stop)
//! requests a stop, and a device disconnect forces idle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use serde::Serialize;

/// Lifecycle of the single decode session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Playing,
    Stopping,
}

impl PlaybackState {
    fn to_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Playing => 1,
            Self::Stopping => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Playing,
            2 => Self::Stopping,
            _ => Self::Idle,
        }
    }
}

/// Shared handle to the playback state and the current session id.
#[derive(Clone, Debug)]
pub struct SharedState {
    state: Arc<AtomicU8>,
    session: Arc<AtomicU64>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PlaybackState::Idle.to_u8())),
            session: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn get(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_playing(&self) -> bool {
        self.get() == PlaybackState::Playing
    }

    pub fn is_idle(&self) -> bool {
        self.get() == PlaybackState::Idle
    }

    /// Id of the most recently started session (0 before the first one).
    pub fn session_id(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    /// Mark a new session as playing and return its id.
    pub(crate) fn begin_session(&self) -> u64 {
        let id = self.session.fetch_add(1, Ordering::AcqRel) + 1;
        self.state
            .store(PlaybackState::Playing.to_u8(), Ordering::SeqCst);
        id
    }

    /// Playing → Stopping. Returns `false` when nothing was playing.
    pub fn request_stop(&self) -> bool {
        self.state
            .compare_exchange(
                PlaybackState::Playing.to_u8(),
                PlaybackState::Stopping.to_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Session resources are released.
    pub(crate) fn finish_session(&self) {
        self.state.store(PlaybackState::Idle.to_u8(), Ordering::Release);
    }

    /// Used when the output device disappears underneath a session.
    pub fn force_idle(&self) {
        self.state.store(PlaybackState::Idle.to_u8(), Ordering::Release);
    }
}
