//! Error taxonomy shared by every pipeline stage.
//!
//! Session-level errors are handled inside the decode stage (the session is torn down
//! and the pipeline returns to idle); none of them terminate a worker loop.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the playback pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// File extension is not a supported audio format; rejected before session start.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Open/read failure on storage.
    #[error("io error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Decoder open/process failure that is not "output buffer too small".
    #[error("decoder error: {0}")]
    Decoder(String),

    /// Buffer allocation or growth could not be satisfied.
    #[error("out of memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    /// A control handoff was not accepted within its wait window.
    #[error("queue timeout after {0:?}")]
    QueueTimeout(Duration),

    /// Output device write/volume/mute failure.
    #[error("device error: {0}")]
    Device(String),

    /// No output device is currently attached.
    #[error("no output device connected")]
    NotConnected,

    /// Resume pointer save/load failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Worker thread could not be started.
    #[error("failed to spawn worker {name}: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A pipeline queue was disconnected (process shutting down).
    #[error("pipeline queue closed")]
    Closed,
}

impl PlayerError {
    /// Wrap an IO error with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True for errors raised by the output device (including a missing device).
    pub fn is_device(&self) -> bool {
        matches!(self, Self::Device(_) | Self::NotConnected)
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_keeps_context_in_message() {
        let err = PlayerError::io(
            "open /media/a.mp3",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/media/a.mp3"));
        assert!(msg.contains("gone"));
    }

    #[test]
    fn device_category_includes_not_connected() {
        assert!(PlayerError::NotConnected.is_device());
        assert!(PlayerError::Device("usb stall".into()).is_device());
        assert!(!PlayerError::Decoder("bad".into()).is_device());
    }
}
