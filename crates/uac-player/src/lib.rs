//! Storage-to-USB-audio playback pipeline.
//!
//! [`pipeline::Pipeline`] runs the controller, decode and output stages. The
//! [`advance`] worker picks tracks from a directory and resumes after restarts, and the
//! [`skip`] trigger turns sensor touches into skips.

pub mod advance;
pub mod buffers;
pub mod codec;
pub mod config;
pub mod decoder;
pub mod device;
pub mod error;
mod framing;
pub mod monitor;
pub mod output;
pub mod persist;
pub mod pipeline;
pub mod playback;
pub mod queue;
pub mod sink;
pub mod skip;
pub mod state;
pub mod storage;
pub mod track;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{PlayerError, Result};
