//! Per-session byte buffers.
//!
//! One [`FrameBuffers`] set exists per decode session:
//! - `header`: first read of the file, large enough for tags/cover art ahead of audio
//! - `input`: every following read
//! - `carry`: undecoded remainder plus the next read (twice the input size)
//! - `output`: decoded frame target, grown when the decoder asks for more room
//!
//! Allocations are fallible so an exhausted heap aborts the session instead of the process.

use crate::config::PlayerConfig;
use crate::error::{PlayerError, Result};

/// Growable decode target. Growth keeps the existing bytes.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    buf: Vec<u8>,
    limit: usize,
}

impl OutputBuffer {
    fn with_len(len: usize, limit: usize) -> Result<Self> {
        Ok(Self {
            buf: alloc_zeroed(len)?,
            limit,
        })
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Resize to `new_len` bytes and return the new capacity.
    ///
    /// Requests above the configured limit, or that the allocator refuses, fail with
    /// [`PlayerError::OutOfMemory`] and leave the buffer untouched.
    pub fn grow(&mut self, new_len: usize) -> Result<usize> {
        if new_len <= self.buf.len() {
            return Ok(self.buf.len());
        }
        if new_len > self.limit {
            return Err(PlayerError::OutOfMemory { requested: new_len });
        }
        self.buf
            .try_reserve_exact(new_len - self.buf.len())
            .map_err(|_| PlayerError::OutOfMemory { requested: new_len })?;
        self.buf.resize(new_len, 0);
        Ok(self.buf.len())
    }

    fn release(&mut self) {
        self.buf = Vec::new();
    }
}

/// The four buffers owned by one decode session.
#[derive(Debug, Default)]
pub struct FrameBuffers {
    pub(crate) header: Vec<u8>,
    pub(crate) input: Vec<u8>,
    pub(crate) carry: Vec<u8>,
    pub(crate) output: OutputBuffer,
}

/// Buffer sizes reported to diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferSizes {
    pub header: usize,
    pub input: usize,
    pub carry: usize,
    pub output: usize,
}

impl FrameBuffers {
    /// Allocate all four buffers for a new session.
    ///
    /// On failure the buffers allocated so far are dropped before returning.
    pub fn acquire(config: &PlayerConfig) -> Result<Self> {
        let header = alloc_zeroed(config.header_chunk_bytes)?;
        let input = alloc_zeroed(config.input_chunk_bytes)?;
        let carry = alloc_zeroed(config.carry_bytes())?;
        let output = OutputBuffer::with_len(config.initial_output_bytes, config.max_output_bytes)?;
        Ok(Self {
            header,
            input,
            carry,
            output,
        })
    }

    /// Grow the output buffer; see [`OutputBuffer::grow`].
    pub fn grow_output(&mut self, new_len: usize) -> Result<usize> {
        self.output.grow(new_len)
    }

    /// Free every buffer. Calling it again is a no-op.
    pub fn release(&mut self) {
        self.header = Vec::new();
        self.input = Vec::new();
        self.carry = Vec::new();
        self.output.release();
    }

    pub fn is_released(&self) -> bool {
        self.header.capacity() == 0
            && self.input.capacity() == 0
            && self.carry.capacity() == 0
            && self.output.buf.capacity() == 0
    }

    pub fn sizes(&self) -> BufferSizes {
        BufferSizes {
            header: self.header.len(),
            input: self.input.len(),
            carry: self.carry.len(),
            output: self.output.len(),
        }
    }
}

fn alloc_zeroed(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| PlayerError::OutOfMemory { requested: len })?;
    buf.resize(len, 0);
    Ok(buf)
}
