//! # PCM Accumulator
//!
//! Bounded byte buffer between the codec and the output buffers. Planar
//! float blocks go in, 16-bit little-endian interleaved PCM comes out in
//! whatever chunk size the consumer asks for.
//!
//! The buffer never grows past its capacity: an append that would not fit is
//! an [`PlaybackError::AccumulatorOverflow`], not a reallocation.

use crate::error::{PlaybackError, Result};
use crate::traits::PcmBlock;
use bytes::{BufMut, Bytes, BytesMut};

/// Result of a [`PcmAccumulator::pull`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pulled {
    pub data: Bytes,
    /// Set when the pull came up short because upstream has no more data.
    pub upstream_exhausted: bool,
}

/// Float-to-16-bit converting PCM buffer with a fixed capacity.
#[derive(Debug)]
pub struct PcmAccumulator {
    buf: BytesMut,
    capacity: usize,
    written: u64,
    read: u64,
    exhausted: bool,
}

impl PcmAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            written: 0,
            read: 0,
            exhausted: false,
        }
    }

    /// Convert and append one block.
    ///
    /// Returns the number of bytes appended. Nothing is written when the
    /// block does not fit or has planes of unequal length.
    pub fn append(&mut self, block: &PcmBlock) -> Result<usize> {
        if block.is_ragged() {
            return Err(PlaybackError::Codec(format!(
                "decoded block has planes of unequal length ({} channels)",
                block.channels()
            )));
        }

        let needed = block.interleaved_bytes();
        if self.buf.len() + needed > self.capacity {
            return Err(PlaybackError::AccumulatorOverflow {
                requested: needed,
                buffered: self.buf.len(),
                capacity: self.capacity,
            });
        }

        let planes = block.planes();
        for frame in 0..block.frames() {
            for plane in planes {
                self.buf.put_i16_le(to_i16(plane[frame]));
            }
        }
        self.written += needed as u64;
        Ok(needed)
    }

    /// Take up to `n` bytes from the front.
    ///
    /// A short read returns what is there, flagged with whether upstream has
    /// been marked exhausted.
    pub fn pull(&mut self, n: usize) -> Pulled {
        let take = n.min(self.buf.len());
        let data = self.buf.split_to(take).freeze();
        self.read += take as u64;
        Pulled {
            data,
            upstream_exhausted: take < n && self.exhausted,
        }
    }

    /// Unread bytes.
    pub fn available(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free space before the next append overflows.
    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Record that no more blocks will be appended.
    pub fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// `true` once upstream is exhausted and every byte has been pulled.
    pub fn is_drained(&self) -> bool {
        self.exhausted && self.buf.is_empty()
    }

    /// Total bytes ever appended (the write cursor).
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Total bytes ever pulled (the read cursor).
    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    /// Discard content, cursors and the exhausted flag.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.written = 0;
        self.read = 0;
        self.exhausted = false;
    }
}

/// Scale to 16-bit with hard clipping. NaN maps to silence.
fn to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample * 32767.0).round().clamp(-32768.0, 32767.0) as i16
}
