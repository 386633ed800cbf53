//! # Streaming Configuration
//!
//! Configuration types for the streaming playback controller.

use crate::error::{PlaybackError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Streaming controller configuration.
///
/// Controls the output buffer ring, the decode-side accumulator, source read
/// sizes and feeder pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Number of output buffers cycling between the feeder and the voice.
    ///
    /// More buffers cost memory but lower the risk of underrun when the
    /// feeder is delayed.
    ///
    /// Default: 4.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,

    /// Size of one output buffer in bytes.
    ///
    /// Default: 16 KB (~93ms of 44.1kHz stereo).
    #[serde(default = "default_buffer_bytes")]
    pub buffer_bytes: usize,

    /// Capacity of the PCM accumulator in bytes.
    ///
    /// Must hold one output buffer plus the largest decoded packet.
    ///
    /// Default: 256 KB.
    #[serde(default = "default_accumulator_capacity")]
    pub accumulator_capacity: usize,

    /// Number of bytes requested from the byte source per read.
    ///
    /// Default: 4 KB.
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,

    /// Feeder pause between cycles, in milliseconds.
    ///
    /// Default: 10ms.
    #[serde(default = "default_feed_interval_ms")]
    pub feed_interval_ms: u64,

    /// Retries after a failed source read before the stream fails.
    ///
    /// Default: 1.
    #[serde(default = "default_io_retries")]
    pub io_retries: u32,

    /// Whether playback restarts from the beginning at end of stream.
    ///
    /// Default: false.
    #[serde(default)]
    pub looping: bool,

    /// Output gain applied when the controller is created (0.0-1.0).
    ///
    /// Default: 1.0.
    #[serde(default = "default_initial_volume")]
    pub initial_volume: f32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
            buffer_bytes: default_buffer_bytes(),
            accumulator_capacity: default_accumulator_capacity(),
            read_chunk_bytes: default_read_chunk_bytes(),
            feed_interval_ms: default_feed_interval_ms(),
            io_retries: default_io_retries(),
            looping: false,
            initial_volume: default_initial_volume(),
        }
    }
}

impl StreamingConfig {
    /// Create a configuration optimized for low latency.
    ///
    /// - Small buffers (4 KB)
    /// - Short feeder interval
    pub fn low_latency() -> Self {
        Self {
            ring_capacity: 6,
            buffer_bytes: 4 * 1024,
            accumulator_capacity: 64 * 1024,
            feed_interval_ms: 2,
            ..Default::default()
        }
    }

    /// Create a configuration optimized for stability.
    ///
    /// - More, larger buffers
    /// - Bigger source reads
    pub fn high_quality() -> Self {
        Self {
            ring_capacity: 8,
            buffer_bytes: 64 * 1024,
            accumulator_capacity: 1024 * 1024,
            read_chunk_bytes: 16 * 1024,
            feed_interval_ms: 20,
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PlaybackError::InvalidConfig(e.to_string()))?;
        config.validate().map_err(PlaybackError::InvalidConfig)?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.ring_capacity == 0 {
            return Err("ring_capacity must be > 0".to_string());
        }

        if self.buffer_bytes == 0 {
            return Err("buffer_bytes must be > 0".to_string());
        }

        if self.buffer_bytes % 2 != 0 {
            return Err("buffer_bytes must be a whole number of samples".to_string());
        }

        if self.accumulator_capacity < self.buffer_bytes {
            return Err("accumulator_capacity cannot be smaller than buffer_bytes".to_string());
        }

        if self.read_chunk_bytes == 0 {
            return Err("read_chunk_bytes must be > 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.initial_volume) {
            return Err("initial_volume must be between 0.0 and 1.0".to_string());
        }

        Ok(())
    }

    /// Feeder pause between cycles.
    pub fn feed_interval(&self) -> Duration {
        Duration::from_millis(self.feed_interval_ms)
    }

    /// Bytes held by the whole ring when every buffer is full.
    pub fn ring_bytes(&self) -> usize {
        self.ring_capacity * self.buffer_bytes
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_ring_capacity() -> usize {
    4
}

fn default_buffer_bytes() -> usize {
    16 * 1024
}

fn default_accumulator_capacity() -> usize {
    256 * 1024
}

fn default_read_chunk_bytes() -> usize {
    4 * 1024
}

fn default_feed_interval_ms() -> u64 {
    10
}

fn default_io_retries() -> u32 {
    1
}

fn default_initial_volume() -> f32 {
    1.0
}

// ============================================================================
// Playback State
// ============================================================================

/// Current state of the streaming controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    /// No feeder running, every buffer free.
    Stopped,
    /// Feeder running, voice playing.
    Playing,
    /// Feeder parked, buffers still queued on the voice.
    Paused,
}

impl PlaybackState {
    /// Returns `true` if a feeder thread exists in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Playing | Self::Paused)
    }
}

/// Counters describing one controller's feeding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingStats {
    /// Buffers handed to the voice.
    pub chunks_queued: u64,
    /// PCM bytes handed to the voice.
    pub bytes_queued: u64,
    /// Times the stream restarted because looping was on.
    pub loops_completed: u64,
    /// Times the voice ran dry while the controller was playing.
    pub underruns: u64,
}

impl StreamingStats {
    /// Average bytes per queued buffer.
    pub fn average_chunk_bytes(&self) -> f64 {
        if self.chunks_queued == 0 {
            return 0.0;
        }
        self.bytes_queued as f64 / self.chunks_queued as f64
    }
}
