//! Playback bridge traits and supporting audio types.
//!
//! These abstractions allow the core streaming controller to drive a
//! platform-specific audio output (OpenAL source, CoreAudio queue, software
//! mixer) through one buffer-queue contract. Host applications are expected to
//! provide concrete implementations that satisfy their platform constraints.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Layout of the PCM bytes carried by an [`OutputBuffer`].
///
/// Samples are signed, little-endian and interleaved in channel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    /// Number of interleaved channels.
    pub channels: u16,
    /// Sample rate in hertz.
    pub sample_rate: u32,
    /// Bits per sample. The streaming core always produces 16.
    pub bits_per_sample: u16,
}

impl PcmFormat {
    /// 16-bit interleaved PCM with the given channel count and rate.
    pub fn s16(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            bits_per_sample: 16,
        }
    }

    /// Bytes occupied by one frame (one sample for every channel).
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// Bytes of PCM consumed per second of playback.
    pub fn bytes_per_second(&self) -> usize {
        self.bytes_per_frame() * self.sample_rate as usize
    }

    /// Playback duration of `bytes` bytes of PCM in this format.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let per_second = self.bytes_per_second();
        if per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / per_second as f64)
    }
}

/// Identifier of one output buffer within a buffer ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u32);

impl BufferId {
    /// Construct an identifier from a ring slot index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Slot index inside the owning ring.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fixed-size PCM buffer bound to one [`BufferId`].
///
/// Storage is allocated once at construction and reused for every fill; only
/// the valid length changes.
#[derive(Debug)]
pub struct OutputBuffer {
    id: BufferId,
    data: Vec<u8>,
    len: usize,
    format: PcmFormat,
}

impl OutputBuffer {
    /// Allocate an empty buffer of `capacity` bytes.
    pub fn new(id: BufferId, capacity: usize) -> Self {
        Self {
            id,
            data: vec![0; capacity],
            len: 0,
            format: PcmFormat::s16(0, 0),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Maximum number of PCM bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid PCM bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Format of the PCM currently held.
    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Valid PCM bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Copy `pcm` into the buffer, replacing previous content.
    ///
    /// Returns the number of bytes copied; anything beyond
    /// [`capacity`](Self::capacity) is not copied.
    pub fn fill(&mut self, pcm: &[u8], format: PcmFormat) -> usize {
        let n = pcm.len().min(self.data.len());
        self.data[..n].copy_from_slice(&pcm[..n]);
        self.len = n;
        self.format = format;
        n
    }

    /// Forget the current content.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Playback duration of the current content.
    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.len)
    }
}

/// Playback state as reported by the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoiceState {
    /// Created, nothing played yet.
    Initial,
    Playing,
    Paused,
    /// Stopped explicitly or ran out of queued buffers.
    Stopped,
}

/// A buffer the voice refused to queue, handed back to the caller.
#[derive(Debug, Error)]
#[error("voice rejected buffer {}: {}", .buffer.id(), .reason)]
pub struct QueueRejected {
    /// The rejected buffer; ownership returns to the caller.
    pub buffer: OutputBuffer,
    /// Device-provided reason.
    pub reason: String,
}

impl QueueRejected {
    pub fn new(buffer: OutputBuffer, reason: impl Into<String>) -> Self {
        Self {
            buffer,
            reason: reason.into(),
        }
    }
}

/// Unique identifier for playback sessions started by a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaybackSessionId(Uuid);

impl PlaybackSessionId {
    /// Generate a new session identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Construct an identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Borrow the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PlaybackSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlaybackSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Trait for platform output devices that consume queued PCM buffers.
///
/// The model is a FIFO of buffers: `queue` appends, the device plays them in
/// order, and `unqueue` hands back the ones that finished playing.
///
/// ## Contract
///
/// - Buffers are played in the order they were queued.
/// - `unqueue` returns every buffer that has been fully played since the last
///   call, oldest first, and never returns a buffer twice.
/// - `stop` halts output and marks every queued buffer as played, so the
///   next `unqueue` returns all of them.
/// - `pause` halts output but keeps queued buffers pending.
/// - A voice that runs out of queued buffers while playing reports
///   [`VoiceState::Stopped`].
pub trait Voice: Send {
    /// Append a filled buffer to the playback queue.
    fn queue(&mut self, buffer: OutputBuffer) -> std::result::Result<(), QueueRejected>;

    /// Take back buffers that finished playing.
    fn unqueue(&mut self) -> Result<Vec<OutputBuffer>>;

    /// Start or resume output.
    fn play(&mut self) -> Result<()>;

    /// Suspend output, keeping queued buffers.
    fn pause(&mut self) -> Result<()>;

    /// Halt output and mark all queued buffers as played.
    fn stop(&mut self) -> Result<()>;

    /// Set output gain (0.0 = muted, 1.0 = unity).
    fn set_gain(&mut self, gain: f32) -> Result<()>;

    /// Current device state.
    fn state(&self) -> VoiceState;
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        Device {}

        impl Voice for Device {
            fn queue(&mut self, buffer: OutputBuffer) -> std::result::Result<(), QueueRejected>;
            fn unqueue(&mut self) -> Result<Vec<OutputBuffer>>;
            fn play(&mut self) -> Result<()>;
            fn pause(&mut self) -> Result<()>;
            fn stop(&mut self) -> Result<()>;
            fn set_gain(&mut self, gain: f32) -> Result<()>;
            fn state(&self) -> VoiceState;
        }
    }

    #[test]
    fn pcm_format_sizes() {
        let format = PcmFormat::s16(2, 44_100);
        assert_eq!(format.bytes_per_frame(), 4);
        assert_eq!(format.bytes_per_second(), 176_400);
        assert_eq!(format.duration_of(176_400), Duration::from_secs(1));
    }

    #[test]
    fn zero_rate_has_no_duration() {
        let format = PcmFormat::s16(0, 0);
        assert_eq!(format.duration_of(4096), Duration::ZERO);
    }

    #[test]
    fn output_buffer_fill_truncates_to_capacity() {
        let mut buffer = OutputBuffer::new(BufferId::new(3), 4);
        let copied = buffer.fill(&[1, 2, 3, 4, 5, 6], PcmFormat::s16(1, 8_000));

        assert_eq!(copied, 4);
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(buffer.id().index(), 3);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 4);
    }

    #[test]
    fn queue_rejected_returns_buffer() {
        let buffer = OutputBuffer::new(BufferId::new(7), 16);
        let rejected = QueueRejected::new(buffer, "device lost");
        assert_eq!(rejected.to_string(), "voice rejected buffer #7: device lost");
        assert_eq!(rejected.buffer.id(), BufferId::new(7));
    }

    #[test]
    fn session_id_is_unique() {
        let a = PlaybackSessionId::new();
        let b = PlaybackSessionId::new();
        assert_ne!(a, b);
        assert_eq!(a, PlaybackSessionId::from_uuid(*a.as_uuid()));
    }

    #[test]
    fn voice_is_usable_as_boxed_trait_object() {
        let mut device = MockDevice::new();
        device
            .expect_queue()
            .returning(|buffer| Err(QueueRejected::new(buffer, "queue full")));
        device.expect_state().return_const(VoiceState::Initial);

        let mut voice: Box<dyn Voice> = Box::new(device);
        let rejected = voice
            .queue(OutputBuffer::new(BufferId::new(2), 8))
            .unwrap_err();

        assert_eq!(rejected.buffer.id(), BufferId::new(2));
        assert_eq!(rejected.reason, "queue full");
        assert_eq!(voice.state(), VoiceState::Initial);
    }
}
