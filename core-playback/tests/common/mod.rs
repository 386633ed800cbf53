//! Shared helpers for the core-playback integration tests.

#![allow(dead_code)]

use bridge_traits::{
    error::Result as BridgeResult, BridgeError, ByteSource, OutputBuffer, QueueRejected, Voice,
    VoiceState,
};
use core_playback::codec::RawPcmEncoder;
use core_playback::StreamingConfig;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const RATE: u32 = 8_000;

/// Config with a small ring and a fast feeder.
pub fn test_config(ring_capacity: usize, buffer_bytes: usize) -> StreamingConfig {
    StreamingConfig {
        ring_capacity,
        buffer_bytes,
        read_chunk_bytes: 512,
        feed_interval_ms: 1,
        ..StreamingConfig::default()
    }
}

/// Mono stream of `chunks` chunks of `chunk_frames` frames; every sample of
/// chunk `k` has the value `(k + 1) / 100`.
pub fn stepped_stream(chunks: usize, chunk_frames: usize) -> Vec<u8> {
    let samples: Vec<f32> = (0..chunks)
        .flat_map(|k| std::iter::repeat((k + 1) as f32 / 100.0).take(chunk_frames))
        .collect();
    RawPcmEncoder::new(1, RATE)
        .with_frames_per_packet(chunk_frames)
        .encode(&samples)
}

/// Mono sawtooth so every region of the stream is distinguishable.
pub fn ramp_stream(frames: usize) -> Vec<u8> {
    let samples: Vec<f32> = (0..frames)
        .map(|i| (i % 200) as f32 / 200.0 - 0.5)
        .collect();
    RawPcmEncoder::new(1, RATE)
        .with_frames_per_packet(160)
        .encode(&samples)
}

/// Poll `condition` until it holds or five seconds pass.
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

// ============================================================================
// Fake voice
// ============================================================================

#[derive(Default)]
pub struct FakeVoiceLog {
    pub state: Option<VoiceState>,
    pub pending: VecDeque<OutputBuffer>,
    pub flushed: Vec<OutputBuffer>,
    /// Every buffer played, as a copy of its bytes.
    pub chunks: Vec<Vec<u8>>,
    pub gain: f32,
    pub play_calls: usize,
    pub max_pending: usize,
}

impl FakeVoiceLog {
    pub fn played_bytes(&self) -> Vec<u8> {
        self.chunks.concat()
    }
}

/// Deterministic voice: each `unqueue` while playing plays exactly one
/// buffer. Runs dry into `Stopped` like a hardware queue.
#[derive(Clone, Default)]
pub struct FakeVoice {
    log: Arc<Mutex<FakeVoiceLog>>,
}

impl FakeVoice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> parking_lot::MutexGuard<'_, FakeVoiceLog> {
        self.log.lock()
    }

    pub fn chunk_count(&self) -> usize {
        self.log.lock().chunks.len()
    }
}

impl Voice for FakeVoice {
    fn queue(&mut self, buffer: OutputBuffer) -> std::result::Result<(), QueueRejected> {
        let mut log = self.log.lock();
        log.pending.push_back(buffer);
        log.max_pending = log.max_pending.max(log.pending.len());
        Ok(())
    }

    fn unqueue(&mut self) -> BridgeResult<Vec<OutputBuffer>> {
        let mut log = self.log.lock();
        let mut done = std::mem::take(&mut log.flushed);
        if log.state == Some(VoiceState::Playing) {
            if let Some(buffer) = log.pending.pop_front() {
                log.chunks.push(buffer.as_slice().to_vec());
                done.push(buffer);
            }
            if log.pending.is_empty() {
                log.state = Some(VoiceState::Stopped);
            }
        }
        Ok(done)
    }

    fn play(&mut self) -> BridgeResult<()> {
        let mut log = self.log.lock();
        log.state = Some(VoiceState::Playing);
        log.play_calls += 1;
        Ok(())
    }

    fn pause(&mut self) -> BridgeResult<()> {
        self.log.lock().state = Some(VoiceState::Paused);
        Ok(())
    }

    fn stop(&mut self) -> BridgeResult<()> {
        let mut log = self.log.lock();
        log.state = Some(VoiceState::Stopped);
        let pending: Vec<_> = log.pending.drain(..).collect();
        log.flushed.extend(pending);
        Ok(())
    }

    fn set_gain(&mut self, gain: f32) -> BridgeResult<()> {
        self.log.lock().gain = gain;
        Ok(())
    }

    fn state(&self) -> VoiceState {
        self.log.lock().state.unwrap_or(VoiceState::Initial)
    }
}

// ============================================================================
// Flaky source
// ============================================================================

/// In-memory source whose reads start failing after `healthy_reads` calls.
pub struct FlakySource {
    data: Vec<u8>,
    position: usize,
    chunk: usize,
    reads: usize,
    healthy_reads: usize,
}

impl FlakySource {
    pub fn new(data: Vec<u8>, chunk: usize, healthy_reads: usize) -> Self {
        Self {
            data,
            position: 0,
            chunk,
            reads: 0,
            healthy_reads,
        }
    }
}

impl ByteSource for FlakySource {
    fn read(&mut self, buf: &mut [u8]) -> BridgeResult<usize> {
        self.reads += 1;
        if self.reads > self.healthy_reads {
            return Err(BridgeError::OperationFailed("connection reset".to_string()));
        }
        let n = buf.len().min(self.chunk).min(self.data.len() - self.position);
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn reset(&mut self) -> BridgeResult<()> {
        self.position = 0;
        Ok(())
    }

    fn close(&mut self) {}

    fn describe(&self) -> String {
        "flaky".to_string()
    }
}
