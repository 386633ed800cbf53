//! Clock-paced software output device.
//!
//! [`SoftwareVoice`] models a hardware buffer queue without touching any
//! audio hardware: a device thread takes the oldest queued buffer, waits for
//! its playback duration (scaled by the configured time scale), optionally
//! hands the PCM to a [`PcmSink`], and moves it to the processed list.

use bridge_traits::{
    error::Result, BridgeError, OutputBuffer, QueueRejected, Voice, VoiceState,
};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Receives every buffer as it finishes playing, together with the gain that
/// was in effect.
pub type PcmSink = Box<dyn FnMut(&OutputBuffer, f32) + Send>;

struct DeviceState {
    state: VoiceState,
    pending: VecDeque<OutputBuffer>,
    done: Vec<OutputBuffer>,
    gain: f32,
    played_bytes: u64,
    sink: Option<PcmSink>,
    shutdown: bool,
}

struct Shared {
    device: Mutex<DeviceState>,
    wake: Condvar,
}

/// Software [`Voice`] implementation.
///
/// Playing advances in whole buffers: pausing part way through a buffer
/// restarts that buffer's clock on resume.
pub struct SoftwareVoice {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    max_queued: usize,
}

impl SoftwareVoice {
    /// Voice playing in real time.
    pub fn new() -> Self {
        Self::with_time_scale(1.0)
    }

    /// Voice whose clock runs at `scale` times real duration (0.0 plays
    /// instantly).
    pub fn with_time_scale(scale: f64) -> Self {
        let shared = Arc::new(Shared {
            device: Mutex::new(DeviceState {
                state: VoiceState::Initial,
                pending: VecDeque::new(),
                done: Vec::new(),
                gain: 1.0,
                played_bytes: 0,
                sink: None,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });
        let scale = if scale.is_finite() { scale.max(0.0) } else { 1.0 };
        let device = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("software-voice".to_string())
            .spawn(move || run_device(device, scale))
            .map_err(|e| warn!(error = %e, "Failed to spawn voice thread"))
            .ok();
        Self {
            shared,
            worker,
            max_queued: usize::MAX,
        }
    }

    /// Install a sink receiving each played buffer.
    pub fn with_sink(self, sink: impl FnMut(&OutputBuffer, f32) + Send + 'static) -> Self {
        self.shared.device.lock().sink = Some(Box::new(sink));
        self
    }

    /// Reject queue requests beyond `max` pending buffers.
    pub fn with_max_queued(mut self, max: usize) -> Self {
        self.max_queued = max;
        self
    }

    /// Total PCM bytes played so far.
    pub fn played_bytes(&self) -> u64 {
        self.shared.device.lock().played_bytes
    }

    pub fn gain(&self) -> f32 {
        self.shared.device.lock().gain
    }

    /// Buffers queued and not yet played.
    pub fn pending(&self) -> usize {
        self.shared.device.lock().pending.len()
    }
}

impl Default for SoftwareVoice {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SoftwareVoice {
    fn drop(&mut self) {
        self.shared.device.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Voice for SoftwareVoice {
    fn queue(&mut self, buffer: OutputBuffer) -> std::result::Result<(), QueueRejected> {
        if self.worker.is_none() {
            return Err(QueueRejected::new(buffer, "device thread not running"));
        }
        let mut device = self.shared.device.lock();
        if device.pending.len() >= self.max_queued {
            return Err(QueueRejected::new(buffer, "device queue full"));
        }
        trace!(id = %buffer.id(), bytes = buffer.len(), "Buffer queued");
        device.pending.push_back(buffer);
        drop(device);
        self.shared.wake.notify_all();
        Ok(())
    }

    fn unqueue(&mut self) -> Result<Vec<OutputBuffer>> {
        Ok(std::mem::take(&mut self.shared.device.lock().done))
    }

    fn play(&mut self) -> Result<()> {
        if self.worker.is_none() {
            return Err(BridgeError::Device("device thread not running".to_string()));
        }
        self.shared.device.lock().state = VoiceState::Playing;
        self.shared.wake.notify_all();
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let mut device = self.shared.device.lock();
        if device.state == VoiceState::Playing {
            device.state = VoiceState::Paused;
        }
        drop(device);
        self.shared.wake.notify_all();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut device = self.shared.device.lock();
        device.state = VoiceState::Stopped;
        let flushed: Vec<_> = device.pending.drain(..).collect();
        device.done.extend(flushed);
        drop(device);
        self.shared.wake.notify_all();
        Ok(())
    }

    fn set_gain(&mut self, gain: f32) -> Result<()> {
        if !gain.is_finite() || gain < 0.0 {
            return Err(BridgeError::Device(format!("invalid gain {}", gain)));
        }
        self.shared.device.lock().gain = gain;
        Ok(())
    }

    fn state(&self) -> VoiceState {
        self.shared.device.lock().state
    }
}

fn run_device(shared: Arc<Shared>, scale: f64) {
    debug!("Software voice started");
    let mut device = shared.device.lock();
    while !device.shutdown {
        if device.state != VoiceState::Playing {
            shared.wake.wait(&mut device);
            continue;
        }
        let Some(front) = device.pending.front() else {
            // Ran dry while playing.
            device.state = VoiceState::Stopped;
            trace!("Voice ran out of buffers");
            continue;
        };

        let id = front.id();
        let deadline = Instant::now() + front.duration().mul_f64(scale);
        let mut interrupted = false;
        while Instant::now() < deadline {
            shared.wake.wait_until(&mut device, deadline);
            let still_front = device.pending.front().map(|b| b.id()) == Some(id);
            if device.shutdown || device.state != VoiceState::Playing || !still_front {
                interrupted = true;
                break;
            }
        }
        if interrupted {
            continue;
        }

        if let Some(buffer) = device.pending.pop_front() {
            let gain = device.gain;
            device.played_bytes += buffer.len() as u64;
            if let Some(sink) = device.sink.as_mut() {
                sink(&buffer, gain);
            }
            device.done.push(buffer);
        }
    }
    debug!("Software voice shut down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::{BufferId, PcmFormat};
    use std::time::Duration;

    fn filled(id: u32, bytes: usize) -> OutputBuffer {
        let mut buffer = OutputBuffer::new(BufferId::new(id), bytes);
        buffer.fill(&vec![1u8; bytes], PcmFormat::s16(1, 8_000));
        buffer
    }

    fn wait_for_done(voice: &mut SoftwareVoice, count: usize) -> Vec<OutputBuffer> {
        let mut done = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while done.len() < count && Instant::now() < deadline {
            done.extend(voice.unqueue().unwrap());
            thread::sleep(Duration::from_millis(1));
        }
        done
    }

    #[test]
    fn test_plays_in_queue_order_and_stops_when_dry() {
        let mut voice = SoftwareVoice::with_time_scale(0.0);
        assert_eq!(voice.state(), VoiceState::Initial);

        for id in 0..3 {
            voice.queue(filled(id, 64)).unwrap();
        }
        voice.play().unwrap();

        let done = wait_for_done(&mut voice, 3);
        let ids: Vec<_> = done.iter().map(|b| b.id().index()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(voice.played_bytes(), 192);

        let deadline = Instant::now() + Duration::from_secs(5);
        while voice.state() != VoiceState::Stopped && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(voice.state(), VoiceState::Stopped);
    }

    #[test]
    fn test_pause_keeps_pending_buffers() {
        let mut voice = SoftwareVoice::with_time_scale(1.0);
        // One second of 8 kHz mono, long enough to pause before it finishes.
        voice.queue(filled(0, 16_000)).unwrap();
        voice.play().unwrap();
        voice.pause().unwrap();

        assert_eq!(voice.state(), VoiceState::Paused);
        assert!(voice.unqueue().unwrap().is_empty());
        assert_eq!(voice.pending(), 1);
    }

    #[test]
    fn test_stop_returns_all_buffers() {
        let mut voice = SoftwareVoice::with_time_scale(1.0);
        voice.queue(filled(0, 16_000)).unwrap();
        voice.queue(filled(1, 16_000)).unwrap();
        voice.play().unwrap();
        voice.stop().unwrap();

        let done = voice.unqueue().unwrap();
        assert_eq!(done.len(), 2);
        assert_eq!(voice.state(), VoiceState::Stopped);
        assert!(voice.unqueue().unwrap().is_empty());
    }

    #[test]
    fn test_sink_sees_gain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let mut voice = SoftwareVoice::with_time_scale(0.0)
            .with_sink(move |buffer, gain| captured.lock().push((buffer.len(), gain)));
        voice.set_gain(0.5).unwrap();
        voice.queue(filled(0, 32)).unwrap();
        voice.play().unwrap();

        wait_for_done(&mut voice, 1);
        assert_eq!(*seen.lock(), vec![(32, 0.5)]);
    }

    #[test]
    fn test_rejects_when_full_and_bad_gain() {
        let mut voice = SoftwareVoice::with_time_scale(1.0).with_max_queued(1);
        voice.queue(filled(0, 16)).unwrap();
        let rejected = voice.queue(filled(1, 16)).unwrap_err();
        assert_eq!(rejected.buffer.id(), BufferId::new(1));

        assert!(voice.set_gain(-0.1).is_err());
        assert!(voice.set_gain(f32::NAN).is_err());
        assert_eq!(voice.gain(), 1.0);
    }
}
