//! # Streaming Playback Controller
//!
//! Drives one [`Voice`] from one [`StreamDecoder`] through a fixed
//! [`BufferRing`], with a dedicated feeder thread keeping the voice's queue
//! topped up.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │        Feeder thread ("stream-feeder")       │
//! │                                              │
//! │  1. unqueue played buffers, release them     │
//! │  2. fill Free buffers via next_chunk         │
//! │  3. queue them on the Voice                  │
//! │  4. timed wait on the shared condvar         │
//! └────────────┬─────────────────────────────────┘
//!              │ OutputBuffer (moved)
//!              ▼
//! ┌──────────────────────────────────────────────┐
//! │           Voice (host audio device)          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Every state change, from the public API or a feeder cycle, happens under
//! one mutex. The feeder parks on the condition variable while paused and
//! between cycles, so `pause`/`stop` interrupt it immediately. `stop` joins
//! the feeder only after releasing the mutex.
//!
//! ## States
//!
//! ```text
//! Stopped --play--> Playing --pause--> Paused --resume--> Playing
//!    ^                 |                  |
//!    +------stop-------+-------stop-------+
//!    +-- end of stream (not looping) / fatal error
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridge_desktop::{FileByteSource, SoftwareVoice};
//! use core_playback::{RawPcmCodec, StreamingConfig, StreamingPlaybackController};
//!
//! let controller = StreamingPlaybackController::new(
//!     Box::new(SoftwareVoice::new()),
//!     Box::new(RawPcmCodec::new()),
//!     StreamingConfig::default(),
//! )?;
//! controller.set_source(Box::new(FileByteSource::open("tone.ogg")?))?;
//! controller.play()?;
//! ```

use crate::buffer_ring::BufferRing;
use crate::config::{PlaybackState, StreamingConfig, StreamingStats};
use crate::decoder::{DecoderStats, StreamDecoder};
use crate::error::{PlaybackError, Result};
use crate::traits::{CodecEngine, StreamInfo};
use bridge_traits::{BridgeError, ByteSource, PlaybackSessionId, Voice, VoiceState};
use core_runtime::events::{CoreEvent, EventBus, EventStream, PlaybackEvent, StreamEvent};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

fn device_failure(error: BridgeError) -> PlaybackError {
    PlaybackError::DeviceFailure(error.to_string())
}

/// Everything guarded by the controller lock.
struct Inner {
    decoder: StreamDecoder,
    ring: BufferRing,
    voice: Box<dyn Voice>,
    config: StreamingConfig,
    state: PlaybackState,
    /// Bumped whenever a feeder must exit; each feeder remembers its own.
    generation: u64,
    looping: bool,
    /// Audio was queued since the stream last started or looped.
    audio_since_loop: bool,
    volume: f32,
    last_error: Option<PlaybackError>,
    stats: StreamingStats,
    session: Option<PlaybackSessionId>,
    resyncs_reported: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    wake: Condvar,
    events: EventBus,
}

/// Outcome of one feeder cycle.
enum Cycle {
    Continue,
    Finished,
}

/// Play/pause/stop/rewind/loop/volume control over a streamed source.
///
/// All methods take `&self`; the controller can be shared behind an `Arc`.
/// Dropping it stops playback and closes the source.
pub struct StreamingPlaybackController {
    shared: Arc<Shared>,
    feeder: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingPlaybackController {
    /// Create a stopped controller with no source bound.
    pub fn new(
        voice: Box<dyn Voice>,
        codec: Box<dyn CodecEngine>,
        config: StreamingConfig,
    ) -> Result<Self> {
        Self::with_event_bus(voice, codec, config, EventBus::default())
    }

    /// Like [`new`](Self::new), publishing into an existing event bus.
    pub fn with_event_bus(
        mut voice: Box<dyn Voice>,
        codec: Box<dyn CodecEngine>,
        config: StreamingConfig,
        events: EventBus,
    ) -> Result<Self> {
        config.validate().map_err(PlaybackError::InvalidConfig)?;
        voice
            .set_gain(config.initial_volume)
            .map_err(device_failure)?;

        info!(
            codec = codec.name(),
            ring_capacity = config.ring_capacity,
            buffer_bytes = config.buffer_bytes,
            "Creating streaming controller"
        );

        let inner = Inner {
            decoder: StreamDecoder::new(codec, &config),
            ring: BufferRing::new(config.ring_capacity, config.buffer_bytes),
            voice,
            state: PlaybackState::Stopped,
            generation: 0,
            looping: config.looping,
            audio_since_loop: false,
            volume: config.initial_volume,
            last_error: None,
            stats: StreamingStats::default(),
            session: None,
            resyncs_reported: 0,
            config,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                wake: Condvar::new(),
                events,
            }),
            feeder: Mutex::new(None),
        })
    }

    // ========================================================================
    // Source
    // ========================================================================

    /// Stop current playback and bind `source`.
    ///
    /// Headers are parsed here, so a malformed stream fails now rather than
    /// on `play`.
    #[instrument(skip_all, fields(source = %source.describe()))]
    pub fn set_source(&self, source: Box<dyn ByteSource>) -> Result<StreamInfo> {
        self.stop()?;

        let name = source.describe();
        let mut inner = self.shared.inner.lock();
        inner.session = None;
        inner.stats = StreamingStats::default();
        inner.resyncs_reported = 0;
        inner.last_error = None;

        let info = match inner.decoder.open(source) {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, "Failed to open source");
                return Err(e);
            }
        };

        self.shared.publish(CoreEvent::Stream(StreamEvent::Opened {
            source: name,
            channels: info.channels,
            sample_rate: info.sample_rate,
            vendor: info.vendor.clone(),
        }));
        Ok(info)
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Start playback from the beginning, or resume when paused.
    ///
    /// No-op while already playing.
    pub fn play(&self) -> Result<()> {
        let mut feeder = self.feeder.lock();
        let mut inner = self.shared.inner.lock();
        match inner.state {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Paused => {
                inner.resume(&self.shared)?;
                return Ok(());
            }
            PlaybackState::Stopped => {}
        }
        if !inner.decoder.has_source() {
            return Err(PlaybackError::NoSourceLoaded);
        }

        inner.last_error = None;
        inner.stats = StreamingStats::default();
        inner.resyncs_reported = 0;
        inner.generation += 1;
        let generation = inner.generation;
        let session = PlaybackSessionId::new();
        inner.session = Some(session);

        if let Err(e) = inner.start(&self.shared) {
            error!(error = %e, "Failed to start playback");
            if let Err(secondary) = inner.halt() {
                warn!(error = %secondary, "Error while stopping after failed start");
            }
            return Err(e);
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("stream-feeder".to_string())
            .spawn(move || run_feeder(shared, generation));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let _ = inner.halt();
                return Err(PlaybackError::Internal(format!(
                    "failed to spawn feeder thread: {}",
                    e
                )));
            }
        };

        inner.state = PlaybackState::Playing;
        let format = inner.decoder.stream_info().map(StreamInfo::pcm_format);
        info!(%session, queued = inner.ring.queued_count(), "Playback started");
        self.shared
            .publish(CoreEvent::Playback(PlaybackEvent::Started {
                session_id: session.to_string(),
                channels: format.map_or(0, |f| f.channels),
                sample_rate: format.map_or(0, |f| f.sample_rate),
            }));

        // A previous feeder sees the new generation and exits on its own.
        let previous = feeder.replace(handle);
        drop(inner);
        if let Some(previous) = previous {
            let _ = previous.join();
        }
        Ok(())
    }

    /// Suspend output; queued buffers stay with the voice.
    ///
    /// No-op unless playing.
    pub fn pause(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != PlaybackState::Playing {
            return Ok(());
        }
        inner.voice.pause().map_err(device_failure)?;
        inner.state = PlaybackState::Paused;
        info!(queued = inner.ring.queued_count(), "Playback paused");
        let session_id = inner.session_label();
        self.shared
            .publish(CoreEvent::Playback(PlaybackEvent::Paused { session_id }));
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Resume after [`pause`](Self::pause). No-op unless paused.
    pub fn resume(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != PlaybackState::Paused {
            return Ok(());
        }
        inner.resume(&self.shared)
    }

    /// Stop playback, return every buffer to the ring and close the source.
    ///
    /// Safe to call in any state and more than once.
    pub fn stop(&self) -> Result<()> {
        let mut feeder = self.feeder.lock();
        let mut inner = self.shared.inner.lock();
        let was_active = inner.state.is_active();
        let result = inner.halt();

        if was_active {
            info!(stats = ?inner.stats, "Playback stopped");
            let session_id = inner.session_label();
            self.shared
                .publish(CoreEvent::Playback(PlaybackEvent::Stopped { session_id }));
        }

        let handle = feeder.take();
        drop(inner);
        self.shared.wake.notify_all();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Feeder thread panicked");
            }
        }
        result
    }

    /// Restart the stream from the beginning, keeping the current state.
    ///
    /// When stopped this only rewinds the decoder.
    pub fn rewind(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if !inner.decoder.has_source() {
            return Err(PlaybackError::NoSourceLoaded);
        }

        if inner.state == PlaybackState::Stopped {
            inner.decoder.reset()?;
            debug!("Rewound stopped stream");
            return Ok(());
        }

        let resume_playing = inner.state == PlaybackState::Playing;
        if let Err(e) = inner.restart(resume_playing, &self.shared) {
            inner.report(&e, &self.shared);
            return Err(e);
        }

        info!(playing = resume_playing, "Playback rewound");
        let session_id = inner.session_label();
        self.shared
            .publish(CoreEvent::Playback(PlaybackEvent::Rewound { session_id }));
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Block until the controller is Stopped or `timeout` elapses.
    ///
    /// Returns `true` if it is Stopped.
    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock();
        while inner.state != PlaybackState::Stopped {
            if self.shared.wake.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        inner.state == PlaybackState::Stopped
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Restart from the beginning at end of stream instead of stopping.
    pub fn set_looping(&self, looping: bool) {
        let mut inner = self.shared.inner.lock();
        inner.looping = looping;
        debug!(looping, "Looping changed");
        self.shared.wake.notify_all();
    }

    /// Set output volume (0.0 to 1.0).
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(PlaybackError::InvalidVolume(volume));
        }
        let mut inner = self.shared.inner.lock();
        inner.voice.set_gain(volume).map_err(device_failure)?;
        inner.volume = volume;
        debug!(volume, "Volume changed");
        Ok(())
    }

    pub fn is_looping(&self) -> bool {
        self.shared.inner.lock().looping
    }

    pub fn current_volume(&self) -> f32 {
        self.shared.inner.lock().volume
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn state(&self) -> PlaybackState {
        self.shared.inner.lock().state
    }

    /// Layout of the bound stream, if any.
    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.shared.inner.lock().decoder.stream_info().cloned()
    }

    /// Take the error that stopped playback, if any.
    pub fn take_error(&self) -> Option<PlaybackError> {
        self.shared.inner.lock().last_error.take()
    }

    /// Counters for the current or last session.
    pub fn stats(&self) -> StreamingStats {
        self.shared.inner.lock().stats.clone()
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        self.shared.inner.lock().decoder.stats()
    }

    /// Identifier of the current or last play-through.
    pub fn session_id(&self) -> Option<PlaybackSessionId> {
        self.shared.inner.lock().session
    }

    /// Subscribe to playback and stream events.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.shared.events.subscribe())
    }

    pub fn event_bus(&self) -> EventBus {
        self.shared.events.clone()
    }
}

impl Drop for StreamingPlaybackController {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Error while stopping on drop");
        }
    }
}

impl Shared {
    fn publish(&self, event: CoreEvent) {
        // Sending fails only when nobody is subscribed.
        let _ = self.events.emit(event);
    }
}

impl Inner {
    fn session_label(&self) -> String {
        self.session.map(|s| s.to_string()).unwrap_or_default()
    }

    /// Rewind the decoder, prefill the ring and start the voice.
    fn start(&mut self, shared: &Shared) -> Result<()> {
        self.decoder.reset()?;
        self.audio_since_loop = false;
        let prefilled = self.top_up(shared)?;
        debug!(prefilled, "Ring prefilled");
        self.voice.play().map_err(device_failure)?;
        Ok(())
    }

    fn resume(&mut self, shared: &Shared) -> Result<()> {
        self.voice.play().map_err(device_failure)?;
        self.state = PlaybackState::Playing;
        info!("Playback resumed");
        shared.publish(CoreEvent::Playback(PlaybackEvent::Resumed {
            session_id: self.session_label(),
        }));
        shared.wake.notify_all();
        Ok(())
    }

    /// Flush the voice, rewind and prefill again. The voice is left stopped
    /// unless `play` is set.
    fn restart(&mut self, play: bool, shared: &Shared) -> Result<()> {
        self.flush()?;
        self.decoder.reset()?;
        self.resyncs_reported = 0;
        self.audio_since_loop = false;
        self.top_up(shared)?;
        if play {
            self.voice.play().map_err(device_failure)?;
        }
        Ok(())
    }

    /// Stop the voice and return every buffer to Free.
    ///
    /// Played buffers are taken back even when the voice fails to stop.
    fn flush(&mut self) -> Result<()> {
        let stopped = self.voice.stop().map_err(device_failure);
        let reclaimed = self.reclaim_played();
        if !self.ring.all_free() {
            warn!(
                queued = self.ring.queued_count(),
                "Voice kept buffers after stop"
            );
        }
        stopped?;
        reclaimed?;
        Ok(())
    }

    /// Release every buffer the voice has finished with.
    ///
    /// One bad buffer does not strand the rest; the first error is returned
    /// after all of them were handled.
    fn reclaim_played(&mut self) -> Result<usize> {
        let played = self.voice.unqueue().map_err(device_failure)?;
        let count = played.len();
        let mut first_error = None;
        for buffer in played {
            let id = buffer.id();
            let returned = self
                .ring
                .mark_processed(buffer)
                .and_then(|()| self.ring.release(id));
            if let Err(e) = returned {
                warn!(%id, error = %e, "Could not take back played buffer");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// Go to Stopped: invalidate the feeder, flush the voice, close the source.
    fn halt(&mut self) -> Result<()> {
        self.generation += 1;
        self.state = PlaybackState::Stopped;
        let flushed = self.flush();
        self.decoder.close();
        flushed
    }

    /// Stop after a fatal error and publish it.
    fn report(&mut self, error: &PlaybackError, shared: &Shared) {
        error!(error = %error, kind = error.kind(), "Playback failed");
        if let Err(secondary) = self.halt() {
            warn!(error = %secondary, "Error while stopping after failure");
        }
        shared.publish(CoreEvent::Playback(PlaybackEvent::Error {
            session_id: self.session.map(|s| s.to_string()),
            message: error.to_string(),
            kind: error.kind().to_string(),
        }));
        shared.wake.notify_all();
    }

    /// [`report`](Self::report), keeping the error for `take_error`.
    fn fail(&mut self, error: PlaybackError, shared: &Shared) {
        self.report(&error, shared);
        self.last_error = Some(error);
    }

    /// Fill and queue one Free buffer. `false` when none is free or the
    /// stream has nothing left.
    fn fill_one(&mut self) -> Result<bool> {
        let format = self
            .decoder
            .stream_info()
            .map(StreamInfo::pcm_format)
            .ok_or(PlaybackError::NoSourceLoaded)?;
        let Some(mut buffer) = self.ring.acquire_free() else {
            return Ok(false);
        };
        let chunk = match self.decoder.next_chunk(self.config.buffer_bytes) {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                self.ring.reclaim(buffer)?;
                return Ok(false);
            }
            Err(e) => {
                self.ring.reclaim(buffer)?;
                return Err(e);
            }
        };

        buffer.fill(&chunk, format);
        let id = buffer.id();
        let len = buffer.len();

        if let Err(rejected) = self.voice.queue(buffer) {
            let reason = rejected.reason;
            self.ring.reclaim(rejected.buffer)?;
            return Err(PlaybackError::DeviceFailure(reason));
        }
        self.ring.mark_in_flight(id)?;
        self.stats.chunks_queued += 1;
        self.stats.bytes_queued += len as u64;
        self.audio_since_loop = true;
        Ok(true)
    }

    /// Fill every Free buffer, restarting the stream at its end when looping.
    fn top_up(&mut self, shared: &Shared) -> Result<usize> {
        let mut queued = 0;
        while self.ring.free_count() > 0 {
            if self.decoder.is_end_of_stream() {
                // A stream with no audio at all would restart forever.
                if !self.looping || !self.audio_since_loop {
                    break;
                }
                self.loop_stream(shared)?;
                continue;
            }
            if self.fill_one()? {
                queued += 1;
            } else if !self.decoder.is_end_of_stream() {
                break;
            }
        }
        Ok(queued)
    }

    fn loop_stream(&mut self, shared: &Shared) -> Result<()> {
        self.decoder.reset()?;
        self.resyncs_reported = 0;
        self.audio_since_loop = false;
        self.stats.loops_completed += 1;
        debug!(loops = self.stats.loops_completed, "Stream looped");
        shared.publish(CoreEvent::Playback(PlaybackEvent::Looped {
            session_id: self.session_label(),
            loops_completed: self.stats.loops_completed,
        }));
        Ok(())
    }

    fn report_resyncs(&mut self, shared: &Shared) {
        let framer = self.decoder.stats().framer;
        if framer.resyncs > self.resyncs_reported {
            self.resyncs_reported = framer.resyncs;
            warn!(
                resyncs = framer.resyncs,
                bytes_skipped = framer.bytes_skipped,
                "Stream resynchronized"
            );
            shared.publish(CoreEvent::Stream(StreamEvent::Resynchronized {
                session_id: self.session_label(),
                bytes_skipped: framer.bytes_skipped,
                resyncs: framer.resyncs,
            }));
        }
    }

    /// One bounded round of feeder work.
    fn feed(&mut self, shared: &Shared) -> Result<Cycle> {
        let played = self.reclaim_played()?;
        let queued = self.top_up(shared)?;
        self.report_resyncs(shared);

        let exhausted =
            self.decoder.is_end_of_stream() && (!self.looping || !self.audio_since_loop);
        if exhausted && self.ring.queued_count() == 0 {
            self.complete(shared);
            return Ok(Cycle::Finished);
        }

        if self.voice.state() == VoiceState::Stopped && self.ring.in_flight_count() > 0 {
            self.voice.play().map_err(device_failure)?;
            self.stats.underruns += 1;
            warn!(underruns = self.stats.underruns, "Output underrun, restarting voice");
            shared.publish(CoreEvent::Playback(PlaybackEvent::Underrun {
                session_id: self.session_label(),
                underruns: self.stats.underruns,
            }));
        }

        if played > 0 || queued > 0 {
            debug!(
                played,
                queued,
                in_flight = self.ring.in_flight_count(),
                "Feeder cycle"
            );
        }
        Ok(Cycle::Continue)
    }

    /// The stream played out: stop on our own.
    fn complete(&mut self, shared: &Shared) {
        if let Err(e) = self.halt() {
            warn!(error = %e, "Error while stopping at end of stream");
        }
        info!(
            bytes_played = self.stats.bytes_queued,
            chunks = self.stats.chunks_queued,
            "Playback completed"
        );
        shared.publish(CoreEvent::Playback(PlaybackEvent::Completed {
            session_id: self.session_label(),
            bytes_played: self.stats.bytes_queued,
        }));
        shared.wake.notify_all();
    }
}

fn run_feeder(shared: Arc<Shared>, generation: u64) {
    debug!(generation, "Feeder started");
    let mut inner = shared.inner.lock();
    loop {
        if inner.generation != generation || inner.state == PlaybackState::Stopped {
            break;
        }
        if inner.state == PlaybackState::Paused {
            shared.wake.wait(&mut inner);
            continue;
        }

        match inner.feed(&shared) {
            Ok(Cycle::Continue) => {}
            Ok(Cycle::Finished) => break,
            Err(e) => {
                inner.fail(e, &shared);
                break;
            }
        }

        let interval = inner.config.feed_interval();
        shared.wake.wait_for(&mut inner, interval);
    }
    debug!(generation, "Feeder exited");
}
