//! # Event Bus System
//!
//! Broadcasts typed playback and stream events from the streaming core to any
//! number of listeners using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: [`CoreEvent`] wraps [`PlaybackEvent`] (controller
//!   lifecycle) and [`StreamEvent`] (bitstream-level notices).
//! - **EventBus**: cloneable sender side; publishing never blocks.
//! - **EventStream**: receiver wrapper with optional filtering.
//!
//! ```text
//! ┌────────────────┐   emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ feeder thread  ├─────────>│           ├────────────>│ UI / HUD   │
//! └────────────────┘          │ EventBus  │             └────────────┘
//! ┌────────────────┐   emit   │ (broadcast│  subscribe  ┌────────────┐
//! │ controller API ├─────────>│  channel) ├────────────>│ telemetry  │
//! └────────────────┘          └───────────┘             └────────────┘
//! ```
//!
//! Publishing is synchronous and safe from plain threads, so the feeder can
//! emit without an async runtime. Receiving works both from async code
//! (`recv().await`) and by polling (`try_recv`).
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
//!
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Playback(PlaybackEvent::Paused {
//!     session_id: "session-1".to_string(),
//! }))
//! .ok();
//!
//! assert!(rx.try_recv().is_ok());
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell behind and missed `n`
//!   events. Non-fatal; keep receiving.
//! - **`RecvError::Closed`**: every sender was dropped. Treat as shutdown.
//!
//! `emit` fails only when nobody is subscribed; publishers ignore that.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Controller lifecycle events
    Playback(PlaybackEvent),
    /// Bitstream events
    Stream(StreamEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Stream(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Playback(PlaybackEvent::Underrun { .. }) => EventSeverity::Warning,
            CoreEvent::Stream(StreamEvent::Resynchronized { .. }) => EventSeverity::Warning,
            CoreEvent::Playback(PlaybackEvent::Started { .. })
            | CoreEvent::Playback(PlaybackEvent::Completed { .. })
            | CoreEvent::Stream(StreamEvent::Opened { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Session the event belongs to, when it has one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Playback(e) => e.session_id(),
            CoreEvent::Stream(StreamEvent::Resynchronized { session_id, .. }) => {
                Some(session_id.as_str())
            }
            CoreEvent::Stream(StreamEvent::Opened { .. }) => None,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Playback Events
// ============================================================================

/// Controller lifecycle events.
///
/// `session_id` identifies one play-through: it changes every time playback
/// starts from Stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// Playback started from Stopped.
    Started {
        session_id: String,
        channels: u16,
        sample_rate: u32,
    },
    /// Playback paused; buffers stay queued.
    Paused { session_id: String },
    /// Playback resumed after pause.
    Resumed { session_id: String },
    /// Playback stopped on request.
    Stopped { session_id: String },
    /// The stream played to its end and the controller stopped by itself.
    Completed {
        session_id: String,
        /// PCM bytes handed to the voice during the session.
        bytes_played: u64,
    },
    /// Playback restarted from the beginning on request.
    Rewound { session_id: String },
    /// End of stream reached with looping on; decoding restarted.
    Looped {
        session_id: String,
        loops_completed: u64,
    },
    /// The voice ran dry while playing and was restarted.
    Underrun { session_id: String, underruns: u64 },
    /// Feeding failed; the controller has stopped.
    Error {
        session_id: Option<String>,
        /// Human-readable error message.
        message: String,
        /// Machine-readable error kind (e.g. `malformed_stream`).
        kind: String,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::Started { .. } => "Playback started",
            PlaybackEvent::Paused { .. } => "Playback paused",
            PlaybackEvent::Resumed { .. } => "Playback resumed",
            PlaybackEvent::Stopped { .. } => "Playback stopped",
            PlaybackEvent::Completed { .. } => "Stream completed",
            PlaybackEvent::Rewound { .. } => "Playback rewound",
            PlaybackEvent::Looped { .. } => "Stream looped",
            PlaybackEvent::Underrun { .. } => "Output underrun",
            PlaybackEvent::Error { .. } => "Playback error",
        }
    }

    fn session_id(&self) -> Option<&str> {
        match self {
            PlaybackEvent::Started { session_id, .. }
            | PlaybackEvent::Paused { session_id }
            | PlaybackEvent::Resumed { session_id }
            | PlaybackEvent::Stopped { session_id }
            | PlaybackEvent::Completed { session_id, .. }
            | PlaybackEvent::Rewound { session_id }
            | PlaybackEvent::Looped { session_id, .. }
            | PlaybackEvent::Underrun { session_id, .. } => Some(session_id.as_str()),
            PlaybackEvent::Error { session_id, .. } => session_id.as_deref(),
        }
    }
}

// ============================================================================
// Stream Events
// ============================================================================

/// Bitstream-level events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum StreamEvent {
    /// A source was bound and its headers parsed.
    Opened {
        /// Description of the byte source.
        source: String,
        channels: u16,
        sample_rate: u32,
        vendor: Option<String>,
    },
    /// Corrupt bytes were skipped and page sync regained.
    Resynchronized {
        session_id: String,
        /// Total bytes skipped in this stream so far.
        bytes_skipped: u64,
        /// Total resynchronizations in this stream so far.
        resyncs: u64,
    },
}

impl StreamEvent {
    fn description(&self) -> &str {
        match self {
            StreamEvent::Opened { .. } => "Stream opened",
            StreamEvent::Resynchronized { .. } => "Stream resynchronized",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventSeverity, EventStream};
///
/// let bus = EventBus::new(16);
/// let problems = EventStream::new(bus.subscribe())
///     .filter(|event| event.severity() >= EventSeverity::Warning);
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Takes the next matching event without waiting.
    ///
    /// Returns `None` when nothing matching is pending.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    /// Drains every pending matching event.
    pub fn drain(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Some(result) = self.try_recv() {
            match result {
                Ok(event) => events.push(event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        events
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
