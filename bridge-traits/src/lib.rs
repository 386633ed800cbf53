//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the streaming core and the
//! platform-specific collaborators it drives. Each trait represents a
//! capability that the core requires but that must be implemented differently
//! per platform (desktop, mobile, embedded).
//!
//! ## Traits
//!
//! ### Input
//! - [`ByteSource`](source::ByteSource) - Restartable stream of encoded bytes
//!
//! ### Output
//! - [`Voice`](playback::Voice) - Hardware playback handle consuming queued PCM buffers
//!
//! ### Utilities
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Ownership
//!
//! PCM buffers are passed to a [`Voice`](playback::Voice) by value. While a
//! buffer is queued the voice owns it exclusively; it comes back to the caller
//! through [`Voice::unqueue`](playback::Voice::unqueue) once it has been
//! played out, or inside [`QueueRejected`](playback::QueueRejected) when the
//! device refuses it. A buffer can therefore never be written while the device
//! is still reading it.
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type for
//! consistent error handling. Platform implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Provide actionable error messages
//! - Include error context (e.g., file paths, device names)
//!
//! ## Thread Safety
//!
//! Sources and voices are moved onto the streaming feeder thread, so every
//! trait requires `Send`.

pub mod error;
pub mod playback;
pub mod source;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use playback::{
    BufferId, OutputBuffer, PcmFormat, PlaybackSessionId, QueueRejected, Voice, VoiceState,
};
pub use source::ByteSource;
pub use time::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
