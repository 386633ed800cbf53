//! # Playback Error Types
//!
//! Error types for the streaming decode-and-playback pipeline.

use bridge_traits::{BridgeError, BufferId};
use thiserror::Error;

/// Errors that can occur while framing, decoding or playing a stream.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Stream Errors
    // ========================================================================
    /// The bitstream never resynchronized before the source ran out, or the
    /// header packet sequence was incomplete.
    #[error("Malformed stream: {0}")]
    MalformedStream(String),

    /// The byte source failed and the retry failed too.
    #[error("Byte source failed after {attempts} attempts: {source}")]
    SourceFailed {
        attempts: u32,
        #[source]
        source: BridgeError,
    },

    /// The codec engine rejected a packet or produced unusable output.
    #[error("Codec error: {0}")]
    Codec(String),

    // ========================================================================
    // Buffer Errors
    // ========================================================================
    /// Appending decoded PCM would exceed the accumulator capacity.
    #[error("Accumulator overflow: {requested} bytes requested with {buffered} of {capacity} in use")]
    AccumulatorOverflow {
        requested: usize,
        buffered: usize,
        capacity: usize,
    },

    /// A buffer was moved between ring states in an order the ring forbids.
    #[error("Invalid buffer transition for {id}: {from} -> {to}")]
    InvalidBufferTransition {
        id: BufferId,
        from: &'static str,
        to: &'static str,
    },

    // ========================================================================
    // Device Errors
    // ========================================================================
    /// The output voice rejected a queue/play request.
    #[error("Audio device failure: {0}")]
    DeviceFailure(String),

    // ========================================================================
    // Playback Control Errors
    // ========================================================================
    /// Attempted operation when no source is loaded.
    #[error("No source loaded")]
    NoSourceLoaded,

    /// Invalid volume value (must be in range [0.0, 1.0]).
    #[error("Invalid volume: {0} (must be between 0.0 and 1.0)")]
    InvalidVolume(f32),

    /// Streaming configuration failed validation.
    #[error("Invalid streaming config: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if this error ends the current playback attempt.
    ///
    /// Fatal errors raised on the feeder thread stop the controller and are
    /// reported; nothing is retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlaybackError::MalformedStream(_)
                | PlaybackError::SourceFailed { .. }
                | PlaybackError::Codec(_)
                | PlaybackError::AccumulatorOverflow { .. }
                | PlaybackError::InvalidBufferTransition { .. }
                | PlaybackError::DeviceFailure(_)
                | PlaybackError::Internal(_)
        )
    }

    /// Returns `true` if this error is related to the encoded bitstream.
    pub fn is_stream_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::MalformedStream(_)
                | PlaybackError::SourceFailed { .. }
                | PlaybackError::Codec(_)
        )
    }

    /// Short machine-readable name, used in published events.
    pub fn kind(&self) -> &'static str {
        match self {
            PlaybackError::MalformedStream(_) => "malformed_stream",
            PlaybackError::SourceFailed { .. } => "source_failed",
            PlaybackError::Codec(_) => "codec",
            PlaybackError::AccumulatorOverflow { .. } => "accumulator_overflow",
            PlaybackError::InvalidBufferTransition { .. } => "invalid_buffer_transition",
            PlaybackError::DeviceFailure(_) => "device_failure",
            PlaybackError::NoSourceLoaded => "no_source_loaded",
            PlaybackError::InvalidVolume(_) => "invalid_volume",
            PlaybackError::InvalidConfig(_) => "invalid_config",
            PlaybackError::Internal(_) => "internal",
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_errors_are_not_fatal() {
        assert!(!PlaybackError::NoSourceLoaded.is_fatal());
        assert!(!PlaybackError::InvalidVolume(2.0).is_fatal());
        assert!(PlaybackError::MalformedStream("x".into()).is_fatal());
        assert!(PlaybackError::DeviceFailure("x".into()).is_fatal());
    }

    #[test]
    fn overflow_message_names_sizes() {
        let err = PlaybackError::AccumulatorOverflow {
            requested: 10,
            buffered: 60,
            capacity: 64,
        };
        assert_eq!(
            err.to_string(),
            "Accumulator overflow: 10 bytes requested with 60 of 64 in use"
        );
        assert_eq!(err.kind(), "accumulator_overflow");
    }

    #[test]
    fn source_failure_keeps_cause() {
        let err = PlaybackError::SourceFailed {
            attempts: 2,
            source: BridgeError::OperationFailed("disk gone".into()),
        };
        assert!(err.is_stream_error());
        assert!(err.to_string().contains("disk gone"));
    }
}
