//! # Desktop Bridge Implementations
//!
//! Default implementations of the bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - [`MemoryByteSource`] serves an in-memory encoded stream, optionally in
//!   short reads to exercise framing across chunk boundaries
//! - [`FileByteSource`] reads an encoded stream from disk using `std::fs`
//! - [`SoftwareVoice`] is a clock-paced output device that "plays" queued PCM
//!   in real time (or scaled time) on its own thread and hands finished
//!   buffers back through `unqueue`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{FileByteSource, SoftwareVoice};
//! use bridge_traits::{ByteSource, Voice};
//!
//! let source = FileByteSource::open("track.ogg")?;
//! let voice = SoftwareVoice::new();
//! // Hand both to a streaming controller.
//! ```

mod source;
mod voice;

pub use source::{FileByteSource, MemoryByteSource};
pub use voice::{PcmSink, SoftwareVoice};
