//! # Streaming Playback Core
//!
//! Decodes a paged, packetized audio bitstream on demand and feeds it to an
//! output voice through a small ring of reusable PCM buffers.
//!
//! ## Overview
//!
//! ```text
//! ByteSource -> PacketFramer -> CodecEngine -> PcmAccumulator
//!                      \___________ StreamDecoder ___________/
//!                                        |
//!                                   next_chunk
//!                                        v
//!                  BufferRing <-> StreamingPlaybackController <-> Voice
//! ```
//!
//! - [`page`]: byte-level page sync, CRC and the page writer
//! - [`framer`]: packet reassembly over one logical stream
//! - [`accumulator`]: float-to-i16 conversion into a bounded byte buffer
//! - [`decoder`]: pull-based chunk production
//! - [`buffer_ring`]: fixed pool of output buffers with checked transitions
//! - [`controller`]: play/pause/stop/rewind/loop/volume with a feeder thread
//! - [`codec`]: a raw PCM reference codec and encoder
//!
//! The codec itself is pluggable through [`CodecEngine`]; hosts provide
//! [`ByteSource`](bridge_traits::ByteSource) and
//! [`Voice`](bridge_traits::Voice) implementations.

pub mod accumulator;
pub mod buffer_ring;
pub mod codec;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod framer;
pub mod page;
pub mod traits;

pub use accumulator::{PcmAccumulator, Pulled};
pub use buffer_ring::{BufferRing, BufferState};
pub use codec::{RawPcmCodec, RawPcmEncoder};
pub use config::{PlaybackState, StreamingConfig, StreamingStats};
pub use controller::StreamingPlaybackController;
pub use decoder::{DecoderStats, StreamDecoder};
pub use error::{PlaybackError, Result};
pub use framer::{FramerStats, PacketFramer};
pub use page::{Page, PageSync, PageWriter};
pub use traits::{CodecEngine, HeaderPackets, Packet, PcmBlock, StreamInfo};
