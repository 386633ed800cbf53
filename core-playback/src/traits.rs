//! # Codec Abstractions
//!
//! Types exchanged between the packet framer, the codec engine and the PCM
//! accumulator, and the [`CodecEngine`] trait that hides the codec
//! mathematics from the rest of the pipeline.
//!
//! ## Data flow
//!
//! ```text
//! PacketFramer --Packet--> CodecEngine --PcmBlock--> PcmAccumulator
//! ```
//!
//! - **Packet**: one decodable unit cut out of the page stream.
//! - **PcmBlock**: planar float samples, one plane per channel, consumed
//!   immediately by the accumulator.
//! - **StreamInfo**: layout fixed by the header packets for one open stream.
//!
//! ## Threading Model
//!
//! Codec engines are driven from the controller's feeder thread, always under
//! the controller lock, so they must be `Send` but need not be `Sync`.
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use core_playback::{CodecEngine, HeaderPackets, Packet};
//!
//! fn decode_all(codec: &mut dyn CodecEngine, headers: &HeaderPackets, packets: &[Packet]) {
//!     let info = codec.init_from_header_packets(headers).expect("headers");
//!     println!("{} channels @ {} Hz", info.channels, info.sample_rate);
//!     for packet in packets {
//!         for block in codec.decode(packet).expect("decode") {
//!             println!("{} frames", block.frames());
//!         }
//!     }
//! }
//! ```

use crate::error::Result;
use bridge_traits::PcmFormat;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ============================================================================
// Packets
// ============================================================================

/// One decodable unit reassembled from the page stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet payload.
    pub data: Bytes,
    /// Position of this packet in the logical stream, starting at 0.
    pub packet_no: u64,
    /// Granule position of the page on which the packet completed, or -1
    /// when that page completes no packet.
    pub granule_position: i64,
    /// `true` for the last packet of the last page of the stream.
    pub end_of_stream: bool,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>, packet_no: u64) -> Self {
        Self {
            data: data.into(),
            packet_no,
            granule_position: -1,
            end_of_stream: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The three header packets that open every stream, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPackets {
    pub identification: Packet,
    pub comment: Packet,
    pub setup: Packet,
}

impl HeaderPackets {
    /// Number of header packets preceding the first audio packet.
    pub const COUNT: usize = 3;

    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        [&self.identification, &self.comment, &self.setup].into_iter()
    }
}

// ============================================================================
// Decoded Audio
// ============================================================================

/// Planar float PCM produced by one decode call.
///
/// Samples are nominally in `[-1.0, 1.0]`. Values outside that range are
/// clipped later, when the accumulator converts them to 16-bit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PcmBlock {
    planes: Vec<Vec<f32>>,
}

impl PcmBlock {
    /// Build a block from one sample vector per channel.
    pub fn new(planes: Vec<Vec<f32>>) -> Self {
        Self { planes }
    }

    /// Deinterleave `samples` into `channels` planes.
    ///
    /// A trailing partial frame is dropped.
    pub fn from_interleaved(samples: &[f32], channels: usize) -> Self {
        if channels == 0 {
            return Self::default();
        }
        let frames = samples.len() / channels;
        let mut planes = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (plane, &sample) in planes.iter_mut().zip(frame) {
                plane.push(sample);
            }
        }
        Self { planes }
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    /// Samples per channel. Ragged blocks report the shortest plane.
    pub fn frames(&self) -> usize {
        self.planes.iter().map(Vec::len).min().unwrap_or(0)
    }

    /// `true` when the planes do not all have the same length.
    pub fn is_ragged(&self) -> bool {
        self.planes
            .iter()
            .any(|plane| plane.len() != self.planes[0].len())
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn planes(&self) -> &[Vec<f32>] {
        &self.planes
    }

    /// Size of this block once converted to 16-bit interleaved PCM.
    pub fn interleaved_bytes(&self) -> usize {
        self.frames() * self.channels() * 2
    }
}

/// Stream layout established by the header packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub channels: u16,
    pub sample_rate: u32,
    /// Bit depth of the PCM handed to the voice; always 16.
    pub bits_per_sample: u16,
    /// Encoder identification from the comment header.
    pub vendor: Option<String>,
    /// `KEY=value` tags from the comment header.
    pub comments: Vec<(String, String)>,
}

impl StreamInfo {
    pub fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            bits_per_sample: 16,
            vendor: None,
            comments: Vec::new(),
        }
    }

    /// Format of the PCM produced for this stream.
    pub fn pcm_format(&self) -> PcmFormat {
        PcmFormat {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bits_per_sample,
        }
    }

    /// `true` when both describe the same PCM layout; tags are ignored.
    pub fn same_layout(&self, other: &StreamInfo) -> bool {
        self.channels == other.channels
            && self.sample_rate == other.sample_rate
            && self.bits_per_sample == other.bits_per_sample
    }

    /// Look up a comment tag, case-insensitively.
    pub fn comment(&self, key: &str) -> Option<&str> {
        self.comments
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

// ============================================================================
// Codec Engine
// ============================================================================

/// Stateful packet decoder.
///
/// # Lifecycle
///
/// 1. `init_from_header_packets` once per open stream, with the three header
///    packets in order.
/// 2. `decode` for every audio packet, in stream order. A call may yield no
///    blocks (e.g. the first packet of an overlapped transform codec).
/// 3. `reset` before the stream is decoded again from the start.
pub trait CodecEngine: Send {
    /// Configure the codec from the header packets.
    fn init_from_header_packets(&mut self, headers: &HeaderPackets) -> Result<StreamInfo>;

    /// Decode one audio packet.
    fn decode(&mut self, packet: &Packet) -> Result<Vec<PcmBlock>>;

    /// Discard all decoding state.
    fn reset(&mut self);

    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "codec"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_interleaved() {
        let block = PcmBlock::from_interleaved(&[0.1, 0.2, 0.3, 0.4, 0.5], 2);
        assert_eq!(block.channels(), 2);
        assert_eq!(block.frames(), 2);
        assert_eq!(block.planes()[0], vec![0.1, 0.3]);
        assert_eq!(block.planes()[1], vec![0.2, 0.4]);
        assert_eq!(block.interleaved_bytes(), 8);
        assert!(!block.is_ragged());
    }

    #[test]
    fn test_ragged_block() {
        let block = PcmBlock::new(vec![vec![0.0; 4], vec![0.0; 3]]);
        assert!(block.is_ragged());
        assert_eq!(block.frames(), 3);
    }

    #[test]
    fn test_zero_channels() {
        let block = PcmBlock::from_interleaved(&[1.0, 2.0], 0);
        assert!(block.is_empty());
        assert_eq!(block.channels(), 0);
    }

    #[test]
    fn test_stream_info_layout() {
        let mut a = StreamInfo::new(2, 44_100);
        let b = StreamInfo::new(2, 44_100);
        a.vendor = Some("test".to_string());
        a.comments.push(("TITLE".to_string(), "Theme".to_string()));

        assert!(a.same_layout(&b));
        assert!(!a.same_layout(&StreamInfo::new(1, 44_100)));
        assert_eq!(a.comment("title"), Some("Theme"));
        assert_eq!(a.pcm_format().bytes_per_frame(), 4);
    }

    #[test]
    fn test_header_iteration_order() {
        let headers = HeaderPackets {
            identification: Packet::new(vec![1u8], 0),
            comment: Packet::new(vec![3u8], 1),
            setup: Packet::new(vec![5u8], 2),
        };
        let numbers: Vec<u64> = headers.iter().map(|p| p.packet_no).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
        assert_eq!(HeaderPackets::COUNT, 3);
    }
}
