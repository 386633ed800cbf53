//! # Stream Decoder
//!
//! Pull-based decoding of one byte source: packets from the
//! [`PacketFramer`] go through the [`CodecEngine`] into the
//! [`PcmAccumulator`], and callers take fixed-size PCM chunks out with
//! [`next_chunk`](StreamDecoder::next_chunk).
//!
//! ## Lifecycle
//!
//! ```text
//! new(codec) --open(source)--> open --next_chunk*--> end of stream
//!                                ^                        |
//!                                +-------- reset() -------+
//! ```
//!
//! The stream layout (channels, rate, bit depth) is fixed once the headers
//! are parsed and stays the same for as long as the source is bound;
//! [`reset`](StreamDecoder::reset) re-reads the headers and fails if they
//! describe a different layout.

use crate::accumulator::PcmAccumulator;
use crate::config::StreamingConfig;
use crate::error::{PlaybackError, Result};
use crate::framer::{FramerStats, PacketFramer};
use crate::traits::{CodecEngine, StreamInfo};
use bridge_traits::ByteSource;
use bytes::Bytes;
use tracing::{debug, info, instrument};

/// Decoding counters for the bound source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub framer: FramerStats,
    /// Audio packets passed to the codec.
    pub packets_decoded: u64,
    /// PCM blocks the codec produced.
    pub blocks_decoded: u64,
    /// 16-bit PCM bytes produced.
    pub bytes_decoded: u64,
    /// Chunks handed out by `next_chunk`.
    pub chunks_served: u64,
}

/// Framer, codec and accumulator bound to one byte source.
pub struct StreamDecoder {
    codec: Box<dyn CodecEngine>,
    accumulator: PcmAccumulator,
    framer: Option<PacketFramer>,
    info: Option<StreamInfo>,
    read_chunk_bytes: usize,
    io_retries: u32,
    end_of_stream: bool,
    closed: bool,
    stats: DecoderStats,
}

impl StreamDecoder {
    /// Create a decoder with no source bound.
    pub fn new(codec: Box<dyn CodecEngine>, config: &StreamingConfig) -> Self {
        Self {
            codec,
            accumulator: PcmAccumulator::new(config.accumulator_capacity),
            framer: None,
            info: None,
            read_chunk_bytes: config.read_chunk_bytes,
            io_retries: config.io_retries,
            end_of_stream: false,
            closed: false,
            stats: DecoderStats::default(),
        }
    }

    /// Bind `source`, replacing any previous one, and parse its headers.
    ///
    /// On failure the source is closed and the decoder is left without a
    /// source.
    #[instrument(skip_all, fields(source = %source.describe(), codec = self.codec.name()))]
    pub fn open(&mut self, source: Box<dyn ByteSource>) -> Result<StreamInfo> {
        // Dropping the framer closes the previous source.
        self.framer = None;
        self.info = None;

        let mut framer = PacketFramer::new(source, self.read_chunk_bytes, self.io_retries);
        let info = self.start(&mut framer)?;
        self.framer = Some(framer);
        self.info = Some(info.clone());

        info!(
            channels = info.channels,
            sample_rate = info.sample_rate,
            vendor = ?info.vendor,
            "Stream opened"
        );
        Ok(info)
    }

    /// Produce the next chunk of `size` bytes, or fewer at the end of the
    /// stream. `None` once everything has been handed out.
    pub fn next_chunk(&mut self, size: usize) -> Result<Option<Bytes>> {
        let framer = self.framer.as_mut().ok_or(PlaybackError::NoSourceLoaded)?;
        if self.end_of_stream || self.closed {
            return Ok(None);
        }

        while self.accumulator.available() < size && !self.accumulator.is_exhausted() {
            match framer.next_packet()? {
                Some(packet) => {
                    let blocks = self.codec.decode(&packet)?;
                    self.stats.packets_decoded += 1;
                    for block in &blocks {
                        let appended = self.accumulator.append(block)?;
                        self.stats.blocks_decoded += 1;
                        self.stats.bytes_decoded += appended as u64;
                    }
                }
                None => {
                    debug!(
                        buffered = self.accumulator.available(),
                        "Source exhausted, draining accumulator"
                    );
                    self.accumulator.mark_exhausted();
                }
            }
        }

        let pulled = self.accumulator.pull(size);
        if self.accumulator.is_drained() {
            self.end_of_stream = true;
            debug!(bytes = self.accumulator.bytes_read(), "End of stream");
        }
        if pulled.data.is_empty() {
            return Ok(None);
        }
        self.stats.chunks_served += 1;
        Ok(Some(pulled.data))
    }

    /// Restart decoding from byte 0 of the bound source.
    ///
    /// Works after [`close`](Self::close), which it undoes.
    #[instrument(skip(self), fields(codec = self.codec.name()))]
    pub fn reset(&mut self) -> Result<()> {
        let mut framer = self.framer.take().ok_or(PlaybackError::NoSourceLoaded)?;
        let result = framer.rewind().and_then(|_| self.start(&mut framer));
        // Keep the framer even on failure so a later reset can retry.
        self.framer = Some(framer);
        let info = result?;

        if let Some(previous) = &self.info {
            if !previous.same_layout(&info) {
                return Err(PlaybackError::MalformedStream(format!(
                    "stream layout changed on reset: {}ch/{}Hz -> {}ch/{}Hz",
                    previous.channels, previous.sample_rate, info.channels, info.sample_rate
                )));
            }
        }
        self.info = Some(info);
        debug!("Decoder reset");
        Ok(())
    }

    /// Release the source handle. [`reset`](Self::reset) reopens it.
    pub fn close(&mut self) {
        if let Some(framer) = self.framer.as_mut() {
            framer.close();
            self.closed = true;
        }
    }

    pub fn has_source(&self) -> bool {
        self.framer.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// `true` once the source is exhausted and every decoded byte was pulled.
    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Layout of the bound stream.
    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.info.as_ref()
    }

    /// Bytes decoded but not yet pulled.
    pub fn buffered_bytes(&self) -> usize {
        self.accumulator.available()
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            framer: self
                .framer
                .as_ref()
                .map(PacketFramer::stats)
                .unwrap_or_default(),
            ..self.stats.clone()
        }
    }

    /// Give up the decoder, keeping only the codec. The bound source is closed.
    pub fn into_codec(self) -> Box<dyn CodecEngine> {
        self.codec
    }

    /// Read headers from a freshly positioned framer and configure the codec.
    fn start(&mut self, framer: &mut PacketFramer) -> Result<StreamInfo> {
        self.codec.reset();
        self.accumulator.reset();
        self.end_of_stream = false;
        self.closed = false;
        self.stats = DecoderStats::default();

        let headers = framer.read_headers()?;
        let info = self.codec.init_from_header_packets(&headers)?;
        if info.channels == 0 || info.sample_rate == 0 || info.bits_per_sample != 16 {
            return Err(PlaybackError::Codec(format!(
                "codec reported unusable layout: {} channels, {} Hz, {} bits",
                info.channels, info.sample_rate, info.bits_per_sample
            )));
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{RawPcmCodec, RawPcmEncoder};
    use crate::traits::{HeaderPackets, Packet, PcmBlock};
    use bridge_desktop::MemoryByteSource;
    use mockall::mock;

    mock! {
        Codec {}

        impl CodecEngine for Codec {
            fn init_from_header_packets(&mut self, headers: &HeaderPackets) -> Result<StreamInfo>;
            fn decode(&mut self, packet: &Packet) -> Result<Vec<PcmBlock>>;
            fn reset(&mut self);
            fn name(&self) -> &'static str;
        }
    }

    fn config() -> StreamingConfig {
        StreamingConfig {
            accumulator_capacity: 64 * 1024,
            read_chunk_bytes: 512,
            ..Default::default()
        }
    }

    fn source(bytes: Vec<u8>) -> Box<dyn ByteSource> {
        Box::new(MemoryByteSource::new(bytes))
    }

    fn decoder() -> StreamDecoder {
        StreamDecoder::new(Box::new(RawPcmCodec::new()), &config())
    }

    #[test]
    fn test_next_chunk_without_source() {
        let mut decoder = decoder();
        assert!(matches!(
            decoder.next_chunk(16),
            Err(PlaybackError::NoSourceLoaded)
        ));
        assert!(matches!(decoder.reset(), Err(PlaybackError::NoSourceLoaded)));
    }

    #[test]
    fn test_chunks_cover_whole_stream() {
        let bytes = RawPcmEncoder::new(1, 8_000)
            .with_frames_per_packet(100)
            .encode_silence(1_000);
        let mut decoder = decoder();
        let info = decoder.open(source(bytes)).unwrap();
        assert_eq!(info.channels, 1);

        let mut sizes = Vec::new();
        while let Some(chunk) = decoder.next_chunk(768).unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes.iter().sum::<usize>(), 2_000);
        assert!(sizes[..sizes.len() - 1].iter().all(|&n| n == 768));
        assert_eq!(*sizes.last().unwrap(), 2_000 % 768);
        assert!(decoder.is_end_of_stream());
        assert!(decoder.next_chunk(768).unwrap().is_none());
    }

    #[test]
    fn test_reset_replays_identical_bytes() {
        let samples: Vec<f32> = (0..600).map(|i| (i as f32 / 600.0) - 0.5).collect();
        let bytes = RawPcmEncoder::new(2, 8_000)
            .with_frames_per_packet(50)
            .encode(&samples);
        let mut decoder = decoder();
        decoder.open(source(bytes)).unwrap();

        let first: Vec<Bytes> = std::iter::from_fn(|| decoder.next_chunk(256).unwrap()).collect();
        decoder.reset().unwrap();
        let second: Vec<Bytes> = std::iter::from_fn(|| decoder.next_chunk(256).unwrap()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_reset_after_close_reopens() {
        let bytes = RawPcmEncoder::new(1, 8_000).encode_silence(100);
        let mut decoder = decoder();
        decoder.open(source(bytes)).unwrap();
        decoder.close();
        assert!(decoder.is_closed());
        assert!(decoder.next_chunk(64).unwrap().is_none());

        decoder.reset().unwrap();
        assert!(!decoder.is_closed());
        assert_eq!(decoder.next_chunk(64).unwrap().map(|c| c.len()), Some(64));
    }

    #[test]
    fn test_buffered_bytes_track_partial_pulls() {
        let bytes = RawPcmEncoder::new(1, 8_000)
            .with_frames_per_packet(100)
            .encode_silence(300);
        let mut decoder = decoder();
        decoder.open(source(bytes)).unwrap();
        assert_eq!(decoder.buffered_bytes(), 0);

        // One packet of 100 frames is 200 bytes.
        decoder.next_chunk(64).unwrap();
        assert_eq!(decoder.buffered_bytes(), 136);
        decoder.next_chunk(136).unwrap();
        assert_eq!(decoder.buffered_bytes(), 0);

        decoder.reset().unwrap();
        assert_eq!(decoder.buffered_bytes(), 0);
    }

    #[test]
    fn test_into_codec_returns_engine() {
        let bytes = RawPcmEncoder::new(1, 8_000).encode_silence(10);
        let mut decoder = decoder();
        decoder.open(source(bytes)).unwrap();

        let codec = decoder.into_codec();
        assert_eq!(codec.name(), "raw-pcm");

        let again = RawPcmEncoder::new(2, 16_000).encode_silence(10);
        let mut decoder = StreamDecoder::new(codec, &config());
        let info = decoder.open(source(again)).unwrap();
        assert_eq!((info.channels, info.sample_rate), (2, 16_000));
    }

    #[test]
    fn test_failed_open_keeps_codec_usable() {
        let mut decoder = decoder();
        assert!(matches!(
            decoder.open(source(b"definitely not a stream".to_vec())),
            Err(PlaybackError::MalformedStream(_))
        ));
        assert!(!decoder.has_source());

        let good = RawPcmEncoder::new(1, 8_000).encode_silence(10);
        assert!(decoder.open(source(good)).is_ok());
    }

    #[test]
    fn test_layout_change_on_reset_is_malformed() {
        let mut codec = MockCodec::new();
        let mut call = 0;
        codec.expect_reset().return_const(());
        codec.expect_name().return_const("mock");
        codec.expect_init_from_header_packets().returning(move |_| {
            call += 1;
            Ok(StreamInfo::new(if call == 1 { 1 } else { 2 }, 8_000))
        });

        let bytes = RawPcmEncoder::new(1, 8_000).encode_silence(10);
        let mut decoder = StreamDecoder::new(Box::new(codec), &config());
        decoder.open(source(bytes)).unwrap();
        assert!(matches!(
            decoder.reset(),
            Err(PlaybackError::MalformedStream(_))
        ));
    }

    #[test]
    fn test_overflow_surfaces_from_next_chunk() {
        let mut codec = MockCodec::new();
        codec.expect_reset().return_const(());
        codec.expect_name().return_const("mock");
        codec
            .expect_init_from_header_packets()
            .returning(|_| Ok(StreamInfo::new(1, 8_000)));
        codec
            .expect_decode()
            .returning(|_| Ok(vec![PcmBlock::new(vec![vec![0.0; 4096]])]));

        let bytes = RawPcmEncoder::new(1, 8_000).encode_silence(10);
        let small = StreamingConfig {
            accumulator_capacity: 1024,
            buffer_bytes: 512,
            ..Default::default()
        };
        let mut decoder = StreamDecoder::new(Box::new(codec), &small);
        decoder.open(source(bytes)).unwrap();
        assert!(matches!(
            decoder.next_chunk(512),
            Err(PlaybackError::AccumulatorOverflow { .. })
        ));
    }
}
