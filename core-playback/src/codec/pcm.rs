//! Raw float PCM in page/packet framing.
//!
//! ## Packet layout
//!
//! | Packet | Layout |
//! |--------|--------|
//! | identification | `\x01RPCM`, version `u8` (0), channels `u8`, sample rate `u32` LE |
//! | comment | `\x03RPCM`, vendor length `u32` LE, vendor, tag count `u32` LE, then per tag: length `u32` LE, `KEY=value` |
//! | setup | `\x05RPCM` |
//! | audio | interleaved `f32` LE samples, whole frames only |

use crate::error::{PlaybackError, Result};
use crate::page::PageWriter;
use crate::traits::{CodecEngine, HeaderPackets, Packet, PcmBlock, StreamInfo};
use tracing::debug;

const MAGIC: &[u8; 4] = b"RPCM";
const IDENTIFICATION: u8 = 0x01;
const COMMENT: u8 = 0x03;
const SETUP: u8 = 0x05;
const VERSION: u8 = 0;

/// Decoder for raw float PCM streams.
#[derive(Debug, Default)]
pub struct RawPcmCodec {
    channels: usize,
}

impl RawPcmCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodecEngine for RawPcmCodec {
    fn init_from_header_packets(&mut self, headers: &HeaderPackets) -> Result<StreamInfo> {
        let id = expect_header(&headers.identification.data, IDENTIFICATION, "identification")?;
        if id.len() < 6 {
            return Err(PlaybackError::Codec(
                "identification header truncated".to_string(),
            ));
        }
        if id[0] != VERSION {
            return Err(PlaybackError::Codec(format!(
                "unsupported raw PCM version {}",
                id[0]
            )));
        }
        let channels = id[1] as u16;
        let sample_rate = u32::from_le_bytes([id[2], id[3], id[4], id[5]]);
        if channels == 0 || sample_rate == 0 {
            return Err(PlaybackError::Codec(format!(
                "invalid layout: {} channels at {} Hz",
                channels, sample_rate
            )));
        }

        let comment = expect_header(&headers.comment.data, COMMENT, "comment")?;
        let (vendor, comments) = parse_comment(comment)?;
        expect_header(&headers.setup.data, SETUP, "setup")?;

        self.channels = channels as usize;
        debug!(channels, sample_rate, "Raw PCM stream configured");

        Ok(StreamInfo {
            vendor: Some(vendor),
            comments,
            ..StreamInfo::new(channels, sample_rate)
        })
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<PcmBlock>> {
        if self.channels == 0 {
            return Err(PlaybackError::Codec(
                "audio packet before headers".to_string(),
            ));
        }
        let frame_bytes = self.channels * 4;
        if packet.data.len() % frame_bytes != 0 {
            return Err(PlaybackError::Codec(format!(
                "packet {} is {} bytes, not a whole number of {}-byte frames",
                packet.packet_no,
                packet.data.len(),
                frame_bytes
            )));
        }
        if packet.is_empty() {
            return Ok(Vec::new());
        }

        let samples: Vec<f32> = packet
            .data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(vec![PcmBlock::from_interleaved(&samples, self.channels)])
    }

    fn reset(&mut self) {
        self.channels = 0;
    }

    fn name(&self) -> &'static str {
        "raw-pcm"
    }
}

fn expect_header<'a>(data: &'a [u8], kind: u8, what: &str) -> Result<&'a [u8]> {
    if data.len() < 5 || data[0] != kind || &data[1..5] != MAGIC {
        return Err(PlaybackError::Codec(format!("missing {} header", what)));
    }
    Ok(&data[5..])
}

fn parse_comment(mut data: &[u8]) -> Result<(String, Vec<(String, String)>)> {
    fn take_u32(data: &mut &[u8]) -> Result<u32> {
        if data.len() < 4 {
            return Err(PlaybackError::Codec("comment header truncated".to_string()));
        }
        let value = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        *data = &data[4..];
        Ok(value)
    }

    fn take_str(data: &mut &[u8]) -> Result<String> {
        let len = take_u32(data)? as usize;
        if data.len() < len {
            return Err(PlaybackError::Codec("comment header truncated".to_string()));
        }
        let text = String::from_utf8_lossy(&data[..len]).into_owned();
        *data = &data[len..];
        Ok(text)
    }

    let vendor = take_str(&mut data)?;
    let count = take_u32(&mut data)?;
    let mut comments = Vec::new();
    for _ in 0..count {
        let entry = take_str(&mut data)?;
        // Entries without '=' are ignored.
        if let Some((key, value)) = entry.split_once('=') {
            comments.push((key.to_string(), value.to_string()));
        }
    }
    Ok((vendor, comments))
}

// ============================================================================
// Encoder
// ============================================================================

/// Builds complete raw PCM streams.
#[derive(Debug, Clone)]
pub struct RawPcmEncoder {
    channels: u8,
    sample_rate: u32,
    vendor: String,
    comments: Vec<(String, String)>,
    frames_per_packet: usize,
    packets_per_page: usize,
    serial: u32,
}

impl RawPcmEncoder {
    pub fn new(channels: u8, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            vendor: "core-playback raw pcm".to_string(),
            comments: Vec::new(),
            frames_per_packet: 1024,
            packets_per_page: 4,
            serial: 0x5043_4d30,
        }
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    pub fn with_comment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.comments.push((key.into(), value.into()));
        self
    }

    pub fn with_frames_per_packet(mut self, frames: usize) -> Self {
        self.frames_per_packet = frames.max(1);
        self
    }

    pub fn with_packets_per_page(mut self, packets: usize) -> Self {
        self.packets_per_page = packets.max(1);
        self
    }

    pub fn with_serial(mut self, serial: u32) -> Self {
        self.serial = serial;
        self
    }

    /// Identification, comment and setup packets.
    pub fn header_packets(&self) -> [Vec<u8>; 3] {
        let mut id = vec![IDENTIFICATION];
        id.extend_from_slice(MAGIC);
        id.push(VERSION);
        id.push(self.channels);
        id.extend_from_slice(&self.sample_rate.to_le_bytes());

        let mut comment = vec![COMMENT];
        comment.extend_from_slice(MAGIC);
        push_str(&mut comment, &self.vendor);
        comment.extend_from_slice(&(self.comments.len() as u32).to_le_bytes());
        for (key, value) in &self.comments {
            push_str(&mut comment, &format!("{}={}", key, value));
        }

        let mut setup = vec![SETUP];
        setup.extend_from_slice(MAGIC);

        [id, comment, setup]
    }

    /// Audio packets for interleaved `samples`, `frames_per_packet` frames each.
    pub fn audio_packets(&self, samples: &[f32]) -> Vec<Vec<u8>> {
        let per_packet = self.frames_per_packet * self.channels.max(1) as usize;
        samples
            .chunks(per_packet)
            .map(|chunk| chunk.iter().flat_map(|s| s.to_le_bytes()).collect())
            .collect()
    }

    /// A complete paged stream carrying `samples`.
    ///
    /// Each header packet gets a page of its own; audio pages hold
    /// `packets_per_page` packets.
    pub fn encode(&self, samples: &[f32]) -> Vec<u8> {
        let mut writer = PageWriter::new(self.serial);
        for header in self.header_packets() {
            writer.write_packet(&header, 0);
            writer.flush();
        }

        let channels = self.channels.max(1) as i64;
        let mut granule = 0i64;
        for (i, packet) in self.audio_packets(samples).iter().enumerate() {
            granule += packet.len() as i64 / 4 / channels;
            writer.write_packet(packet, granule);
            if (i + 1) % self.packets_per_page == 0 {
                writer.flush();
            }
        }
        writer.finish()
    }

    /// A stream of `frames` frames of silence.
    pub fn encode_silence(&self, frames: usize) -> Vec<u8> {
        self.encode(&vec![0.0; frames * self.channels as usize])
    }
}

fn push_str(out: &mut Vec<u8>, text: &str) {
    out.extend_from_slice(&(text.len() as u32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
}
