//! # Packet Framer
//!
//! Pulls raw bytes from a [`ByteSource`], synchronizes to page boundaries and
//! reassembles the packets of one logical stream.
//!
//! ## Behaviour
//!
//! - The first valid page selects the logical stream; pages with any other
//!   serial number are skipped.
//! - Packets split across pages are joined. A gap in page sequence numbers
//!   drops the packet under assembly together with the continued fragment at
//!   the start of the next page.
//! - A page flagged end-of-stream ends the stream after its packets.
//! - Corrupt bytes are skipped. Reaching the end of the source while bytes
//!   are still unsynchronized is [`PlaybackError::MalformedStream`].
//! - A failing source read is retried `io_retries` times before the framer
//!   gives up with [`PlaybackError::SourceFailed`].

use crate::error::{PlaybackError, Result};
use crate::page::{Page, PageSync};
use crate::traits::{HeaderPackets, Packet};
use bridge_traits::{BridgeError, ByteSource};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use tracing::{debug, instrument, warn};

/// Counters describing what the framer has seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramerStats {
    /// Pages of the selected stream accepted.
    pub pages_read: u64,
    /// Pages of other logical streams ignored.
    pub foreign_pages: u64,
    /// Packets handed out, headers included.
    pub packets_emitted: u64,
    /// Packets or fragments lost to sequence gaps and truncation.
    pub packets_dropped: u64,
    /// Bytes discarded while resynchronizing.
    pub bytes_skipped: u64,
    /// Times sync was regained after skipping bytes.
    pub resyncs: u64,
    /// Source reads that failed and were retried.
    pub read_retries: u64,
}

/// Page-to-packet framer bound to one byte source.
pub struct PacketFramer {
    source: Box<dyn ByteSource>,
    sync: PageSync,
    read_buf: Vec<u8>,
    io_retries: u32,
    serial: Option<u32>,
    expected_sequence: Option<u32>,
    partial: Option<BytesMut>,
    ready: VecDeque<Packet>,
    next_packet_no: u64,
    stream_ended: bool,
    stats: FramerStats,
}

impl PacketFramer {
    /// Create a framer reading `read_chunk_bytes` at a time.
    pub fn new(source: Box<dyn ByteSource>, read_chunk_bytes: usize, io_retries: u32) -> Self {
        Self {
            source,
            sync: PageSync::new(),
            read_buf: vec![0; read_chunk_bytes.max(1)],
            io_retries,
            serial: None,
            expected_sequence: None,
            partial: None,
            ready: VecDeque::new(),
            next_packet_no: 0,
            stream_ended: false,
            stats: FramerStats::default(),
        }
    }

    /// Read the three header packets that open the stream.
    ///
    /// Must be called before the first audio packet is requested.
    #[instrument(skip(self), fields(source = %self.source.describe()))]
    pub fn read_headers(&mut self) -> Result<HeaderPackets> {
        let mut headers = Vec::with_capacity(HeaderPackets::COUNT);
        while headers.len() < HeaderPackets::COUNT {
            match self.next_packet()? {
                Some(packet) => headers.push(packet),
                None => {
                    return Err(PlaybackError::MalformedStream(format!(
                        "stream ended after {} of {} header packets",
                        headers.len(),
                        HeaderPackets::COUNT
                    )));
                }
            }
        }

        let mut headers = headers.into_iter();
        match (headers.next(), headers.next(), headers.next()) {
            (Some(identification), Some(comment), Some(setup)) => {
                debug!(serial = ?self.serial, "Header packets read");
                Ok(HeaderPackets {
                    identification,
                    comment,
                    setup,
                })
            }
            _ => Err(PlaybackError::Internal(
                "header packet count mismatch".to_string(),
            )),
        }
    }

    /// Next packet in stream order, or `None` once the stream has ended.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if let Some(packet) = self.ready.pop_front() {
                self.stats.packets_emitted += 1;
                return Ok(Some(packet));
            }
            if self.stream_ended {
                return Ok(None);
            }

            match self.sync.next_page() {
                Some(page) => self.accept_page(page),
                None if self.sync.is_finished() => {
                    self.end_of_source()?;
                }
                None => self.fill()?,
            }
        }
    }

    /// `true` once the last packet has been handed out.
    pub fn is_finished(&self) -> bool {
        self.stream_ended && self.ready.is_empty()
    }

    /// Serial number of the selected logical stream.
    pub fn serial(&self) -> Option<u32> {
        self.serial
    }

    pub fn stats(&self) -> FramerStats {
        FramerStats {
            bytes_skipped: self.sync.bytes_skipped(),
            resyncs: self.sync.resync_count(),
            ..self.stats.clone()
        }
    }

    /// Restart from byte 0 of the source, discarding all framing state.
    #[instrument(skip(self), fields(source = %self.source.describe()))]
    pub fn rewind(&mut self) -> Result<()> {
        retry_io(self.io_retries, &mut self.stats.read_retries, "reset", || {
            self.source.reset()
        })?;
        self.sync.reset();
        self.serial = None;
        self.expected_sequence = None;
        self.partial = None;
        self.ready.clear();
        self.next_packet_no = 0;
        self.stream_ended = false;
        self.stats = FramerStats::default();
        Ok(())
    }

    /// Release the source handle. A later [`rewind`](Self::rewind) reopens it.
    pub fn close(&mut self) {
        self.source.close();
    }

    fn fill(&mut self) -> Result<()> {
        let source = &mut self.source;
        let buf = &mut self.read_buf;
        let n = retry_io(self.io_retries, &mut self.stats.read_retries, "read", || {
            source.read(&mut buf[..])
        })?;
        if n == 0 {
            debug!(buffered = self.sync.buffered(), "Byte source exhausted");
            self.sync.finish();
        } else {
            self.sync.push(&self.read_buf[..n]);
        }
        Ok(())
    }

    fn end_of_source(&mut self) -> Result<()> {
        self.stream_ended = true;
        if self.sync.pending_skip() > 0 {
            return Err(PlaybackError::MalformedStream(format!(
                "{} bytes at end of source could not be synchronized",
                self.sync.pending_skip()
            )));
        }
        if self.stats.pages_read == 0 {
            return Err(PlaybackError::MalformedStream(
                "no valid page found".to_string(),
            ));
        }
        if self.partial.take().is_some() {
            warn!("Source ended inside a packet, dropping it");
            self.stats.packets_dropped += 1;
        }
        Ok(())
    }

    fn accept_page(&mut self, page: Page) {
        match self.serial {
            None => {
                debug!(serial = page.serial, "Selected logical stream");
                self.serial = Some(page.serial);
            }
            Some(serial) if serial != page.serial => {
                debug!(serial = page.serial, "Skipping page of another stream");
                self.stats.foreign_pages += 1;
                return;
            }
            Some(_) => {}
        }
        self.stats.pages_read += 1;

        if let Some(expected) = self.expected_sequence {
            if page.sequence != expected {
                warn!(expected, found = page.sequence, "Page sequence gap");
                if self.partial.take().is_some() {
                    self.stats.packets_dropped += 1;
                }
            }
        }
        self.expected_sequence = Some(page.sequence.wrapping_add(1));

        let mut fragments = page.fragments().into_iter();
        if page.is_continued() && self.partial.is_none() {
            if fragments.next().is_some() {
                debug!(sequence = page.sequence, "Dropping orphaned continuation");
                self.stats.packets_dropped += 1;
            }
        } else if !page.is_continued() && self.partial.take().is_some() {
            warn!(sequence = page.sequence, "Packet left unterminated, dropping it");
            self.stats.packets_dropped += 1;
        }

        let first_new = self.ready.len();
        for fragment in fragments {
            let data: Bytes = match (self.partial.take(), fragment.complete) {
                (Some(mut buf), complete) => {
                    buf.extend_from_slice(&fragment.data);
                    if !complete {
                        self.partial = Some(buf);
                        continue;
                    }
                    buf.freeze()
                }
                (None, true) => fragment.data,
                (None, false) => {
                    self.partial = Some(BytesMut::from(&fragment.data[..]));
                    continue;
                }
            };
            self.ready.push_back(Packet {
                data,
                packet_no: self.next_packet_no,
                granule_position: page.granule_position,
                end_of_stream: false,
            });
            self.next_packet_no += 1;
        }

        if page.is_last() {
            if self.ready.len() > first_new {
                if let Some(last) = self.ready.back_mut() {
                    last.end_of_stream = true;
                }
            }
            if self.partial.take().is_some() {
                warn!("Final page left a packet unterminated, dropping it");
                self.stats.packets_dropped += 1;
            }
            debug!(sequence = page.sequence, "End of logical stream");
            self.stream_ended = true;
        }
    }
}

impl Drop for PacketFramer {
    fn drop(&mut self) {
        self.source.close();
    }
}

/// Run a source operation, retrying failures up to `retries` times.
fn retry_io<T>(
    retries: u32,
    retry_counter: &mut u64,
    what: &str,
    mut op: impl FnMut() -> std::result::Result<T, BridgeError>,
) -> Result<T> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempts <= retries => {
                warn!(attempt = attempts, error = %e, "Source {} failed, retrying", what);
                *retry_counter += 1;
            }
            Err(source) => return Err(PlaybackError::SourceFailed { attempts, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageWriter;
    use bridge_desktop::MemoryByteSource;

    fn stream(packets: &[&[u8]], flush_each: bool) -> Vec<u8> {
        let mut writer = PageWriter::new(77);
        for (i, packet) in packets.iter().enumerate() {
            writer.write_packet(packet, i as i64);
            if flush_each {
                writer.flush();
            }
        }
        writer.finish()
    }

    fn framer(bytes: Vec<u8>, chunk: usize) -> PacketFramer {
        let source = MemoryByteSource::new(bytes).with_read_limit(chunk);
        PacketFramer::new(Box::new(source), 64, 1)
    }

    fn drain(framer: &mut PacketFramer) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Some(packet) = framer.next_packet().unwrap() {
            out.push(packet);
        }
        out
    }

    #[test]
    fn test_reads_headers_then_audio() {
        let bytes = stream(&[b"id", b"comment", b"setup", b"audio0", b"audio1"], true);
        let mut framer = framer(bytes, 7);

        let headers = framer.read_headers().unwrap();
        assert_eq!(&headers.identification.data[..], b"id");
        assert_eq!(&headers.setup.data[..], b"setup");

        let audio = drain(&mut framer);
        assert_eq!(audio.len(), 2);
        assert_eq!(audio[0].packet_no, 3);
        assert!(!audio[0].end_of_stream);
        assert!(audio[1].end_of_stream);
        assert!(framer.is_finished());
        assert_eq!(framer.serial(), Some(77));
    }

    #[test]
    fn test_missing_headers_is_malformed() {
        let bytes = stream(&[b"id", b"comment"], true);
        let mut framer = framer(bytes, 4096);
        let err = framer.read_headers().unwrap_err();
        assert!(matches!(err, PlaybackError::MalformedStream(_)));
    }

    #[test]
    fn test_empty_source_is_malformed() {
        let mut framer = framer(Vec::new(), 4096);
        assert!(matches!(
            framer.next_packet(),
            Err(PlaybackError::MalformedStream(_))
        ));
    }

    #[test]
    fn test_multi_page_packet_is_joined() {
        let big = vec![0xAB; 70_000];
        let bytes = stream(&[&big, b"tail"], false);
        let mut framer = framer(bytes, 1000);

        let packets = drain(&mut framer);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].data.len(), 70_000);
        assert_eq!(&packets[1].data[..], b"tail");
        assert!(framer.stats().pages_read >= 2);
    }

    #[test]
    fn test_foreign_serial_is_skipped() {
        let mut bytes = stream(&[b"a", b"b"], true);
        // Splice a page from another stream between the two pages.
        let mut other = PageWriter::new(99);
        other.write_packet(b"other", 0);
        let other = other.finish();
        let first_page_len = 27 + 1 + 1;
        bytes.splice(first_page_len..first_page_len, other);

        let mut framer = framer(bytes, 4096);
        let packets = drain(&mut framer);
        let payloads: Vec<&[u8]> = packets.iter().map(|p| &p.data[..]).collect();
        assert_eq!(payloads, vec![&b"a"[..], &b"b"[..]]);
        assert_eq!(framer.stats().foreign_pages, 1);
    }

    #[test]
    fn test_trailing_junk_is_malformed() {
        let mut bytes = stream(&[b"only"], true);
        bytes.extend_from_slice(b"trailing junk");
        let mut ended = framer(bytes, 4096);

        assert!(ended.next_packet().unwrap().is_some());
        // The final page carried EOS, so the junk after it is never read.
        assert!(ended.next_packet().unwrap().is_none());

        let mut writer = PageWriter::new(1);
        writer.write_packet(b"open", 0);
        writer.flush();
        let mut bytes = writer.written().to_vec();
        bytes.extend_from_slice(b"junk");
        let mut open = framer(bytes, 4096);
        assert!(open.next_packet().unwrap().is_some());
        assert!(matches!(
            open.next_packet(),
            Err(PlaybackError::MalformedStream(_))
        ));
    }

    #[test]
    fn test_rewind_restarts_numbering() {
        let bytes = stream(&[b"x", b"y"], true);
        let mut framer = framer(bytes, 4096);
        assert_eq!(drain(&mut framer).len(), 2);

        framer.rewind().unwrap();
        let again = drain(&mut framer);
        assert_eq!(again.len(), 2);
        assert_eq!(again[0].packet_no, 0);
    }
}
