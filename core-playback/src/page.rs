//! # Page Layer
//!
//! Byte-level handling of the page container: locating page boundaries in a
//! raw byte stream, validating them, and laying packets out into pages.
//!
//! ## Page layout
//!
//! ```text
//!  0      4  5  6           14      18      22      26 27        27+n
//!  +------+--+--+-----------+-------+-------+-------+--+----------+--------
//!  | OggS |v |fl| granule   |serial | seq   | crc   |n | lacing   | body
//!  +------+--+--+-----------+-------+-------+-------+--+----------+--------
//! ```
//!
//! All integers are little-endian. The CRC covers the whole page with the CRC
//! field zeroed. A lacing value below 255 terminates a packet; a page whose
//! last lacing value is 255 leaves its final packet open for the next page.
//!
//! ## Resynchronization
//!
//! [`PageSync`] never treats corrupt bytes as fatal. When the bytes at the
//! read position do not form a valid page it drops one byte and scans forward
//! for the next capture pattern. The number of dropped bytes is accounted so
//! callers can decide whether the stream as a whole was usable.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, warn};

/// Capture pattern that starts every page.
pub const CAPTURE_PATTERN: [u8; 4] = *b"OggS";

/// Size of the fixed page header, before the lacing table.
pub const HEADER_LEN: usize = 27;

/// Maximum number of lacing values in one page.
pub const MAX_SEGMENTS: usize = 255;

/// Largest possible page.
pub const MAX_PAGE_LEN: usize = HEADER_LEN + MAX_SEGMENTS + MAX_SEGMENTS * 255;

/// Header flag: the first packet on this page continues one from the previous page.
pub const FLAG_CONTINUED: u8 = 0x01;
/// Header flag: first page of a logical stream.
pub const FLAG_FIRST_PAGE: u8 = 0x02;
/// Header flag: last page of a logical stream.
pub const FLAG_LAST_PAGE: u8 = 0x04;

const CRC_OFFSET: usize = 22;

// ============================================================================
// Checksum
// ============================================================================

const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ 0x04C1_1DB7
            } else {
                r << 1
            };
            bit += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

fn crc_update(mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        crc = (crc << 8) ^ CRC_TABLE[(((crc >> 24) as u8) ^ byte) as usize];
    }
    crc
}

/// Page checksum: CRC-32, polynomial `0x04C11DB7`, initial value 0, no
/// reflection, no final xor.
pub fn page_crc(data: &[u8]) -> u32 {
    crc_update(0, data)
}

/// Checksum of a serialized page, treating its CRC field as zero.
fn page_crc_with_zeroed_field(page: &[u8]) -> u32 {
    let crc = crc_update(0, &page[..CRC_OFFSET]);
    let crc = crc_update(crc, &[0u8; 4]);
    crc_update(crc, &page[CRC_OFFSET + 4..])
}

// ============================================================================
// Page
// ============================================================================

/// One validated page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Header type flags (`FLAG_*`).
    pub flags: u8,
    /// Codec-defined position of the last packet completed on this page, or
    /// -1 when no packet completes here.
    pub granule_position: i64,
    /// Logical stream serial number.
    pub serial: u32,
    /// Page sequence number within the logical stream.
    pub sequence: u32,
    /// Lacing values.
    pub lacing: Vec<u8>,
    /// Page body.
    pub body: Bytes,
}

/// Slice of a page body belonging to one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFragment {
    pub data: Bytes,
    /// `false` when the packet continues on the next page.
    pub complete: bool,
}

impl Page {
    pub fn is_continued(&self) -> bool {
        self.flags & FLAG_CONTINUED != 0
    }

    pub fn is_first(&self) -> bool {
        self.flags & FLAG_FIRST_PAGE != 0
    }

    pub fn is_last(&self) -> bool {
        self.flags & FLAG_LAST_PAGE != 0
    }

    /// Serialized size of this page.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.lacing.len() + self.body.len()
    }

    /// Split the body along the lacing values.
    ///
    /// Every fragment but the last is complete. The last one is incomplete
    /// when the final lacing value is 255.
    pub fn fragments(&self) -> Vec<PageFragment> {
        let mut fragments = Vec::new();
        let mut start = 0usize;
        let mut end = 0usize;
        for &lace in &self.lacing {
            end += lace as usize;
            if lace < 255 {
                fragments.push(PageFragment {
                    data: self.body.slice(start..end),
                    complete: true,
                });
                start = end;
            }
        }
        if start < end || self.lacing.last() == Some(&255) {
            fragments.push(PageFragment {
                data: self.body.slice(start..end),
                complete: false,
            });
        }
        fragments
    }

    /// Serialize the page, computing its checksum.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&CAPTURE_PATTERN);
        out.push(0);
        out.push(self.flags);
        out.extend_from_slice(&self.granule_position.to_le_bytes());
        out.extend_from_slice(&self.serial.to_le_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.push(self.lacing.len() as u8);
        out.extend_from_slice(&self.lacing);
        out.extend_from_slice(&self.body);

        let crc = page_crc(&out);
        out[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        out
    }
}

// ============================================================================
// PageSync
// ============================================================================

/// Outcome of checking the bytes at the read position.
enum Candidate {
    Valid(usize),
    Invalid,
    Incomplete,
}

/// Byte-level page synchronizer.
///
/// Bytes are pushed in as they arrive from the source; validated pages come
/// out of [`next_page`](Self::next_page). Once [`finish`](Self::finish) has
/// been called no more bytes will arrive, so a candidate that would need
/// more data counts as corrupt and is skipped.
#[derive(Debug, Default)]
pub struct PageSync {
    buf: BytesMut,
    finished: bool,
    pending_skip: usize,
    bytes_skipped: u64,
    resyncs: u64,
    pages: u64,
}

impl PageSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Signal that the source is exhausted.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes buffered but not yet consumed as a page or skipped.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Total bytes discarded while resynchronizing.
    pub fn bytes_skipped(&self) -> u64 {
        self.bytes_skipped
    }

    /// Number of times a valid page was found after skipping bytes.
    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }

    /// Number of valid pages returned.
    pub fn page_count(&self) -> u64 {
        self.pages
    }

    /// Bytes skipped since the last valid page.
    pub fn pending_skip(&self) -> usize {
        self.pending_skip
    }

    /// Drop all buffered bytes and counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Return the next valid page, or `None` when more bytes are needed (or,
    /// after [`finish`](Self::finish), when the buffer is used up).
    pub fn next_page(&mut self) -> Option<Page> {
        loop {
            match find_capture(&self.buf) {
                Some(0) => {}
                Some(pos) => self.skip(pos),
                None => {
                    // Keep a tail that could be the start of a capture pattern.
                    let keep = if self.finished {
                        0
                    } else {
                        partial_capture_len(&self.buf)
                    };
                    let drop = self.buf.len() - keep;
                    if drop > 0 {
                        self.skip(drop);
                    }
                    return None;
                }
            }

            match self.check_candidate() {
                Candidate::Valid(len) => return Some(self.take_page(len)),
                Candidate::Invalid => self.skip(1),
                Candidate::Incomplete if self.finished => self.skip(1),
                Candidate::Incomplete => return None,
            }
        }
    }

    fn check_candidate(&self) -> Candidate {
        let buf = &self.buf[..];
        if buf.len() < HEADER_LEN {
            return Candidate::Incomplete;
        }
        if buf[4] != 0 {
            return Candidate::Invalid;
        }
        let segments = buf[26] as usize;
        if buf.len() < HEADER_LEN + segments {
            return Candidate::Incomplete;
        }
        let body_len: usize = buf[HEADER_LEN..HEADER_LEN + segments]
            .iter()
            .map(|&lace| lace as usize)
            .sum();
        let total = HEADER_LEN + segments + body_len;
        if buf.len() < total {
            return Candidate::Incomplete;
        }

        let stored = u32::from_le_bytes([
            buf[CRC_OFFSET],
            buf[CRC_OFFSET + 1],
            buf[CRC_OFFSET + 2],
            buf[CRC_OFFSET + 3],
        ]);
        if page_crc_with_zeroed_field(&buf[..total]) != stored {
            return Candidate::Invalid;
        }
        Candidate::Valid(total)
    }

    fn take_page(&mut self, len: usize) -> Page {
        let mut raw = self.buf.split_to(len).freeze();
        let segments = raw[26] as usize;

        raw.advance(5);
        let flags = raw.get_u8();
        let granule_position = raw.get_i64_le();
        let serial = raw.get_u32_le();
        let sequence = raw.get_u32_le();
        raw.advance(5);
        let lacing = raw.split_to(segments).to_vec();

        if self.pending_skip > 0 {
            self.resyncs += 1;
            warn!(
                skipped = self.pending_skip,
                serial, sequence, "Resynchronized after corrupt bytes"
            );
            self.pending_skip = 0;
        }
        self.pages += 1;

        Page {
            flags,
            granule_position,
            serial,
            sequence,
            lacing,
            body: raw,
        }
    }

    fn skip(&mut self, n: usize) {
        if self.pending_skip == 0 {
            debug!(buffered = self.buf.len(), "Lost page sync, scanning");
        }
        self.buf.advance(n);
        self.pending_skip += n;
        self.bytes_skipped += n as u64;
    }
}

fn find_capture(buf: &[u8]) -> Option<usize> {
    buf.windows(CAPTURE_PATTERN.len())
        .position(|window| window == CAPTURE_PATTERN)
}

/// Length of the longest suffix of `buf` that is a proper prefix of the
/// capture pattern.
fn partial_capture_len(buf: &[u8]) -> usize {
    (1..CAPTURE_PATTERN.len())
        .rev()
        .find(|&n| buf.len() >= n && buf[buf.len() - n..] == CAPTURE_PATTERN[..n])
        .unwrap_or(0)
}

// ============================================================================
// PageWriter
// ============================================================================

/// Lays packets out into pages.
///
/// Packets are laced into the current page until it holds
/// [`MAX_SEGMENTS`] lacing values; a packet that does not fit continues on the
/// next page. [`flush`](Self::flush) closes the current page early, which is
/// how header packets get pages of their own.
#[derive(Debug)]
pub struct PageWriter {
    serial: u32,
    sequence: u32,
    lacing: Vec<u8>,
    body: Vec<u8>,
    granule: i64,
    continued: bool,
    wrote_first: bool,
    last_page_start: Option<usize>,
    out: Vec<u8>,
}

impl PageWriter {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            sequence: 0,
            lacing: Vec::new(),
            body: Vec::new(),
            granule: -1,
            continued: false,
            wrote_first: false,
            last_page_start: None,
            out: Vec::new(),
        }
    }

    /// Append one packet completing at `granule`.
    pub fn write_packet(&mut self, packet: &[u8], granule: i64) {
        let mut remaining = packet;
        loop {
            if self.lacing.len() == MAX_SEGMENTS {
                let open = self.lacing.last() == Some(&255);
                self.emit_page(0);
                self.continued = open;
            }
            let take = remaining.len().min(255);
            self.lacing.push(take as u8);
            self.body.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            if take < 255 {
                break;
            }
        }
        self.granule = granule;
    }

    /// Close the current page if it holds anything.
    pub fn flush(&mut self) {
        if !self.lacing.is_empty() {
            self.emit_page(0);
        }
    }

    /// Close the stream, flagging the final page, and return all bytes.
    ///
    /// When everything has already been flushed the last emitted page is
    /// flagged in place; an empty final page is only written for a stream
    /// without any page.
    pub fn finish(mut self) -> Vec<u8> {
        match self.last_page_start {
            Some(start) if self.lacing.is_empty() => {
                let page = &mut self.out[start..];
                page[5] |= FLAG_LAST_PAGE;
                page[CRC_OFFSET..CRC_OFFSET + 4].fill(0);
                let crc = page_crc(page);
                page[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
            }
            _ => self.emit_page(FLAG_LAST_PAGE),
        }
        self.out
    }

    /// Bytes of completed pages so far.
    pub fn written(&self) -> &[u8] {
        &self.out
    }

    fn emit_page(&mut self, extra_flags: u8) {
        let mut flags = extra_flags;
        if self.continued {
            flags |= FLAG_CONTINUED;
        }
        if !self.wrote_first {
            flags |= FLAG_FIRST_PAGE;
            self.wrote_first = true;
        }
        // A page whose last lacing value is 255 completes nothing.
        let granule = if self.lacing.last() == Some(&255) {
            -1
        } else {
            self.granule
        };
        let page = Page {
            flags,
            granule_position: granule,
            serial: self.serial,
            sequence: self.sequence,
            lacing: std::mem::take(&mut self.lacing),
            body: Bytes::from(std::mem::take(&mut self.body)),
        };
        self.last_page_start = Some(self.out.len());
        self.out.extend_from_slice(&page.encode());
        self.sequence = self.sequence.wrapping_add(1);
        self.continued = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_page(packets: &[&[u8]]) -> Vec<u8> {
        let mut writer = PageWriter::new(0x1234);
        for (i, packet) in packets.iter().enumerate() {
            writer.write_packet(packet, i as i64);
        }
        writer.finish()
    }

    #[test]
    fn test_crc_reference_value() {
        // CRC-32/MPEG-2 style polynomial without the inverted init: "123456789"
        // under init 0 and no final xor.
        assert_eq!(page_crc(b"123456789"), 0x89A1_897F);
        assert_eq!(page_crc(&[]), 0);
    }

    #[test]
    fn test_encode_then_sync_single_page() {
        let bytes = single_page(&[b"abc", b"defg"]);
        let mut sync = PageSync::new();
        sync.push(&bytes);

        let page = sync.next_page().expect("page");
        assert!(page.is_first());
        assert!(page.is_last());
        assert!(!page.is_continued());
        assert_eq!(page.serial, 0x1234);
        assert_eq!(page.granule_position, 1);
        assert_eq!(page.lacing, vec![3, 4]);

        let fragments = page.fragments();
        assert_eq!(fragments.len(), 2);
        assert_eq!(&fragments[0].data[..], b"abc");
        assert!(fragments[1].complete);
        assert!(sync.next_page().is_none());
        assert_eq!(sync.bytes_skipped(), 0);
    }

    #[test]
    fn test_needs_more_bytes_for_partial_page() {
        let bytes = single_page(&[b"hello"]);
        let mut sync = PageSync::new();
        sync.push(&bytes[..bytes.len() - 2]);
        assert!(sync.next_page().is_none());
        assert_eq!(sync.bytes_skipped(), 0);

        sync.push(&bytes[bytes.len() - 2..]);
        assert!(sync.next_page().is_some());
    }

    #[test]
    fn test_skips_leading_garbage() {
        let mut bytes = b"garbage!".to_vec();
        bytes.extend(single_page(&[b"payload"]));

        let mut sync = PageSync::new();
        sync.push(&bytes);
        let page = sync.next_page().expect("page after garbage");
        assert_eq!(&page.fragments()[0].data[..], b"payload");
        assert_eq!(sync.bytes_skipped(), 8);
        assert_eq!(sync.resync_count(), 1);
        assert_eq!(sync.page_count(), 1);
    }

    #[test]
    fn test_corrupt_crc_is_skipped() {
        let mut first = single_page(&[b"one"]);
        let last = first.len() - 1;
        first[last] ^= 0xFF;
        let second = single_page(&[b"two"]);

        let mut sync = PageSync::new();
        sync.push(&first);
        sync.push(&second);
        let page = sync.next_page().expect("second page");
        assert_eq!(&page.fragments()[0].data[..], b"two");
        assert_eq!(sync.bytes_skipped() as usize, first.len());
    }

    #[test]
    fn test_keeps_partial_capture_pattern() {
        let bytes = single_page(&[b"x"]);
        let mut sync = PageSync::new();
        sync.push(b"zzOg");
        assert!(sync.next_page().is_none());
        // "Og" could still become a capture pattern.
        assert_eq!(sync.buffered(), 2);

        let mut sync = PageSync::new();
        sync.push(b"zz");
        sync.push(&bytes);
        assert!(sync.next_page().is_some());
    }

    #[test]
    fn test_finish_discards_truncated_page() {
        let bytes = single_page(&[b"truncated"]);
        let mut sync = PageSync::new();
        sync.push(&bytes[..bytes.len() - 3]);
        sync.finish();
        assert!(sync.next_page().is_none());
        assert_eq!(sync.buffered(), 0);
        assert_eq!(sync.bytes_skipped() as usize, bytes.len() - 3);
    }

    #[test]
    fn test_large_packet_spans_pages() {
        let packet = vec![7u8; 255 * 300];
        let mut writer = PageWriter::new(9);
        writer.write_packet(&packet, 42);
        let bytes = writer.finish();

        let mut sync = PageSync::new();
        sync.push(&bytes);
        let first = sync.next_page().expect("first");
        let second = sync.next_page().expect("second");
        assert!(sync.next_page().is_none());

        assert_eq!(first.lacing.len(), MAX_SEGMENTS);
        assert_eq!(first.granule_position, -1);
        assert!(!first.fragments()[0].complete);
        assert!(second.is_continued());
        assert!(second.is_last());
        assert_eq!(second.granule_position, 42);
        assert_eq!(second.sequence, 1);

        let total: usize = first.body.len() + second.body.len();
        assert_eq!(total, packet.len());
    }

    #[test]
    fn test_packet_of_exact_multiple_gets_terminator() {
        let packet = vec![1u8; 510];
        let bytes = single_page(&[&packet]);
        let mut sync = PageSync::new();
        sync.push(&bytes);
        let page = sync.next_page().unwrap();
        assert_eq!(page.lacing, vec![255, 255, 0]);
        let fragments = page.fragments();
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].complete);
        assert_eq!(fragments[0].data.len(), 510);
    }

    #[test]
    fn test_finish_after_flush_flags_last_page() {
        let mut writer = PageWriter::new(5);
        writer.write_packet(b"first", 0);
        writer.flush();
        writer.write_packet(b"second", 1);
        writer.flush();
        let bytes = writer.finish();

        let mut sync = PageSync::new();
        sync.push(&bytes);
        let first = sync.next_page().unwrap();
        let second = sync.next_page().unwrap();
        assert!(sync.next_page().is_none());
        assert!(first.is_first() && !first.is_last());
        assert!(second.is_last());
        assert_eq!(sync.bytes_skipped(), 0);
    }

    #[test]
    fn test_reset_clears_counters() {
        let mut sync = PageSync::new();
        sync.push(b"junkjunk");
        sync.finish();
        assert!(sync.next_page().is_none());
        assert!(sync.bytes_skipped() > 0);

        sync.reset();
        assert_eq!(sync.bytes_skipped(), 0);
        assert_eq!(sync.page_count(), 0);
        assert!(!sync.is_finished());
    }
}
