mod common;

use bridge_desktop::MemoryByteSource;
use core_playback::codec::RawPcmEncoder;
use core_playback::{PacketFramer, PageWriter, PlaybackError};

const SERIAL: u32 = 0x00C0_FFEE;

/// Header pages followed by one page per audio packet, with `junk` spliced
/// in after the first `before` audio pages.
fn stream_with_junk(before: usize, after: usize, junk: &[u8]) -> Vec<u8> {
    let mut writer = PageWriter::new(SERIAL);
    for header in RawPcmEncoder::new(1, 8_000).header_packets() {
        writer.write_packet(&header, 0);
        writer.flush();
    }
    for i in 0..before {
        writer.write_packet(&packet(i), i as i64);
        writer.flush();
    }
    let split = writer.written().len();
    for i in before..before + after {
        writer.write_packet(&packet(i), i as i64);
        writer.flush();
    }
    let mut bytes = writer.finish();
    bytes.splice(split..split, junk.iter().copied());
    bytes
}

fn packet(i: usize) -> Vec<u8> {
    (i as f32 / 10.0).to_le_bytes().repeat(4)
}

fn collect(framer: &mut PacketFramer) -> Vec<Vec<u8>> {
    let mut packets = Vec::new();
    while let Some(packet) = framer.next_packet().unwrap() {
        packets.push(packet.data.to_vec());
    }
    packets
}

#[test]
fn test_resync_recovers_every_packet() {
    let bytes = stream_with_junk(4, 5, &[0xA5]);
    let source = MemoryByteSource::new(bytes).with_read_limit(97);
    let mut framer = PacketFramer::new(Box::new(source), 128, 1);

    framer.read_headers().unwrap();
    let packets = collect(&mut framer);

    assert_eq!(packets.len(), 9);
    for (i, data) in packets.iter().enumerate() {
        assert_eq!(data, &packet(i));
    }
    let stats = framer.stats();
    assert_eq!(stats.bytes_skipped, 1);
    assert!(stats.resyncs >= 1);
}

#[test]
fn test_false_capture_pattern_is_skipped() {
    // Looks like a page start but fails the version and CRC checks.
    let junk = b"OggS\x07garbage-that-is-not-a-page";
    let bytes = stream_with_junk(2, 3, junk);
    let mut framer = PacketFramer::new(Box::new(MemoryByteSource::new(bytes)), 4096, 1);

    framer.read_headers().unwrap();
    assert_eq!(collect(&mut framer).len(), 5);
    assert_eq!(framer.stats().bytes_skipped, junk.len() as u64);
}

#[test]
fn test_last_packet_carries_end_of_stream() {
    let bytes = stream_with_junk(0, 3, &[]);
    let mut framer = PacketFramer::new(Box::new(MemoryByteSource::new(bytes)), 4096, 1);
    framer.read_headers().unwrap();

    let mut last = None;
    while let Some(packet) = framer.next_packet().unwrap() {
        last = Some(packet);
    }
    let last = last.unwrap();
    assert!(last.end_of_stream);
    assert_eq!(last.packet_no, 5);
    assert!(framer.is_finished());
}

#[test]
fn test_pure_junk_is_malformed() {
    let source = MemoryByteSource::new(vec![0x5Au8; 10_000]);
    let mut framer = PacketFramer::new(Box::new(source), 1024, 1);
    assert!(matches!(
        framer.read_headers(),
        Err(PlaybackError::MalformedStream(_))
    ));
}

#[test]
fn test_source_failure_after_retry() {
    let bytes = stream_with_junk(0, 2, &[]);
    let source = common::FlakySource::new(bytes, 64, 0);
    let mut framer = PacketFramer::new(Box::new(source), 64, 1);

    match framer.read_headers() {
        Err(PlaybackError::SourceFailed { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("expected SourceFailed, got {:?}", other),
    }
    assert_eq!(framer.stats().read_retries, 1);
}
