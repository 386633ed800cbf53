//! # Streaming Playback Example
//!
//! Encodes a short stereo tone as a paged raw PCM stream, then plays it
//! through the software voice with a pause in the middle, printing the
//! controller's events as they arrive.
//!
//! Pass a path to play an existing raw PCM stream from disk instead.
//!
//! Run with: `cargo run --example playback_demo --package core-playback [path]`

use anyhow::Context;
use bridge_desktop::{FileByteSource, MemoryByteSource, SoftwareVoice};
use bridge_traits::ByteSource;
use core_playback::codec::{RawPcmCodec, RawPcmEncoder};
use core_playback::{StreamingConfig, StreamingPlaybackController};
use core_runtime::events::{CoreEvent, PlaybackEvent};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SAMPLE_RATE: u32 = 44_100;

/// Two seconds of a 440 Hz tone, slightly quieter on the right.
fn tone() -> Vec<u8> {
    let frames = SAMPLE_RATE as usize * 2;
    let samples: Vec<f32> = (0..frames)
        .flat_map(|i| {
            let t = i as f64 / SAMPLE_RATE as f64;
            let s = (2.0 * std::f64::consts::PI * 440.0 * t).sin() as f32 * 0.3;
            [s, s * 0.8]
        })
        .collect();

    RawPcmEncoder::new(2, SAMPLE_RATE)
        .with_vendor("playback_demo")
        .with_comment("TITLE", "A440")
        .encode(&samples)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_logging(
        LoggingConfig::default()
            .with_format(LogFormat::Compact)
            .with_thread_info(true),
    )?;

    let source: Box<dyn ByteSource> = match std::env::args().nth(1) {
        Some(path) => Box::new(
            FileByteSource::open(&path).with_context(|| format!("opening {}", path))?,
        ),
        None => Box::new(MemoryByteSource::new(tone()).with_name("a440")),
    };

    // Peak level of everything played, as f32 bits.
    let peak = Arc::new(AtomicU32::new(0));
    let meter = Arc::clone(&peak);
    let voice = SoftwareVoice::new().with_sink(move |buffer, gain| {
        let loudest = buffer
            .as_slice()
            .chunks_exact(2)
            .map(|s| i16::from_le_bytes([s[0], s[1]]).unsigned_abs())
            .max()
            .unwrap_or(0);
        let level = loudest as f32 / 32768.0 * gain;
        meter.fetch_max(level.to_bits(), Ordering::Relaxed);
    });

    let controller = StreamingPlaybackController::new(
        Box::new(voice),
        Box::new(RawPcmCodec::new()),
        StreamingConfig::low_latency(),
    )?;
    let mut events = controller.subscribe();

    let info = controller.set_source(source)?;
    println!(
        "Playing {} ch @ {} Hz ({})",
        info.channels,
        info.sample_rate,
        info.comment("TITLE").unwrap_or("untitled")
    );

    controller.set_volume(0.5)?;
    controller.play()?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    controller.pause()?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    controller.resume()?;

    loop {
        let event = events.recv().await?;
        println!("[{:?}] {}", event.severity(), event.description());
        match event {
            CoreEvent::Playback(PlaybackEvent::Completed { bytes_played, .. }) => {
                println!("Done: {} bytes played", bytes_played);
                break;
            }
            CoreEvent::Playback(PlaybackEvent::Error { message, .. }) => {
                anyhow::bail!("playback failed: {}", message);
            }
            _ => {}
        }
    }

    let stats = controller.stats();
    println!(
        "{} chunks, {:.0} bytes/chunk on average, {} underruns, peak level {:.2}",
        stats.chunks_queued,
        stats.average_chunk_bytes(),
        stats.underruns,
        f32::from_bits(peak.load(Ordering::Relaxed))
    );
    Ok(())
}
