//! # Codec Implementations
//!
//! Codec engines bundled with the crate. Perceptual codecs are provided by
//! the host through [`CodecEngine`](crate::traits::CodecEngine); the raw PCM
//! codec here carries uncompressed float samples in the same page/packet
//! framing and is used for tooling, tests and the demo.

pub mod pcm;

pub use pcm::{RawPcmCodec, RawPcmEncoder};
