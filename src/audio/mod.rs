//! # Audio Module
//!
//! Sample-level building blocks used by the node between the real-time
//! engine and the transports.
//!
//! ## Key Components:
//! - **Codec**: float ⇄ wire conversion (16-bit PCM, or raw f32 pass-through)
//! - **Accumulator**: frames → request windows
//! - **Recorder**: optional capture of converted output
//!
//! ## Audio Format:
//! - **Engine side**: normalized f32 in [-1.0, 1.0], fixed-size frames
//! - **Wire side**: 16-bit signed little-endian PCM, mono

pub mod accumulator;
pub mod codec;
pub mod recorder;

pub use accumulator::RequestAccumulator;
pub use codec::SampleFormat;
pub use recorder::OutputRecorder;
