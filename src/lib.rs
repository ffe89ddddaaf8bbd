//! # Voice Bridge
//!
//! Client-side streaming bridge between a real-time audio engine and a
//! remote voice-conversion service.
//!
//! ## Application Architecture:
//! - **audio**: sample codec, frame accumulation and output recording
//! - **transport**: the three interchangeable send/receive strategies
//! - **node**: the controller actor that drives the pipeline
//! - **router**: delivery of converted audio to the engine or a chained node
//! - **engine / listener**: the contracts with the outside world
//! - **config**: file and environment configuration
//! - **driver**: WAV-file stand-in for the real-time engine

pub mod audio;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod listener;
pub mod node;
pub mod router;
pub mod stats;
pub mod transport;

pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult, ClientException};
pub use node::{LifecycleError, LifecycleState, NodeHandle, VoiceChangerNode};
