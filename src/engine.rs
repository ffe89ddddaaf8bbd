//! # Real-Time Engine Contract
//!
//! Messages exchanged with the external real-time audio engine that calls
//! into a node once per capture frame.
//!
//! ## Message Format:
//! - **Node → Engine**: [`EngineRequest`], tagged by `requestType`
//!   (`config`, `start`, `stop`, `trancateBuffer`, `voice`)
//! - **Engine → Node**: [`EngineEvent`], tagged by `responseType`
//!   (`volume`, `inputData`, `start_ok`, `stop_ok`)
//!
//! Both enums serialize to the JSON shape the engine speaks, so an engine
//! living behind a message port can be bridged with `serde_json` alone.

use crate::config::ProcessingSettings;
use actix::Message;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Directives posted to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "requestType", rename_all_fields = "camelCase")]
pub enum EngineRequest {
    /// Truncation thresholds, forwarded opaquely
    #[serde(rename = "config")]
    Config {
        num_trancate_treshold: u32,
        vol_trancate_threshold: f32,
        vol_trancate_length: u32,
    },

    #[serde(rename = "start")]
    Start,

    #[serde(rename = "stop")]
    Stop,

    /// Discard any captured audio not yet pushed to the node
    #[serde(rename = "trancateBuffer")]
    TruncateBuffer,

    /// Converted audio ready to be rendered ("frame ready")
    #[serde(rename = "voice")]
    Voice { voice: Vec<f32> },
}

impl From<&ProcessingSettings> for EngineRequest {
    fn from(settings: &ProcessingSettings) -> Self {
        EngineRequest::Config {
            num_trancate_treshold: settings.num_trancate_treshold,
            vol_trancate_threshold: settings.vol_trancate_threshold,
            vol_trancate_length: settings.vol_trancate_length,
        }
    }
}

/// Events the engine delivers to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
#[serde(tag = "responseType")]
pub enum EngineEvent {
    #[serde(rename = "volume")]
    Volume { volume: f32 },

    /// One fixed-size capture frame
    #[serde(rename = "inputData", rename_all = "camelCase")]
    InputData { input_data: Vec<f32> },

    #[serde(rename = "start_ok")]
    StartOk,

    #[serde(rename = "stop_ok")]
    StopOk,

    /// Any tag this node does not understand; logged and dropped
    #[serde(other)]
    Unknown,
}

/// The engine side of the contract: where the node posts directives and
/// rendered audio.
///
/// Posting is fire-and-forget; the engine answers asynchronously with
/// [`EngineEvent`]s.
pub trait AudioEngine {
    fn post(&self, request: EngineRequest);
}

impl AudioEngine for mpsc::UnboundedSender<EngineRequest> {
    fn post(&self, request: EngineRequest) {
        if self.send(request).is_err() {
            warn!("Engine channel closed, request dropped");
        }
    }
}
