//! # Transport Layer
//!
//! Sends request windows to the conversion service and reports what comes
//! back. Three interchangeable variants sit behind one [`VoiceTransport`]
//! handle:
//!
//! - **sio** ([`duplex`]): one long-lived WebSocket; sends are fire-and-forget
//!   and replies arrive later on the same socket
//! - **rest** ([`rest`]): one HTTP POST per window, reply awaited in a task
//! - **internal** ([`internal`]): an in-process callback, no network and no
//!   sample conversion
//!
//! ## Event Flow:
//! Every variant reports back to the owning node through the same
//! [`TransportEvent`] recipient, so the node never needs to know which
//! variant is active. Replies may arrive out of dispatch order; each one is
//! self-contained and is routed as it arrives.

pub mod duplex;
pub mod internal;
pub mod rest;

use crate::audio::SampleFormat;
use crate::config::TransportSettings;
use crate::error::{BridgeError, BridgeResult};
use actix::{Message, Recipient};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub use duplex::DuplexTransport;
pub use internal::{InternalCallback, InternalTransport};
pub use rest::RestTransport;

/// Replies shorter than this many bytes (128 int16 samples) are rejected.
pub const MIN_RESPONSE_BYTES: usize = 128 * 2;

/// Which send/receive strategy is active.
///
/// Names are matched case-insensitively wherever they come from; an unknown
/// name is a [`BridgeError::UnknownTransportKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum TransportKind {
    /// Persistent duplex socket
    Sio,
    /// One request/response call per window
    Rest,
    /// Same-process callback
    Internal,
}

impl TransportKind {
    /// Wire format used for windows sent over this transport.
    pub fn sample_format(&self) -> SampleFormat {
        match self {
            TransportKind::Sio | TransportKind::Rest => SampleFormat::Int16,
            TransportKind::Internal => SampleFormat::Float32,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Sio => "sio",
            TransportKind::Rest => "rest",
            TransportKind::Internal => "internal",
        }
    }
}

impl FromStr for TransportKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sio" => Ok(TransportKind::Sio),
            "rest" => Ok(TransportKind::Rest),
            "internal" => Ok(TransportKind::Internal),
            _ => Err(BridgeError::UnknownTransportKind(s.to_string())),
        }
    }
}

impl TryFrom<String> for TransportKind {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a transport reports back to its node.
#[derive(Debug, Clone, PartialEq, Message)]
#[rtype(result = "()")]
pub enum TransportEvent {
    /// A converted window, already checked against [`MIN_RESPONSE_BYTES`]
    Voice {
        payload: Vec<u8>,
        format: SampleFormat,
        response_time_ms: u64,
        perf: Option<Vec<f64>>,
    },

    /// Out-of-band server device report; carries no audio
    DevicePerformance { response_time_ms: u64, perf: Vec<f64> },

    /// A recoverable fault on this transport
    Failure(BridgeError),
}

/// Where transports deliver their events.
pub type EventSink = Recipient<TransportEvent>;

/// One send/receive strategy.
///
/// `send` only dispatches; results come back through the [`EventSink`] the
/// transport was built with. An `Err` from `send` means nothing was sent.
pub trait VoiceTransport {
    fn kind(&self) -> TransportKind;

    fn send(&mut self, timestamp: i64, window: Vec<u8>) -> BridgeResult<()>;

    /// Tear down any connection; later replies are silently dropped.
    fn close(&mut self);
}

/// Reject payloads under [`MIN_RESPONSE_BYTES`].
pub fn check_response_len(payload: &[u8]) -> BridgeResult<()> {
    if payload.len() < MIN_RESPONSE_BYTES {
        return Err(BridgeError::ResponseTooShort(payload.len()));
    }
    Ok(())
}

/// Build the event for a received audio payload, applying the length floor.
pub(crate) fn voice_event(
    payload: Vec<u8>,
    format: SampleFormat,
    response_time_ms: u64,
    perf: Option<Vec<f64>>,
) -> TransportEvent {
    match check_response_len(&payload) {
        Ok(()) => TransportEvent::Voice {
            payload,
            format,
            response_time_ms,
            perf,
        },
        Err(err) => TransportEvent::Failure(err),
    }
}

/// Milliseconds since the Unix epoch, the timestamp carried with each window.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Milliseconds elapsed since `timestamp`, clamped at zero.
///
/// The timestamp may come back from the server, so any value is accepted.
pub(crate) fn elapsed_since(timestamp: i64) -> u64 {
    now_millis().saturating_sub(timestamp).max(0) as u64
}

/// Owns the active transport and replaces it when the address or kind
/// changes.
///
/// ## Lifecycle:
/// - At most one transport exists at a time; the old one is closed before
///   its replacement is built
/// - A chunk-count-only change keeps the current transport
pub struct TransportDispatcher {
    settings: TransportSettings,
    transport: Box<dyn VoiceTransport>,
    callback: Option<Arc<dyn InternalCallback>>,
    events: EventSink,
}

impl TransportDispatcher {
    /// Build the transport described by `settings`.
    ///
    /// Must be called from inside a running actix system; the duplex and
    /// request/response variants spawn their I/O onto the current arbiter.
    pub fn new(settings: TransportSettings, events: EventSink) -> Self {
        let transport = build_transport(&settings, None, events.clone());
        Self {
            settings,
            transport,
            callback: None,
            events,
        }
    }

    /// Apply new settings.
    ///
    /// Returns `true` when the transport was recreated.
    pub fn update(&mut self, settings: TransportSettings) -> bool {
        let recreate = self.settings.requires_new_transport(&settings);
        self.settings = settings;
        if recreate {
            info!(
                protocol = %self.settings.protocol,
                url = %self.settings.server_url,
                "Recreating transport"
            );
            self.rebuild();
        }
        recreate
    }

    /// Register the in-process conversion callback.
    pub fn set_callback(&mut self, callback: Arc<dyn InternalCallback>) {
        self.callback = Some(callback);
        if self.settings.protocol == TransportKind::Internal {
            self.rebuild();
        }
    }

    /// Send one window stamped with the current time.
    pub fn send(&mut self, window: Vec<u8>) -> BridgeResult<()> {
        let timestamp = now_millis();
        debug!(
            protocol = %self.transport.kind(),
            bytes = window.len(),
            timestamp,
            "Dispatching window"
        );
        self.transport.send(timestamp, window)
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Format windows must be encoded in for the active transport.
    pub fn sample_format(&self) -> SampleFormat {
        self.transport.kind().sample_format()
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    fn rebuild(&mut self) {
        self.transport.close();
        self.transport = build_transport(&self.settings, self.callback.clone(), self.events.clone());
    }
}

impl Drop for TransportDispatcher {
    fn drop(&mut self) {
        self.transport.close();
    }
}

fn build_transport(
    settings: &TransportSettings,
    callback: Option<Arc<dyn InternalCallback>>,
    events: EventSink,
) -> Box<dyn VoiceTransport> {
    match settings.protocol {
        TransportKind::Sio => Box::new(DuplexTransport::connect(
            &settings.server_url,
            Duration::from_millis(settings.reconnect_delay_ms),
            events,
        )),
        TransportKind::Rest => Box::new(RestTransport::new(&settings.server_url, events)),
        TransportKind::Internal => Box::new(InternalTransport::new(callback, events)),
    }
}
