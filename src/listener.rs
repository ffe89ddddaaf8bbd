//! # Listener Contract
//!
//! The listener is the only surface through which a node reports telemetry
//! and failures. Nothing inside the node panics or aborts on a runtime fault;
//! it calls `notify_exception` and keeps going.

use crate::error::ClientException;
use tracing::{debug, info, warn};

/// Callbacks a node invokes while streaming.
///
/// ## Callbacks:
/// - `notify_volume`: input level reported by the engine
/// - `notify_send_buffering_time`: milliseconds spent filling the last window
/// - `notify_response_time`: round trip of a window, with the server's
///   performance samples when it sent any
/// - `notify_exception`: a recoverable fault; the stream continues
pub trait WorkletListener {
    fn notify_volume(&self, volume: f32);

    fn notify_send_buffering_time(&self, millis: u64);

    fn notify_response_time(&self, millis: u64, perf: Option<&[f64]>);

    fn notify_exception(&self, code: ClientException, message: &str);
}

/// Listener that writes every notification to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl WorkletListener for TracingListener {
    fn notify_volume(&self, volume: f32) {
        debug!(volume, "Input volume");
    }

    fn notify_send_buffering_time(&self, millis: u64) {
        debug!(buffering_ms = millis, "Request window buffered");
    }

    fn notify_response_time(&self, millis: u64, perf: Option<&[f64]>) {
        info!(response_ms = millis, perf = ?perf, "Response received");
    }

    fn notify_exception(&self, code: ClientException, message: &str) {
        warn!(code = %code, "{}", message);
    }
}
