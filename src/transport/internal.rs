//! # Local-Callback Transport
//!
//! Hands each window to an in-process callback instead of the network. Both
//! ends share the process, so windows carry raw f32 storage and replies are
//! decoded the same way: no int16 conversion in either direction.

use super::{voice_event, EventSink, TransportEvent, TransportKind, VoiceTransport};
use crate::audio::SampleFormat;
use crate::error::{BridgeError, BridgeResult};
use futures_util::future::LocalBoxFuture;
use std::sync::Arc;
use std::time::Instant;

/// In-process conversion hook.
///
/// Receives one request window (raw f32 bytes) and resolves to the converted
/// window in the same layout.
pub trait InternalCallback: Send + Sync {
    fn process_audio(&self, data: Vec<u8>) -> LocalBoxFuture<'static, BridgeResult<Vec<u8>>>;
}

impl<F> InternalCallback for F
where
    F: Fn(Vec<u8>) -> LocalBoxFuture<'static, BridgeResult<Vec<u8>>> + Send + Sync,
{
    fn process_audio(&self, data: Vec<u8>) -> LocalBoxFuture<'static, BridgeResult<Vec<u8>>> {
        self(data)
    }
}

pub struct InternalTransport {
    callback: Option<Arc<dyn InternalCallback>>,
    events: EventSink,
}

impl InternalTransport {
    pub fn new(callback: Option<Arc<dyn InternalCallback>>, events: EventSink) -> Self {
        Self { callback, events }
    }
}

impl VoiceTransport for InternalTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Internal
    }

    fn send(&mut self, _timestamp: i64, window: Vec<u8>) -> BridgeResult<()> {
        let callback = self
            .callback
            .as_ref()
            .ok_or(BridgeError::CallbackNotConfigured)?;

        let started = Instant::now();
        let pending = callback.process_audio(window);
        let events = self.events.clone();

        actix::spawn(async move {
            let event = match pending.await {
                Ok(payload) => voice_event(
                    payload,
                    SampleFormat::Float32,
                    started.elapsed().as_millis() as u64,
                    None,
                ),
                Err(err) => TransportEvent::Failure(err),
            };
            events.do_send(event);
        });

        Ok(())
    }

    fn close(&mut self) {
        self.callback = None;
    }
}
