//! # Persistent Duplex Transport
//!
//! Streams request windows over one long-lived WebSocket to
//! `<server_url>/test` and listens for replies on the same socket.
//!
//! ## Frame Format:
//! - **request_message** (client → server), binary:
//!   `[i64 LE timestamp][window bytes]`
//! - **response** (server → client), binary:
//!   `[i64 LE timestamp][u16 LE perf count][perf count × f64 LE][payload]`
//! - **message** (server → client), text: informational, logged only
//!
//! ## Device Reports:
//! A response stamped with timestamp 0 is not audio. It is the server's
//! device-mode performance report: `perf[0]` (seconds) becomes the response
//! time in milliseconds and `perf[1..4]` the auxiliary figures.
//!
//! ## Connection Lifecycle:
//! The socket is driven by a background task. A failed connect or a dropped
//! connection is reported as `TransportConnect` and retried after the
//! reconnect delay. Windows sent while disconnected are queued and flushed
//! once the socket is up. The queue holds at most [`MAX_QUEUED_WINDOWS`];
//! when it is full the oldest window is dropped, so a long outage costs
//! stale audio rather than memory.

use super::{elapsed_since, voice_event, EventSink, TransportEvent, TransportKind, VoiceTransport};
use crate::audio::SampleFormat;
use crate::error::{BridgeError, BridgeResult};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Timestamp value marking a device performance report.
pub const DEVICE_REPORT_TIMESTAMP: i64 = 0;

/// Windows kept while the socket is down.
pub const MAX_QUEUED_WINDOWS: usize = 32;

/// Request frames waiting for the socket, oldest first.
pub struct OutboundQueue {
    frames: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
    ready: Notify,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            ready: Notify::new(),
        }
    }

    /// Queue a frame. Returns `true` if the oldest frame was dropped to make
    /// room.
    pub fn push(&self, frame: Vec<u8>) -> bool {
        let dropped = {
            let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
            let dropped = if frames.len() >= self.capacity {
                frames.pop_front().is_some()
            } else {
                false
            };
            frames.push_back(frame);
            dropped
        };
        self.ready.notify_one();
        dropped
    }

    pub fn pop(&self) -> Option<Vec<u8>> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Duplex transport over a WebSocket.
pub struct DuplexTransport {
    url: String,

    /// Queue feeding the socket task
    outgoing: Arc<OutboundQueue>,

    /// Socket task; aborted on close
    task: Option<JoinHandle<()>>,
}

impl DuplexTransport {
    /// Start connecting to `server_url` in the background.
    pub fn connect(server_url: &str, reconnect_delay: Duration, events: EventSink) -> Self {
        let url = socket_url(server_url);
        let outgoing = Arc::new(OutboundQueue::new(MAX_QUEUED_WINDOWS));

        info!(url = %url, "Opening duplex channel");
        let task = actix::spawn(run_socket(
            url.clone(),
            outgoing.clone(),
            reconnect_delay,
            events,
        ));

        Self {
            url,
            outgoing,
            task: Some(task),
        }
    }
}

impl VoiceTransport for DuplexTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sio
    }

    fn send(&mut self, timestamp: i64, window: Vec<u8>) -> BridgeResult<()> {
        if self.task.is_none() {
            return Err(BridgeError::TransportNotReady(format!(
                "duplex channel to {} is closed",
                self.url
            )));
        }

        if self.outgoing.push(encode_request(timestamp, &window)) {
            warn!(
                url = %self.url,
                queued = self.outgoing.len(),
                "[SIO] send queue full, dropped oldest window"
            );
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!(url = %self.url, "Duplex channel closed");
        }
    }
}

impl Drop for DuplexTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Map an http(s) server URL onto the WebSocket endpoint.
pub fn socket_url(server_url: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/test", base)
}

/// Connect, pump the queue into the socket, and route replies until aborted.
async fn run_socket(
    url: String,
    outgoing: Arc<OutboundQueue>,
    reconnect_delay: Duration,
    events: EventSink,
) {
    loop {
        let stream = match connect_async(url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(err) => {
                events.do_send(TransportEvent::Failure(BridgeError::TransportConnect(format!(
                    "[SIO] connection to {} failed: {}",
                    url, err
                ))));
                sleep(reconnect_delay).await;
                continue;
            }
        };

        info!(url = %url, queued = outgoing.len(), "[SIO] connected");
        let (mut write, mut read) = stream.split();

        'session: loop {
            while let Some(frame) = outgoing.pop() {
                if let Err(err) = write.send(Message::Binary(frame)).await {
                    warn!(url = %url, error = %err, "[SIO] send failed");
                    break 'session;
                }
            }

            tokio::select! {
                _ = outgoing.ready.notified() => {}
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Binary(data))) => {
                        events.do_send(response_event(&data));
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!(url = %url, "[SIO] message: {}", text);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(url = %url, reason = ?frame, "[SIO] closed by server");
                        break 'session;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(url = %url, error = %err, "[SIO] connection lost");
                        break 'session;
                    }
                    None => break 'session,
                },
            }
        }

        events.do_send(TransportEvent::Failure(BridgeError::TransportConnect(format!(
            "[SIO] connection to {} lost, reconnecting",
            url
        ))));
        sleep(reconnect_delay).await;
    }
}

/// Turn one binary response frame into the event the node consumes.
pub fn response_event(frame: &[u8]) -> TransportEvent {
    let response = match decode_response(frame) {
        Ok(response) => response,
        Err(err) => return TransportEvent::Failure(err),
    };

    if response.timestamp == DEVICE_REPORT_TIMESTAMP {
        let primary = response.perf.first().copied().unwrap_or(0.0);
        let aux_end = response.perf.len().min(4);
        let aux = response.perf.get(1..aux_end).unwrap_or(&[]).to_vec();
        return TransportEvent::DevicePerformance {
            response_time_ms: (primary * 1000.0).round().max(0.0) as u64,
            perf: aux,
        };
    }

    voice_event(
        response.payload,
        SampleFormat::Int16,
        elapsed_since(response.timestamp),
        Some(response.perf),
    )
}

/// Decoded `response` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplexResponse {
    pub timestamp: i64,
    pub perf: Vec<f64>,
    pub payload: Vec<u8>,
}

pub fn encode_request(timestamp: i64, window: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 8];
    LittleEndian::write_i64(&mut frame, timestamp);
    frame.extend_from_slice(window);
    frame
}

/// Split a `request_message` frame into timestamp and window.
pub fn decode_request(frame: &[u8]) -> BridgeResult<(i64, Vec<u8>)> {
    if frame.len() < 8 {
        return Err(BridgeError::InvalidResponse(format!(
            "request frame of {} bytes has no timestamp",
            frame.len()
        )));
    }
    Ok((LittleEndian::read_i64(&frame[..8]), frame[8..].to_vec()))
}

pub fn encode_response(timestamp: i64, perf: &[f64], payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 10 + perf.len() * 8];
    LittleEndian::write_i64(&mut frame[..8], timestamp);
    LittleEndian::write_u16(&mut frame[8..10], perf.len() as u16);
    LittleEndian::write_f64_into(perf, &mut frame[10..]);
    frame.extend_from_slice(payload);
    frame
}

pub fn decode_response(frame: &[u8]) -> BridgeResult<DuplexResponse> {
    let truncated = |what: &str| {
        BridgeError::InvalidResponse(format!(
            "[SIO] response frame of {} bytes truncated in {}",
            frame.len(),
            what
        ))
    };

    let mut cursor = Cursor::new(frame);
    let timestamp = cursor
        .read_i64::<LittleEndian>()
        .map_err(|_| truncated("timestamp"))?;
    let perf_len = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| truncated("perf count"))? as usize;

    let mut perf = Vec::with_capacity(perf_len);
    for _ in 0..perf_len {
        perf.push(
            cursor
                .read_f64::<LittleEndian>()
                .map_err(|_| truncated("perf values"))?,
        );
    }

    let mut payload = Vec::new();
    cursor
        .read_to_end(&mut payload)
        .map_err(|_| truncated("payload"))?;

    Ok(DuplexResponse {
        timestamp,
        perf,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MIN_RESPONSE_BYTES;

    #[test]
    fn test_socket_url() {
        assert_eq!(socket_url("http://127.0.0.1:18888"), "ws://127.0.0.1:18888/test");
        assert_eq!(socket_url("https://vc.example.com/"), "wss://vc.example.com/test");
    }

    #[test]
    fn test_request_frame_layout() {
        let frame = encode_request(1_700_000_000_123, &[1, 2, 3, 4]);
        assert_eq!(frame.len(), 12);
        let (timestamp, window) = decode_request(&frame).unwrap();
        assert_eq!(timestamp, 1_700_000_000_123);
        assert_eq!(window, vec![1, 2, 3, 4]);

        assert!(decode_request(&[0u8; 3]).is_err());
    }

    #[test]
    fn test_response_frame_decoding() {
        let frame = encode_response(42, &[0.5, 1.5], &[9u8; 6]);
        let response = decode_response(&frame).unwrap();
        assert_eq!(
            response,
            DuplexResponse {
                timestamp: 42,
                perf: vec![0.5, 1.5],
                payload: vec![9u8; 6],
            }
        );
    }

    #[test]
    fn test_truncated_response_is_invalid() {
        let frame = encode_response(42, &[0.5, 1.5], &[]);
        match decode_response(&frame[..14]) {
            Err(BridgeError::InvalidResponse(msg)) => assert!(msg.contains("perf values")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_device_report_is_routed_to_timing_only() {
        let frame = encode_response(DEVICE_REPORT_TIMESTAMP, &[0.002, 1.0, 2.0, 3.0], &[0u8; 512]);
        assert_eq!(
            response_event(&frame),
            TransportEvent::DevicePerformance {
                response_time_ms: 2,
                perf: vec![1.0, 2.0, 3.0],
            }
        );
    }

    #[test]
    fn test_short_audio_response_is_rejected() {
        let frame = encode_response(crate::transport::now_millis(), &[], &[0u8; 100]);
        assert_eq!(
            response_event(&frame),
            TransportEvent::Failure(BridgeError::ResponseTooShort(100))
        );
    }

    #[test]
    fn test_audio_response_carries_perf() {
        let payload = vec![0u8; MIN_RESPONSE_BYTES];
        let frame = encode_response(crate::transport::now_millis(), &[0.01], &payload);
        match response_event(&frame) {
            TransportEvent::Voice {
                payload: received,
                format,
                perf,
                ..
            } => {
                assert_eq!(received.len(), MIN_RESPONSE_BYTES);
                assert_eq!(format, SampleFormat::Int16);
                assert_eq!(perf, Some(vec![0.01]));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_garbage_timestamp_still_yields_voice() {
        let frame = encode_response(i64::MIN, &[], &[0u8; 512]);
        match response_event(&frame) {
            TransportEvent::Voice {
                response_time_ms, ..
            } => assert!(response_time_ms > 0),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_full_queue_drops_oldest_window() {
        let queue = OutboundQueue::new(2);
        assert!(!queue.push(vec![1]));
        assert!(!queue.push(vec![2]));
        assert!(queue.push(vec![3]));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Some(vec![2]));
        assert_eq!(queue.pop(), Some(vec![3]));
        assert!(queue.is_empty());
    }
}
