//! # Request/Response Transport
//!
//! One HTTP call per window: `POST <server_url>/test` with the window as
//! base64 JSON, reply awaited on a spawned task and reported as a
//! [`TransportEvent`].
//!
//! ## Message Format:
//! - **Request**: `{"timestamp": 1700000000000, "buffer": "<base64 int16 PCM>"}`
//! - **Response**: `{"changedVoiceBase64": "<base64 int16 PCM>", "perf": [0.01, ...]}`
//!
//! There is no request timeout: a hung call stalls only its own window, the
//! windows after it keep flowing on their own tasks.

use super::{elapsed_since, voice_event, EventSink, TransportEvent, TransportKind, VoiceTransport};
use crate::audio::SampleFormat;
use crate::error::{BridgeError, BridgeResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Request/response transport; the HTTP client is kept for the lifetime of
/// the transport, which is recreated whenever the address changes.
pub struct RestTransport {
    endpoint: String,
    client: reqwest::Client,
    events: EventSink,
    closed: bool,
}

/// Body of the POST request.
#[derive(Debug, Serialize, Deserialize)]
pub struct VoiceRequest {
    pub timestamp: i64,
    /// Base64 encoded window
    pub buffer: String,
}

/// Body of the reply.
#[derive(Debug, Serialize, Deserialize)]
pub struct VoiceResponse {
    #[serde(rename = "changedVoiceBase64")]
    pub changed_voice_base64: String,
    #[serde(default)]
    pub perf: Vec<f64>,
}

/// Decoded reply: converted bytes and the server's performance samples.
#[derive(Debug, Clone, PartialEq)]
pub struct RestReply {
    pub payload: Vec<u8>,
    pub perf: Vec<f64>,
}

impl RestTransport {
    pub fn new(server_url: &str, events: EventSink) -> Self {
        let endpoint = format!("{}/test", server_url.trim_end_matches('/'));
        debug!(endpoint = %endpoint, "Request/response transport ready");
        Self {
            endpoint,
            client: reqwest::Client::new(),
            events,
            closed: false,
        }
    }
}

impl VoiceTransport for RestTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Rest
    }

    fn send(&mut self, timestamp: i64, window: Vec<u8>) -> BridgeResult<()> {
        if self.closed {
            return Err(BridgeError::TransportNotReady(format!(
                "[REST] transport for {} is closed",
                self.endpoint
            )));
        }

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let events = self.events.clone();

        actix::spawn(async move {
            let event = match post_voice(&client, &endpoint, timestamp, &window).await {
                Ok(reply) => voice_event(
                    reply.payload,
                    SampleFormat::Int16,
                    elapsed_since(timestamp),
                    Some(reply.perf),
                ),
                Err(err) => TransportEvent::Failure(err),
            };
            events.do_send(event);
        });

        Ok(())
    }

    fn close(&mut self) {
        // In-flight calls still complete and are routed.
        self.closed = true;
    }
}

/// Issue one conversion call and decode its reply.
pub async fn post_voice(
    client: &reqwest::Client,
    endpoint: &str,
    timestamp: i64,
    window: &[u8],
) -> BridgeResult<RestReply> {
    let body = VoiceRequest {
        timestamp,
        buffer: STANDARD.encode(window),
    };

    let response = client
        .post(endpoint)
        .header("Accept", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| BridgeError::Http(format!("[REST] request to {} failed: {}", endpoint, e)))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        return Err(BridgeError::Http(format!(
            "[REST] {} returned {}: {}",
            endpoint, status, error_text
        )));
    }

    let reply: VoiceResponse = response
        .json()
        .await
        .map_err(|e| BridgeError::InvalidResponse(format!("[REST] undecodable reply: {}", e)))?;

    decode_reply(reply)
}

/// Turn the JSON reply into raw bytes.
pub fn decode_reply(reply: VoiceResponse) -> BridgeResult<RestReply> {
    let payload = STANDARD
        .decode(reply.changed_voice_base64.as_bytes())
        .map_err(|e| BridgeError::InvalidResponse(format!("[REST] bad base64 payload: {}", e)))?;

    Ok(RestReply {
        payload,
        perf: reply.perf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MIN_RESPONSE_BYTES;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_request_body_shape() {
        let body = VoiceRequest {
            timestamp: 1234,
            buffer: STANDARD.encode([1u8, 2, 3]),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["timestamp"], 1234);
        assert_eq!(json["buffer"], "AQID");
    }

    #[test]
    fn test_reply_decoding() {
        let reply: VoiceResponse = serde_json::from_str(
            r#"{"changedVoiceBase64": "AQID", "perf": [0.1, 0.2]}"#,
        )
        .unwrap();
        let decoded = decode_reply(reply).unwrap();
        assert_eq!(decoded.payload, vec![1, 2, 3]);
        assert_eq!(decoded.perf, vec![0.1, 0.2]);

        // perf is optional on the wire
        let reply: VoiceResponse = serde_json::from_str(r#"{"changedVoiceBase64": ""}"#).unwrap();
        assert!(decode_reply(reply).unwrap().perf.is_empty());
    }

    #[test]
    fn test_bad_base64_is_invalid_response() {
        let reply = VoiceResponse {
            changed_voice_base64: "not base64!".to_string(),
            perf: vec![],
        };
        assert!(matches!(
            decode_reply(reply),
            Err(BridgeError::InvalidResponse(_))
        ));
    }

    /// Serve exactly one HTTP request, echoing a fixed converted payload.
    async fn serve_once(listener: TcpListener, reply_body: String) -> VoiceRequest {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];

        let (header_end, content_length) = loop {
            let n = socket.read(&mut buf).await.unwrap();
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(pos) = text.find("\r\n\r\n") {
                let length = text[..pos]
                    .lines()
                    .find_map(|line| {
                        let lower = line.to_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap())
                    })
                    .unwrap();
                break (pos + 4, length);
            }
        };
        while raw.len() < header_end + content_length {
            let n = socket.read(&mut buf).await.unwrap();
            raw.extend_from_slice(&buf[..n]);
        }

        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            reply_body.len(),
            reply_body
        );
        socket.write_all(response.as_bytes()).await.unwrap();

        serde_json::from_slice(&raw[header_end..header_end + content_length]).unwrap()
    }

    #[actix::test]
    async fn test_post_voice_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let payload = vec![7u8; MIN_RESPONSE_BYTES];
        let reply_body = serde_json::to_string(&VoiceResponse {
            changed_voice_base64: STANDARD.encode(&payload),
            perf: vec![0.05],
        })
        .unwrap();
        let server = tokio::spawn(serve_once(listener, reply_body));

        let client = reqwest::Client::new();
        let endpoint = format!("http://{}/test", addr);
        let reply = post_voice(&client, &endpoint, 99, &[1, 2, 3, 4]).await.unwrap();

        assert_eq!(reply.payload, payload);
        assert_eq!(reply.perf, vec![0.05]);

        let request = server.await.unwrap();
        assert_eq!(request.timestamp, 99);
        assert_eq!(STANDARD.decode(request.buffer).unwrap(), vec![1, 2, 3, 4]);
    }
}
