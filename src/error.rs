//! # Error Handling
//!
//! Error taxonomy for the bridge and the exception codes reported to the
//! listener.
//!
//! ## Propagation policy:
//! - Runtime faults (connect failure, short reply, missing callback) never
//!   stop the stream. They are turned into a [`ClientException`] code and
//!   handed to the listener, and the next window proceeds normally.
//! - [`BridgeError::UnknownTransportKind`] is the only fatal case: it comes from
//!   configuration, so the operation that hit it is aborted and the error is
//!   returned to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors produced by the bridge.
///
/// ## Error Categories:
/// - **TransportConnect**: the duplex channel could not be (re)established
/// - **TransportNotReady**: a window was emitted while no channel exists
/// - **ResponseTooShort**: a reply payload was under the minimum length
/// - **InvalidResponse**: a reply could not be decoded at the wire level
/// - **CallbackNotConfigured**: local-callback send without a callback
/// - **MalformedBuffer**: byte length is not a whole number of samples
/// - **UnknownTransportKind**: unrecognised transport name (fatal)
/// - **Config**: configuration failed to load or validate
/// - **Http**: the request/response call itself failed
/// - **Io**: file or socket I/O outside the transports
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeError {
    TransportConnect(String),

    TransportNotReady(String),

    /// Carries the rejected payload length in bytes.
    ResponseTooShort(usize),

    InvalidResponse(String),

    CallbackNotConfigured,

    /// Carries the offending byte length and the sample width it was read as.
    MalformedBuffer { len: usize, sample_width: usize },

    UnknownTransportKind(String),

    Config(String),

    Http(String),

    Io(String),
}

impl BridgeError {
    /// Map the error onto the exception code reported to the listener.
    pub fn exception(&self) -> ClientException {
        match self {
            BridgeError::TransportConnect(_) | BridgeError::TransportNotReady(_) => {
                ClientException::SioConnectFailed
            }
            BridgeError::ResponseTooShort(_) | BridgeError::InvalidResponse(_) => {
                ClientException::SioInvalidResponse
            }
            BridgeError::CallbackNotConfigured => ClientException::InternalCallbackNotInitialized,
            BridgeError::Http(_) => ClientException::RestInvalidResponse,
            BridgeError::MalformedBuffer { .. } => ClientException::MalformedBuffer,
            BridgeError::UnknownTransportKind(_) | BridgeError::Config(_) | BridgeError::Io(_) => {
                ClientException::Configuration
            }
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::TransportConnect(msg) => write!(f, "connection failed: {}", msg),
            BridgeError::TransportNotReady(msg) => write!(f, "transport not ready: {}", msg),
            BridgeError::ResponseTooShort(len) => {
                write!(f, "received data is too short: {} bytes", len)
            }
            BridgeError::InvalidResponse(msg) => write!(f, "invalid response: {}", msg),
            BridgeError::CallbackNotConfigured => {
                write!(f, "internal audio process callback is not initialized")
            }
            BridgeError::MalformedBuffer { len, sample_width } => write!(
                f,
                "buffer of {} bytes is not a multiple of the {}-byte sample width",
                len, sample_width
            ),
            BridgeError::UnknownTransportKind(kind) => write!(f, "unknown protocol: {}", kind),
            BridgeError::Config(msg) => write!(f, "configuration error: {}", msg),
            BridgeError::Http(msg) => write!(f, "request failed: {}", msg),
            BridgeError::Io(msg) => write!(f, "io error: {}", msg),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::InvalidResponse(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for BridgeError {
    fn from(err: config::ConfigError) -> Self {
        BridgeError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BridgeError::TransportConnect(err.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err.to_string())
    }
}

/// Exception codes surfaced through `notify_exception`.
///
/// Serialized with the same names the server-side tooling expects, e.g.
/// `ERR_SIO_CONNECT_FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientException {
    #[serde(rename = "ERR_SIO_CONNECT_FAILED")]
    SioConnectFailed,
    #[serde(rename = "ERR_SIO_INVALID_RESPONSE")]
    SioInvalidResponse,
    #[serde(rename = "ERR_REST_INVALID_RESPONSE")]
    RestInvalidResponse,
    #[serde(rename = "ERR_INTERNAL_AUDIO_PROCESS_CALLBACK_IS_NOT_INITIALIZED")]
    InternalCallbackNotInitialized,
    #[serde(rename = "ERR_MALFORMED_BUFFER")]
    MalformedBuffer,
    #[serde(rename = "ERR_CONFIGURATION")]
    Configuration,
}

impl ClientException {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientException::SioConnectFailed => "ERR_SIO_CONNECT_FAILED",
            ClientException::SioInvalidResponse => "ERR_SIO_INVALID_RESPONSE",
            ClientException::RestInvalidResponse => "ERR_REST_INVALID_RESPONSE",
            ClientException::InternalCallbackNotInitialized => {
                "ERR_INTERNAL_AUDIO_PROCESS_CALLBACK_IS_NOT_INITIALIZED"
            }
            ClientException::MalformedBuffer => "ERR_MALFORMED_BUFFER",
            ClientException::Configuration => "ERR_CONFIGURATION",
        }
    }
}

impl fmt::Display for ClientException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shorthand for results carrying a [`BridgeError`].
pub type BridgeResult<T> = Result<T, BridgeError>;
