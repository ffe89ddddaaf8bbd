//! # Configuration Management
//!
//! Loads bridge configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `SERVER_URL` environment variable
//! 2. Environment variables (APP_TRANSPORT__SERVER_URL, APP_TRANSPORT__PROTOCOL, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impls)
//!
//! ## Scopes:
//! - **transport**: where and how windows are sent. Changing the address or the
//!   protocol recreates the transport, changing only the chunk count does not.
//! - **processing**: truncation thresholds handed to the engine untouched.
//! - **io**: input/output files for the `voice-bridge` binary.

use crate::error::{BridgeError, BridgeResult};
use crate::transport::TransportKind;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Full configuration for the bridge binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub transport: TransportSettings,
    pub processing: ProcessingSettings,
    pub io: IoSettings,
}

/// Transport/session settings.
///
/// ## Fields:
/// - `server_url`: base URL of the conversion server, e.g. "http://127.0.0.1:18888"
/// - `protocol`: transport kind, see [`TransportKind`]
/// - `input_chunk_num`: frames accumulated per request window
/// - `reconnect_delay_ms`: pause between duplex reconnect attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSettings {
    pub server_url: String,
    pub protocol: TransportKind,
    pub input_chunk_num: usize,
    pub reconnect_delay_ms: u64,
}

impl TransportSettings {
    /// Whether moving from `self` to `next` requires a new transport.
    ///
    /// Only the address and the protocol matter; the chunk count is applied
    /// in place.
    pub fn requires_new_transport(&self, next: &TransportSettings) -> bool {
        self.server_url != next.server_url || self.protocol != next.protocol
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.input_chunk_num == 0 {
            return Err(BridgeError::Config(
                "input_chunk_num must be greater than 0".to_string(),
            ));
        }

        if self.protocol != TransportKind::Internal
            && !self.server_url.starts_with("http://")
            && !self.server_url.starts_with("https://")
        {
            return Err(BridgeError::Config(format!(
                "server_url must start with http:// or https://, got: {}",
                self.server_url
            )));
        }

        Ok(())
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:18888".to_string(),
            protocol: TransportKind::Sio,
            input_chunk_num: 48,
            reconnect_delay_ms: 1000,
        }
    }
}

/// Truncation thresholds forwarded to the engine.
///
/// The node never interprets these values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSettings {
    pub num_trancate_treshold: u32,
    pub vol_trancate_threshold: f32,
    pub vol_trancate_length: u32,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            num_trancate_treshold: 100,
            vol_trancate_threshold: 0.0005,
            vol_trancate_length: 32,
        }
    }
}

/// Files and frame size used by the binary's WAV driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoSettings {
    pub input_wav: PathBuf,
    pub output_wav: PathBuf,
    /// Samples per capture frame
    pub frame_size: usize,
}

impl Default for IoSettings {
    fn default() -> Self {
        Self {
            input_wav: PathBuf::from("input.wav"),
            output_wav: PathBuf::from("output.wav"),
            frame_size: 128,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            transport: TransportSettings::default(),
            processing: ProcessingSettings::default(),
            io: IoSettings::default(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_TRANSPORT__PROTOCOL=rest`: switch to the request/response transport
    /// - `APP_TRANSPORT__INPUT_CHUNK_NUM=24`: halve the window size
    /// - `SERVER_URL=http://10.0.0.2:18888`: special case for quick overrides
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&BridgeConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(url) = env::var("SERVER_URL") {
            settings = settings.set_override("transport.server_url", url)?;
        }

        let built = settings.build()?;

        // surface a bad protocol name as its own error, not a generic parse failure
        if let Ok(protocol) = built.get_string("transport.protocol") {
            protocol.parse::<TransportKind>()?;
        }

        let config = built.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> BridgeResult<()> {
        self.transport.validate()?;

        if self.io.frame_size == 0 {
            return Err(BridgeError::Config(
                "frame_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply a partial JSON update, e.g. `{"transport": {"protocol": "rest"}}`.
    ///
    /// Unknown protocol names fail with [`BridgeError::UnknownTransportKind`];
    /// the configuration is left untouched on any error.
    pub fn update_from_json(&mut self, json_str: &str) -> BridgeResult<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)
            .map_err(|e| BridgeError::Config(format!("JSON parsing error: {}", e)))?;
        let mut updated = self.clone();

        if let Some(transport) = partial_config.get("transport") {
            if let Some(url) = transport.get("server_url").and_then(|v| v.as_str()) {
                updated.transport.server_url = url.to_string();
            }
            if let Some(protocol) = transport.get("protocol").and_then(|v| v.as_str()) {
                updated.transport.protocol = protocol.parse()?;
            }
            if let Some(chunks) = transport.get("input_chunk_num").and_then(|v| v.as_u64()) {
                updated.transport.input_chunk_num = chunks as usize;
            }
            if let Some(delay) = transport.get("reconnect_delay_ms").and_then(|v| v.as_u64()) {
                updated.transport.reconnect_delay_ms = delay;
            }
        }

        if let Some(processing) = partial_config.get("processing") {
            if let Some(num) = processing.get("num_trancate_treshold").and_then(|v| v.as_u64()) {
                updated.processing.num_trancate_treshold = num as u32;
            }
            if let Some(vol) = processing.get("vol_trancate_threshold").and_then(|v| v.as_f64()) {
                updated.processing.vol_trancate_threshold = vol as f32;
            }
            if let Some(len) = processing.get("vol_trancate_length").and_then(|v| v.as_u64()) {
                updated.processing.vol_trancate_length = len as u32;
            }
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.transport.protocol, TransportKind::Sio);
        assert_eq!(config.transport.input_chunk_num, 48);
        assert_eq!(config.io.frame_size, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BridgeConfig::default();
        config.transport.input_chunk_num = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.transport.server_url = "localhost:18888".to_string();
        assert!(config.validate().is_err());

        // the local-callback transport never touches the network
        config.transport.protocol = TransportKind::Internal;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_update() {
        let mut config = BridgeConfig::default();
        let json = r#"{"transport": {"protocol": "rest", "input_chunk_num": 12}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.transport.protocol, TransportKind::Rest);
        assert_eq!(config.transport.input_chunk_num, 12);
        assert_eq!(config.transport.server_url, "http://127.0.0.1:18888");
    }

    #[test]
    fn test_config_update_rejects_unknown_protocol() {
        let mut config = BridgeConfig::default();
        let err = config
            .update_from_json(r#"{"transport": {"protocol": "udp"}}"#)
            .unwrap_err();
        assert_eq!(err, BridgeError::UnknownTransportKind("udp".to_string()));
        assert_eq!(config.transport.protocol, TransportKind::Sio);
    }

    #[test]
    fn test_load_rejects_unknown_protocol_from_env() {
        env::set_var("APP_TRANSPORT__PROTOCOL", "udp");
        let result = BridgeConfig::load();
        env::remove_var("APP_TRANSPORT__PROTOCOL");

        let err = result.unwrap_err();
        assert_eq!(
            err.downcast_ref::<BridgeError>(),
            Some(&BridgeError::UnknownTransportKind("udp".to_string()))
        );
    }

    #[test]
    fn test_requires_new_transport() {
        let current = TransportSettings::default();

        let mut next = current.clone();
        next.input_chunk_num = 8;
        assert!(!current.requires_new_transport(&next));

        next.protocol = TransportKind::Rest;
        assert!(current.requires_new_transport(&next));

        let mut next = current.clone();
        next.server_url = "http://10.0.0.2:18888".to_string();
        assert!(current.requires_new_transport(&next));
    }
}
