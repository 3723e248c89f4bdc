// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration for the OCDM client.
//!
//! Every field has a default, so a configuration can be built from nothing
//! ([`OcdmConfig::default`]), from the process environment
//! ([`OcdmConfig::from_env`]) or from a partial JSON document
//! ([`OcdmConfig::from_json`]).

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

// Build script generates constants.rs with OCDM_DEFAULT_CONNECTOR
include!(concat!(env!("OUT_DIR"), "/constants.rs"));

/// Environment variable naming the RPC connector of the DRM service.
pub const CONNECTOR_ENV: &str = "OPEN_CDM_SERVER";

/// Bytes the decryptor may append after each sample.
pub const DEFAULT_RESERVED_TOKEN_SIZE: usize = 16;

/// How decrypt calls from different sessions are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecryptSerialization {
    /// One lock for every decrypt in the process.
    #[default]
    Global,
    /// One lock per session; sessions decrypt concurrently over their own channels.
    PerSession,
}

/// Client configuration.
///
/// # Examples
///
/// ```
/// use ocdm::config::{DecryptSerialization, OcdmConfig};
///
/// let config = OcdmConfig::from_json(r#"{ "decrypt_serialization": "per-session" }"#).unwrap();
/// assert_eq!(config.decrypt_serialization, DecryptSerialization::PerSession);
/// assert_eq!(config.reserved_token_size, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OcdmConfig {
    /// RPC connector the transport opens.
    pub connector: String,
    /// Timeout for opening and closing the transport, in milliseconds.
    pub rpc_timeout_ms: u64,
    /// Upper bound for each side of a decrypt handshake, in milliseconds.
    pub decrypt_timeout_ms: u64,
    pub decrypt_serialization: DecryptSerialization,
    /// Padding reserved after each sample in the decrypt channel.
    pub reserved_token_size: usize,
    /// Platform library exporting `ocdm_svp_transform_clear`.
    pub secure_buffer_library: Option<PathBuf>,
}

impl Default for OcdmConfig {
    fn default() -> Self {
        Self {
            connector: default_connector(),
            rpc_timeout_ms: 3000,
            decrypt_timeout_ms: 60 * 60 * 1000,
            decrypt_serialization: DecryptSerialization::Global,
            reserved_token_size: DEFAULT_RESERVED_TOKEN_SIZE,
            secure_buffer_library: None,
        }
    }
}

/// Connector from `OPEN_CDM_SERVER`, else the build-time default.
pub fn default_connector() -> String {
    std::env::var(CONNECTOR_ENV).unwrap_or_else(|_| OCDM_DEFAULT_CONNECTOR.to_string())
}

impl OcdmConfig {
    /// Defaults, with the connector taken from the environment when set.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Parses a JSON object; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|error| Error::Other(format!("Invalid config: {error}")))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn decrypt_timeout(&self) -> Duration {
        Duration::from_millis(self.decrypt_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = OcdmConfig::default();
        assert_eq!(config.rpc_timeout(), Duration::from_secs(3));
        assert_eq!(config.decrypt_timeout(), Duration::from_secs(3600));
        assert_eq!(config.decrypt_serialization, DecryptSerialization::Global);
        assert!(config.secure_buffer_library.is_none());
        assert!(!config.connector.is_empty());
    }

    #[test]
    fn json_overrides_selected_fields() {
        let config = OcdmConfig::from_json(
            r#"{
                "connector": "/run/ocdm",
                "decrypt_timeout_ms": 250,
                "secure_buffer_library": "/usr/lib/libsvp.so"
            }"#,
        )
        .unwrap();
        assert_eq!(config.connector, "/run/ocdm");
        assert_eq!(config.decrypt_timeout(), Duration::from_millis(250));
        assert_eq!(
            config.secure_buffer_library,
            Some(PathBuf::from("/usr/lib/libsvp.so"))
        );
        assert_eq!(config.rpc_timeout_ms, 3000);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(OcdmConfig::from_json("{ \"rpc_timeout_ms\": \"soon\" }").is_err());
    }
}
