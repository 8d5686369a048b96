//! File transport resolution.
//!
//! A document travels to the server either as a filesystem path (when
//! client and server share a filesystem) or inline as bytes in the RPC
//! frame. `HostLocation` is the client's policy knob; `Auto` inspects the
//! server hostname and picks path transport only for loopback addresses.

use crate::error::{Result, ScribaError};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Client policy for choosing path vs inline-byte transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostLocation {
    /// Decide from the server hostname: loopback means shared filesystem.
    #[default]
    Auto,
    /// Force path transport.
    Local,
    /// Force inline-byte transport.
    Remote,
}

impl std::str::FromStr for HostLocation {
    type Err = ScribaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(HostLocation::Auto),
            "local" => Ok(HostLocation::Local),
            "remote" => Ok(HostLocation::Remote),
            other => Err(ScribaError::InvalidRequest {
                message: format!("Invalid host location '{}' (expected auto, local or remote)", other),
            }),
        }
    }
}

impl std::fmt::Display for HostLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostLocation::Auto => write!(f, "auto"),
            HostLocation::Local => write!(f, "local"),
            HostLocation::Remote => write!(f, "remote"),
        }
    }
}

/// A document source on the client side, before transport resolution.
#[derive(Debug, Clone)]
pub enum Locator {
    Path(PathBuf),
    /// Raw bytes, e.g. read from stdin.
    Bytes(Vec<u8>),
}

/// A document as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireDocument {
    Path(PathBuf),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
}

/// Base64 (de)serialization for inline byte payloads.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Whether the given server hostname refers to this machine.
pub fn is_local_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

/// Whether path transport applies under this policy and server host.
pub fn uses_path_transport(policy: HostLocation, host: &str) -> bool {
    match policy {
        HostLocation::Local => true,
        HostLocation::Remote => false,
        HostLocation::Auto => is_local_host(host),
    }
}

/// Resolve a client-side locator into its wire form.
///
/// Paths are normalised to absolute form before they cross the wire so
/// the server never interprets them against its own working directory.
/// Byte locators always travel inline regardless of policy.
pub fn encode_for_send(
    locator: &Locator,
    policy: HostLocation,
    host: &str,
) -> Result<WireDocument> {
    match locator {
        Locator::Bytes(data) => Ok(WireDocument::Bytes(data.clone())),
        Locator::Path(path) => {
            if uses_path_transport(policy, host) {
                Ok(WireDocument::Path(absolute_path(path)?))
            } else {
                let data = std::fs::read(path)
                    .map_err(|e| ScribaError::io_with_path(e, path.clone()))?;
                Ok(WireDocument::Bytes(data))
            }
        }
    }
}

fn absolute_path(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| ScribaError::io_with_path(e, path))
}
