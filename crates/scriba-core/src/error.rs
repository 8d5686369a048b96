//! Error types for the conversion service.
//!
//! One enum covers both sides of the wire: the server maps errors to
//! JSON-RPC fault codes, the client maps received faults back and turns
//! them into process exit codes.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the scriba library.
#[derive(Debug, Error)]
pub enum ScribaError {
    // Engine lifecycle errors (fatal: the service never becomes ready)
    #[error("Failed to launch engine {executable:?}: {message}")]
    EngineLaunch {
        executable: PathBuf,
        message: String,
    },

    #[error("Engine did not start listening within {waited:?}")]
    EngineStartupTimeout { waited: Duration },

    #[error("Engine process is no longer available")]
    EngineUnavailable,

    // Per-request faults (the service stays up)
    #[error("Unknown {direction} filter '{name}'. Valid filters are: {}", known.join(", "))]
    UnknownFilter {
        name: String,
        direction: String,
        /// Canonical identifiers for the direction, alphabetically sorted.
        known: Vec<String>,
    },

    #[error("Conversion failed: {message}")]
    ConversionFailed { message: String },

    // Fatal to the request AND to the service
    #[error("Conversion did not finish within {0:?}")]
    ConversionTimeout(Duration),

    // Client-side errors
    #[error("Could not reach server at {host}:{port} after {attempts} attempts")]
    ConnectionRetryExhausted {
        host: String,
        port: u16,
        attempts: u32,
    },

    #[error("Version mismatch: client is {client}, server is {server}")]
    VersionMismatch { client: String, server: String },

    // Request validation errors
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Method not found: {0}")]
    UnknownMethod(String),

    // Wire protocol errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("RPC fault {code}: {message}")]
    Fault { code: i32, message: String },

    // Infrastructure errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for scriba operations.
pub type Result<T> = std::result::Result<T, ScribaError>;

impl From<std::io::Error> for ScribaError {
    fn from(err: std::io::Error) -> Self {
        ScribaError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ScribaError {
    fn from(err: serde_json::Error) -> Self {
        ScribaError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ScribaError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ScribaError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Engine unavailable
    /// - -32001: Unknown filter
    /// - -32002: Conversion failed
    /// - -32003: Conversion timeout
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            ScribaError::EngineUnavailable
            | ScribaError::EngineLaunch { .. }
            | ScribaError::EngineStartupTimeout { .. } => -32000,

            ScribaError::UnknownFilter { .. } => -32001,

            ScribaError::ConversionFailed { .. } => -32002,

            ScribaError::ConversionTimeout(_) => -32003,

            ScribaError::InvalidRequest { .. } => -32602,

            ScribaError::UnknownMethod(_) => -32601,

            ScribaError::Protocol { .. } => -32700,

            ScribaError::Fault { code, .. } => *code,

            // All other errors are internal errors
            _ => -32603,
        }
    }

    /// Rebuild an error kind from a fault received over the wire.
    ///
    /// The structured payload (`data`) carries the sorted filter list for
    /// `UnknownFilter` faults so clients can reconstruct it.
    pub fn from_fault(code: i32, message: String, data: Option<serde_json::Value>) -> Self {
        match code {
            -32000 => ScribaError::EngineUnavailable,
            -32001 => {
                let known = data
                    .as_ref()
                    .and_then(|d| d.get("known"))
                    .and_then(|k| k.as_array())
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();
                let name = data
                    .as_ref()
                    .and_then(|d| d.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string();
                let direction = data
                    .as_ref()
                    .and_then(|d| d.get("direction"))
                    .and_then(|n| n.as_str())
                    .unwrap_or("export")
                    .to_string();
                ScribaError::UnknownFilter {
                    name,
                    direction,
                    known,
                }
            }
            -32002 => ScribaError::ConversionFailed { message },
            -32003 => {
                let secs = data
                    .as_ref()
                    .and_then(|d| d.get("timeout_secs"))
                    .and_then(|s| s.as_u64())
                    .unwrap_or(0);
                ScribaError::ConversionTimeout(Duration::from_secs(secs))
            }
            -32602 => ScribaError::InvalidRequest { message },
            _ => ScribaError::Fault { code, message },
        }
    }

    /// Structured payload attached to the JSON-RPC fault, where one exists.
    pub fn fault_data(&self) -> Option<serde_json::Value> {
        match self {
            ScribaError::UnknownFilter {
                name,
                direction,
                known,
            } => Some(serde_json::json!({
                "name": name,
                "direction": direction,
                "known": known,
            })),
            ScribaError::ConversionTimeout(d) => Some(serde_json::json!({
                "timeout_secs": d.as_secs(),
            })),
            _ => None,
        }
    }

    /// Process exit code for the CLI binaries.
    pub fn exit_code(&self) -> i32 {
        match self {
            ScribaError::EngineLaunch { .. } | ScribaError::EngineStartupTimeout { .. } => 2,
            ScribaError::UnknownFilter { .. } => 3,
            ScribaError::ConversionFailed { .. } => 4,
            ScribaError::ConversionTimeout(_) => 5,
            ScribaError::ConnectionRetryExhausted { .. } => 6,
            ScribaError::VersionMismatch { .. } => 7,
            _ => 1,
        }
    }

    /// Check if a client-side connection error should trigger another attempt.
    ///
    /// Only "server not up yet" conditions are retryable; everything else is
    /// immediately fatal to the invocation.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScribaError::Io { source, .. } => source.as_ref().is_some_and(|e| {
                matches!(
                    e.kind(),
                    std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::TimedOut
                )
            }),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScribaError::UnknownFilter {
            name: "docx9000".into(),
            direction: "export".into(),
            known: vec!["writer_pdf_Export".into(), "writer8".into()],
        };
        assert_eq!(
            err.to_string(),
            "Unknown export filter 'docx9000'. Valid filters are: writer_pdf_Export, writer8"
        );
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            ScribaError::ConversionFailed {
                message: "boom".into()
            }
            .to_rpc_error_code(),
            -32002
        );
        assert_eq!(
            ScribaError::ConversionTimeout(Duration::from_secs(30)).to_rpc_error_code(),
            -32003
        );
        assert_eq!(
            ScribaError::UnknownMethod("frobnicate".into()).to_rpc_error_code(),
            -32601
        );
    }

    #[test]
    fn test_fault_roundtrip_unknown_filter() {
        let err = ScribaError::UnknownFilter {
            name: "bogus".into(),
            direction: "import".into(),
            known: vec!["calc8".into(), "writer8".into()],
        };
        let code = err.to_rpc_error_code();
        let data = err.fault_data();
        let rebuilt = ScribaError::from_fault(code, err.to_string(), data);

        match rebuilt {
            ScribaError::UnknownFilter {
                name,
                direction,
                known,
            } => {
                assert_eq!(name, "bogus");
                assert_eq!(direction, "import");
                assert_eq!(known, vec!["calc8".to_string(), "writer8".to_string()]);
            }
            other => panic!("Expected UnknownFilter, got: {:?}", other),
        }
    }

    #[test]
    fn test_fault_roundtrip_timeout() {
        let err = ScribaError::ConversionTimeout(Duration::from_secs(45));
        let rebuilt =
            ScribaError::from_fault(err.to_rpc_error_code(), err.to_string(), err.fault_data());
        match rebuilt {
            ScribaError::ConversionTimeout(d) => assert_eq!(d, Duration::from_secs(45)),
            other => panic!("Expected ConversionTimeout, got: {:?}", other),
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            ScribaError::ConnectionRetryExhausted {
                host: "localhost".into(),
                port: 2003,
                attempts: 5,
            }
            .exit_code(),
            6
        );
        assert_eq!(
            ScribaError::VersionMismatch {
                client: "0.4.0".into(),
                server: "0.3.0".into(),
            }
            .exit_code(),
            7
        );
    }

    #[test]
    fn test_retryable_errors() {
        let refused = ScribaError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(refused.is_retryable());

        let mismatch = ScribaError::VersionMismatch {
            client: "1".into(),
            server: "2".into(),
        };
        assert!(!mismatch.is_retryable());
    }
}
